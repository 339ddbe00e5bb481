//! Typed client for the chat platform's Web API.
//!
//! Covers the slice of the API the chat-mention adapter needs: thread
//! fetching, message posting, reactions, and an auth probe. The platform
//! wraps every response in `{ok: bool, error?: string}`; `ok=false` is
//! surfaced as an error except for the idempotent reaction cases
//! (`already_reacted`, `no_reaction`).

use std::time::Duration;

use serde::Deserialize;

use crate::error::ChatApiError;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitError, RateLimiter};

/// Default Web API base URL.
const DEFAULT_BASE_URL: &str = "https://chat.example-platform.com/api";

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(400);
const RETRY_CAP: Duration = Duration::from_secs(8);

/// A message inside a chat thread.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    /// Message timestamp, the platform's message id.
    pub ts: String,
    /// Author user id.
    #[serde(default)]
    pub user: String,
    /// Message text.
    #[serde(default)]
    pub text: String,
    /// Root timestamp when the message lives in a thread.
    #[serde(default)]
    pub thread_ts: Option<String>,
}

/// Result of the auth probe.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthInfo {
    /// The bot's user id.
    #[serde(default)]
    pub user_id: String,
    /// Workspace id the token belongs to.
    #[serde(default)]
    pub team_id: String,
}

/// Client for the chat platform's Web API.
pub struct ChatApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

impl ChatApiClient {
    /// Create a client from a decrypted bot token.
    ///
    /// Fails when the token is empty or an obvious placeholder.
    pub fn new(token: &str) -> Result<Self, ChatApiError> {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against a custom base URL (for testing).
    pub fn with_base_url(token: &str, base_url: String) -> Result<Self, ChatApiError> {
        if is_placeholder(token) {
            return Err(ChatApiError::InvalidCredential);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: token.to_string(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            limiter: RateLimiter::new(5, 1.0),
        })
    }

    /// Fetch all messages of a thread, root first.
    pub async fn fetch_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ChatMessage>, ChatApiError> {
        let response: RepliesResponse = self
            .call_api(
                "conversations.replies",
                &serde_json::json!({"channel": channel, "ts": thread_ts}),
            )
            .await?;
        Ok(response.messages)
    }

    /// Post a message, optionally into an existing thread. Returns the new
    /// message's timestamp.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String, ChatApiError> {
        let mut body = serde_json::json!({"channel": channel, "text": text});
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::json!(ts);
        }

        let response: PostMessageResponse = self.call_api("chat.postMessage", &body).await?;
        Ok(response.ts)
    }

    /// Add a reaction glyph to a message. Adding a glyph that is already
    /// present succeeds.
    pub async fn add_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), ChatApiError> {
        self.call_reaction(
            "reactions.add",
            &serde_json::json!({"channel": channel, "timestamp": ts, "name": name}),
            "already_reacted",
        )
        .await
    }

    /// Remove a reaction glyph from a message. Removing an absent glyph
    /// succeeds.
    pub async fn remove_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), ChatApiError> {
        self.call_reaction(
            "reactions.remove",
            &serde_json::json!({"channel": channel, "timestamp": ts, "name": name}),
            "no_reaction",
        )
        .await
    }

    /// Probe the token; backs adapter `test_connection`.
    pub async fn auth_test(&self) -> Result<AuthInfo, ChatApiError> {
        self.call_api("auth.test", &serde_json::json!({})).await
    }

    /// Reaction call with one tolerated platform error, mapped to success
    /// inside the resilience stack so it neither burns retries nor counts
    /// as a breaker failure.
    async fn call_reaction(
        &self,
        api_method: &str,
        body: &serde_json::Value,
        tolerated: &str,
    ) -> Result<(), ChatApiError> {
        crate::resilience::retry_with_backoff(
            || async {
                self.breaker
                    .call(|| async {
                        self.limiter.acquire().await;
                        match self.send::<Ack>(api_method, body).await {
                            Ok(_) => Ok(()),
                            Err(ChatApiError::Platform(e)) if e == tolerated => Ok(()),
                            Err(e) => Err(e),
                        }
                    })
                    .await
                    .map_err(|e| match e {
                        CircuitError::Open => {
                            ChatApiError::CircuitOpen("chat API unavailable".to_string())
                        }
                        CircuitError::Inner(inner) => inner,
                    })
            },
            RETRY_ATTEMPTS,
            RETRY_BASE,
            RETRY_CAP,
        )
        .await
    }

    async fn call_api<T: serde::de::DeserializeOwned>(
        &self,
        api_method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChatApiError> {
        crate::resilience::retry_with_backoff(
            || async {
                self.breaker
                    .call(|| async {
                        self.limiter.acquire().await;
                        self.send(api_method, body).await
                    })
                    .await
                    .map_err(|e| match e {
                        CircuitError::Open => {
                            ChatApiError::CircuitOpen("chat API unavailable".to_string())
                        }
                        CircuitError::Inner(inner) => inner,
                    })
            },
            RETRY_ATTEMPTS,
            RETRY_BASE,
            RETRY_CAP,
        )
        .await
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        api_method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChatApiError> {
        let response = self
            .client
            .post(format!("{}/{api_method}", self.base_url))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let envelope: serde_json::Value = response.json().await?;

        if !envelope["ok"].as_bool().unwrap_or(false) {
            let error = envelope["error"].as_str().unwrap_or("unknown_error");
            return Err(ChatApiError::Platform(error.to_string()));
        }

        serde_json::from_value(envelope).map_err(|e| {
            ChatApiError::Platform(format!("unexpected {api_method} response: {e}"))
        })
    }
}

/// Whether a credential is unusable (empty or an obvious placeholder).
fn is_placeholder(credential: &str) -> bool {
    let trimmed = credential.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("changeme")
        || trimmed.eq_ignore_ascii_case("placeholder")
        || trimmed.starts_with("your-")
}

// --- Internal Serde types ---

#[derive(Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    #[serde(default)]
    ts: String,
}

#[derive(Deserialize)]
struct Ack {}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ChatApiClient {
        ChatApiClient::with_base_url("xoxb-token", server.uri()).unwrap()
    }

    #[test]
    fn constructor_rejects_placeholder_tokens() {
        assert!(ChatApiClient::new("").is_err());
        assert!(ChatApiClient::new("your-bot-token").is_err());
        assert!(ChatApiClient::new("xoxb-1-2-3").is_ok());
    }

    #[tokio::test]
    async fn fetch_replies_returns_thread_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [
                    {"ts": "1.1", "user": "U1", "text": "root"},
                    {"ts": "1.2", "user": "U2", "text": "reply", "thread_ts": "1.1"}
                ]
            })))
            .mount(&server)
            .await;

        let messages = client(&server).fetch_replies("C1", "1.1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "root");
    }

    #[tokio::test]
    async fn post_message_threads_when_given_a_root() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(serde_json::json!({"thread_ts": "1.1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "ts": "1.9"
            })))
            .mount(&server)
            .await;

        let ts = client(&server)
            .post_message("C1", "done", Some("1.1"))
            .await
            .unwrap();
        assert_eq!(ts, "1.9");
    }

    #[tokio::test]
    async fn platform_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "channel_not_found"
            })))
            .mount(&server)
            .await;

        let err = client(&server).fetch_replies("C9", "1.1").await.unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn already_reacted_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reactions.add"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "already_reacted"
            })))
            .mount(&server)
            .await;

        client(&server).add_reaction("C1", "1.1", "eyes").await.unwrap();
    }

    #[tokio::test]
    async fn no_reaction_is_not_an_error_on_remove() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reactions.remove"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "no_reaction"
            })))
            .mount(&server)
            .await;

        client(&server)
            .remove_reaction("C1", "1.1", "eyes")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn auth_test_returns_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "user_id": "UBOT",
                "team_id": "T1"
            })))
            .mount(&server)
            .await;

        let info = client(&server).auth_test().await.unwrap();
        assert_eq!(info.user_id, "UBOT");
        assert_eq!(info.team_id, "T1");
    }
}
