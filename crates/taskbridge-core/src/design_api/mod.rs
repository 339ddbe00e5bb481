//! Typed client for the design platform's REST API.
//!
//! Covers paginated comment retrieval, comment replies, and comment
//! reactions. Thread assembly walks parent pointers to the root comment and
//! collects its direct replies in creation order. File-identifier inputs
//! that look like URLs are parsed down to the opaque file key.

use std::time::Duration;

use serde::Deserialize;

use crate::error::DesignApiError;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitError, RateLimiter};
use crate::taskdb::ErrorBody;

/// Default design platform API base URL.
const DEFAULT_BASE_URL: &str = "https://design.example-platform.com/v1";

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(400);
const RETRY_CAP: Duration = Duration::from_secs(8);

/// One comment on a design file.
#[derive(Debug, Clone, Deserialize)]
pub struct DesignComment {
    /// Comment id.
    pub id: String,
    /// Parent comment id; empty or absent for root comments.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Comment text.
    #[serde(default)]
    pub message: String,
    /// Author handle.
    #[serde(default)]
    pub user: CommentUser,
    /// ISO-8601 creation timestamp.
    #[serde(default)]
    pub created_at: String,
}

/// Comment author identity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentUser {
    /// Display handle.
    #[serde(default)]
    pub handle: String,
}

/// A root comment together with its direct replies.
#[derive(Debug, Clone)]
pub struct CommentThread {
    /// The root comment.
    pub root: DesignComment,
    /// Replies to the root, sorted by creation time.
    pub replies: Vec<DesignComment>,
}

/// Client for the design platform's REST API.
pub struct DesignApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

impl DesignApiClient {
    /// Create a client from a decrypted API key.
    ///
    /// Fails when the key is empty or an obvious placeholder.
    pub fn new(token: &str) -> Result<Self, DesignApiError> {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against a custom base URL (for testing).
    pub fn with_base_url(token: &str, base_url: String) -> Result<Self, DesignApiError> {
        if is_placeholder(token) {
            return Err(DesignApiError::InvalidCredential);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: token.to_string(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            limiter: RateLimiter::new(5, 2.0),
        })
    }

    /// Fetch every comment on a file, following pagination cursors.
    pub async fn get_comments(&self, file_key: &str) -> Result<Vec<DesignComment>, DesignApiError> {
        let key = parse_file_key(file_key);
        let mut comments = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let path = match cursor.as_deref() {
                Some(c) => format!("/files/{key}/comments?cursor={c}"),
                None => format!("/files/{key}/comments"),
            };
            let page: CommentsResponse = self.call_api(reqwest::Method::GET, &path, None).await?;
            comments.extend(page.comments);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(comments)
    }

    /// Post a reply under an existing comment.
    pub async fn post_reply(
        &self,
        file_key: &str,
        comment_id: &str,
        message: &str,
    ) -> Result<DesignComment, DesignApiError> {
        let key = parse_file_key(file_key);
        self.call_api(
            reqwest::Method::POST,
            &format!("/files/{key}/comments"),
            Some(serde_json::json!({"message": message, "comment_id": comment_id})),
        )
        .await
    }

    /// Add a reaction emoji to a comment.
    pub async fn add_reaction(
        &self,
        file_key: &str,
        comment_id: &str,
        emoji: &str,
    ) -> Result<(), DesignApiError> {
        let key = parse_file_key(file_key);
        let _: Ack = self
            .call_api(
                reqwest::Method::POST,
                &format!("/files/{key}/comments/{comment_id}/reactions"),
                Some(serde_json::json!({"emoji": emoji})),
            )
            .await?;
        Ok(())
    }

    /// Remove a reaction emoji from a comment.
    pub async fn remove_reaction(
        &self,
        file_key: &str,
        comment_id: &str,
        emoji: &str,
    ) -> Result<(), DesignApiError> {
        let key = parse_file_key(file_key);
        let _: Ack = self
            .call_api(
                reqwest::Method::DELETE,
                &format!("/files/{key}/comments/{comment_id}/reactions?emoji={emoji}"),
                None,
            )
            .await?;
        Ok(())
    }

    /// Replace one reaction emoji with another.
    ///
    /// Removal failures are tolerated (the old glyph may already be gone);
    /// the add is authoritative.
    pub async fn update_reaction(
        &self,
        file_key: &str,
        comment_id: &str,
        old_emoji: &str,
        new_emoji: &str,
    ) -> Result<(), DesignApiError> {
        if let Err(e) = self.remove_reaction(file_key, comment_id, old_emoji).await {
            tracing::debug!(emoji = old_emoji, error = %e, "reaction removal failed");
        }
        self.add_reaction(file_key, comment_id, new_emoji).await
    }

    /// Assemble the thread containing `comment_id`.
    ///
    /// Walks parent pointers to the root, then collects all comments whose
    /// parent is that root, sorted by creation time.
    pub async fn build_thread(
        &self,
        file_key: &str,
        comment_id: &str,
    ) -> Result<CommentThread, DesignApiError> {
        let comments = self.get_comments(file_key).await?;

        let find = |id: &str| comments.iter().find(|c| c.id == id);
        let mut current = find(comment_id)
            .ok_or_else(|| DesignApiError::CommentNotFound(comment_id.to_string()))?;

        // Walk to the root; parent chains are short but a cycle in bad data
        // must not hang us.
        let mut hops = 0;
        while let Some(parent_id) = current.parent_id.as_deref().filter(|p| !p.is_empty()) {
            match find(parent_id) {
                Some(parent) if hops < comments.len() => {
                    current = parent;
                    hops += 1;
                }
                _ => break,
            }
        }
        let root = current.clone();

        let mut replies: Vec<DesignComment> = comments
            .into_iter()
            .filter(|c| c.parent_id.as_deref() == Some(root.id.as_str()))
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(CommentThread { root, replies })
    }

    async fn call_api<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, DesignApiError> {
        crate::resilience::retry_with_backoff(
            || async {
                self.breaker
                    .call(|| async {
                        self.limiter.acquire().await;
                        self.send(method.clone(), path, body.as_ref()).await
                    })
                    .await
                    .map_err(|e| match e {
                        CircuitError::Open => {
                            DesignApiError::CircuitOpen("design API unavailable".to_string())
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
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, DesignApiError> {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("X-Api-Key", &self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(DesignApiError::Api { status, message });
        }

        response.json().await.map_err(DesignApiError::Request)
    }
}

/// Extract the opaque file key from a file URL, passing bare keys through.
///
/// Accepts `https://…/file/<key>/…` and `https://…/design/<key>/…` forms.
pub fn parse_file_key(input: &str) -> String {
    if !input.starts_with("http://") && !input.starts_with("https://") {
        return input.to_string();
    }

    let segments: Vec<&str> = input
        .splitn(2, "://")
        .nth(1)
        .unwrap_or(input)
        .split('/')
        .collect();

    for (i, segment) in segments.iter().enumerate() {
        if matches!(*segment, "file" | "design") {
            if let Some(key) = segments.get(i + 1) {
                if !key.is_empty() {
                    return (*key).to_string();
                }
            }
        }
    }
    input.to_string()
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
struct CommentsResponse {
    #[serde(default)]
    comments: Vec<DesignComment>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct Ack {}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DesignApiClient {
        DesignApiClient::with_base_url("figd_token", server.uri()).unwrap()
    }

    fn comment(id: &str, parent: Option<&str>, created: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "parent_id": parent,
            "message": format!("message {id}"),
            "user": {"handle": "alice"},
            "created_at": created
        })
    }

    #[test]
    fn file_keys_are_extracted_from_urls() {
        assert_eq!(
            parse_file_key("https://design.example.com/file/AbC123xYz/My-File?node=1"),
            "AbC123xYz"
        );
        assert_eq!(
            parse_file_key("https://design.example.com/design/K3y/Another"),
            "K3y"
        );
        assert_eq!(parse_file_key("AbC123xYz"), "AbC123xYz");
    }

    #[tokio::test]
    async fn get_comments_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/K1/comments"))
            .and(query_param("cursor", "c2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "comments": [comment("c-2", None, "2026-01-02T00:00:00Z")],
                "next_cursor": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/K1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "comments": [comment("c-1", None, "2026-01-01T00:00:00Z")],
                "next_cursor": "c2"
            })))
            .mount(&server)
            .await;

        let comments = client(&server).get_comments("K1").await.unwrap();
        assert_eq!(comments.len(), 2);
    }

    #[tokio::test]
    async fn build_thread_walks_to_root_and_sorts_replies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/K1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "comments": [
                    comment("root", None, "2026-01-01T00:00:00Z"),
                    comment("r2", Some("root"), "2026-01-03T00:00:00Z"),
                    comment("r1", Some("root"), "2026-01-02T00:00:00Z"),
                    comment("other-root", None, "2026-01-01T00:00:00Z")
                ],
                "next_cursor": null
            })))
            .mount(&server)
            .await;

        // Start from a reply; the walk must land on the root.
        let thread = client(&server).build_thread("K1", "r2").await.unwrap();
        assert_eq!(thread.root.id, "root");
        assert_eq!(
            thread.replies.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["r1", "r2"]
        );
    }

    #[tokio::test]
    async fn build_thread_unknown_comment_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/K1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "comments": [],
                "next_cursor": null
            })))
            .mount(&server)
            .await;

        let err = client(&server).build_thread("K1", "ghost").await.unwrap_err();
        assert!(matches!(err, DesignApiError::CommentNotFound(_)));
    }

    #[tokio::test]
    async fn post_reply_targets_the_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/K1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(comment(
                "new-reply",
                Some("root"),
                "2026-01-04T00:00:00Z",
            )))
            .mount(&server)
            .await;

        let reply = client(&server)
            .post_reply("K1", "root", "tasks created")
            .await
            .unwrap();
        assert_eq!(reply.id, "new-reply");
    }

    #[tokio::test]
    async fn reactions_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/K1/comments/c1/reactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/K1/comments/c1/reactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let c = client(&server);
        c.add_reaction("K1", "c1", ":eyes:").await.unwrap();
        c.remove_reaction("K1", "c1", ":eyes:").await.unwrap();
    }
}
