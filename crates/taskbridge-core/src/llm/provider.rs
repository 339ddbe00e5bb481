//! Messages-API completion provider.
//!
//! Thin reqwest wrapper over an Anthropic-style Messages endpoint. The
//! higher-level `LlmClient` owns prompting, caching, and the resilience
//! stack; this module only sends one completion and maps errors.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Default Messages API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Default model for enrichment calls.
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// HTTP provider for the Messages API.
pub struct MessagesProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl MessagesProvider {
    /// Create a provider with the default base URL and model.
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a provider with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Send one completion and return the concatenated text blocks.
    pub async fn complete(
        &self,
        system: &str,
        user_message: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        tracing::debug!(model = %self.model, max_tokens, "LLM request");

        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system: if system.is_empty() { None } else { Some(system) },
            messages: vec![Message {
                role: "user",
                content: user_message,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api { status, message });
        }

        let body: MessagesResponse = response.json().await.map_err(LlmError::Request)?;

        let text = body
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        tracing::debug!(chars = text.len(), "LLM response");
        Ok(text)
    }
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}
