//! Adapter for emailed design-comment notifications.
//!
//! The mail provider forwards notification emails as webhook payloads;
//! parsing delegates to the multi-strategy HTML extractor. The tenant is
//! the slug in the recipient's local part (`slug@host`), falling back to
//! the literal `default`. Status maps to reaction glyphs on the origin
//! comment, with a single "watching" glyph shared by the pending and
//! processing states.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::Settings;
use crate::crypto;
use crate::design_api::DesignApiClient;
use crate::storage::source_configs::SourceConfig;

use super::extract::{extract_comment, ExtractedComment};
use super::{
    AdapterError, ConfigValidation, DiscussionStatus, ParsedDiscussion, SourceAdapter, Thread,
    ThreadMessage,
};

/// Source-type tag for this adapter.
pub const SOURCE_TYPE: &str = "comment_email";

const MAX_TITLE_LEN: usize = 80;

/// Glyph shared by the pending and processing (watching) states.
const WATCHING_GLYPH: &str = ":eyes:";
const COMPLETED_GLYPH: &str = ":white_check_mark:";
const FAILED_GLYPH: &str = ":x:";

/// Adapter for emailed design comments.
#[derive(Debug)]
pub struct CommentEmailAdapter {
    settings: Settings,
    bot_handle: Option<String>,
    api_base: Option<String>,
}

impl CommentEmailAdapter {
    /// Create an adapter backed by the process settings.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            bot_handle: None,
            api_base: None,
        }
    }

    /// Set the bot handle used by the highest-priority extraction strategy.
    #[must_use]
    pub fn with_bot_handle(mut self, handle: impl Into<String>) -> Self {
        self.bot_handle = Some(handle.into());
        self
    }

    /// Point the adapter's API client at a custom base URL (for testing).
    pub fn with_api_base(settings: Settings, api_base: String) -> Self {
        Self {
            settings,
            bot_handle: None,
            api_base: Some(api_base),
        }
    }

    /// Build a design client from the config's decrypted API token.
    fn client(&self, config: &SourceConfig) -> Result<DesignApiClient, AdapterError> {
        let token = decrypt_token(config.api_token.as_deref(), &self.settings)?;
        let client = match &self.api_base {
            Some(base) => DesignApiClient::with_base_url(&token, base.clone()),
            None => DesignApiClient::new(&token),
        };
        client.map_err(|e| AdapterError::Credential(e.to_string()))
    }
}

/// Split a `{file_key}:{comment_id}` thread id produced by `parse_incoming`.
fn split_thread_id(thread_id: &str) -> Result<(&str, &str), AdapterError> {
    thread_id
        .split_once(':')
        .filter(|(file, comment)| !file.is_empty() && !comment.is_empty())
        .ok_or_else(|| {
            AdapterError::MissingMetadata(format!(
                "thread id '{thread_id}' does not carry a file key"
            ))
        })
}

#[async_trait]
impl SourceAdapter for CommentEmailAdapter {
    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn parse_incoming(&self, payload: &serde_json::Value) -> Result<ParsedDiscussion, AdapterError> {
        let html = payload
            .get("body-html")
            .or_else(|| payload.get("html"))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| missing("body-html"))?;
        let sender = payload
            .get("sender")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| missing("sender"))?;
        let recipient = payload.get("recipient").and_then(|v| v.as_str());

        let extracted = extract_comment(html, sender, self.bot_handle.as_deref())
            .ok_or_else(|| missing("comment text or file key"))?;

        let tenant_hint = recipient
            .and_then(|r| r.split('@').next())
            .filter(|slug| !slug.is_empty())
            .unwrap_or("default")
            .to_string();

        Ok(to_parsed_discussion(extracted, tenant_hint, payload))
    }

    async fn fetch_thread(
        &self,
        thread_id: &str,
        config: &SourceConfig,
    ) -> Result<Thread, AdapterError> {
        let (file_key, comment_id) = split_thread_id(thread_id)?;
        let client = self.client(config)?;

        let comment_thread = client
            .build_thread(file_key, comment_id)
            .await
            .map_err(|e| AdapterError::Upstream(e.to_string()))?;

        let to_message = |c: crate::design_api::DesignComment| ThreadMessage {
            id: c.id,
            author: c.user.handle,
            content: c.message,
            timestamp: c.created_at,
            attachments: vec![],
        };

        let root = to_message(comment_thread.root);
        let replies: Vec<ThreadMessage> =
            comment_thread.replies.into_iter().map(to_message).collect();

        let mut participants: Vec<String> = Vec::new();
        for author in std::iter::once(&root.author).chain(replies.iter().map(|m| &m.author)) {
            if !author.is_empty() && !participants.contains(author) {
                participants.push(author.clone());
            }
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("file_key".to_string(), file_key.to_string());

        Ok(Thread {
            id: thread_id.to_string(),
            root,
            replies,
            participants,
            metadata,
        })
    }

    async fn post_reply(
        &self,
        thread_id: &str,
        message: &str,
        config: &SourceConfig,
    ) -> Result<bool, AdapterError> {
        if !config.post_confirmation {
            return Ok(false);
        }

        let (file_key, comment_id) = split_thread_id(thread_id)?;
        let client = self.client(config)?;

        client
            .post_reply(file_key, comment_id, message)
            .await
            .map_err(|e| AdapterError::Upstream(e.to_string()))?;
        Ok(true)
    }

    async fn update_status(
        &self,
        thread_id: &str,
        status: DiscussionStatus,
        config: &SourceConfig,
    ) -> Result<bool, AdapterError> {
        let (file_key, comment_id) = split_thread_id(thread_id)?;
        let client = self.client(config)?;

        match status {
            // Within the watching states the glyph is merely added.
            DiscussionStatus::Pending | DiscussionStatus::Processing => {
                client
                    .add_reaction(file_key, comment_id, WATCHING_GLYPH)
                    .await
                    .map_err(|e| AdapterError::Upstream(e.to_string()))?;
            }
            DiscussionStatus::Completed | DiscussionStatus::Failed => {
                // Leaving the watching states removes the watching glyph
                // before the terminal glyph is added.
                let glyph = if status == DiscussionStatus::Completed {
                    COMPLETED_GLYPH
                } else {
                    FAILED_GLYPH
                };
                client
                    .update_reaction(file_key, comment_id, WATCHING_GLYPH, glyph)
                    .await
                    .map_err(|e| AdapterError::Upstream(e.to_string()))?;
            }
        }
        Ok(true)
    }

    fn validate_config(&self, config: &SourceConfig) -> ConfigValidation {
        let mut errors = Vec::new();

        if config.source_type != SOURCE_TYPE {
            errors.push(format!(
                "config source type is '{}', expected '{SOURCE_TYPE}'",
                config.source_type
            ));
        }
        if config.api_token.as_deref().unwrap_or("").is_empty() {
            errors.push("api token is not set".to_string());
        }

        if errors.is_empty() {
            ConfigValidation::ok()
        } else {
            ConfigValidation::failed(errors)
        }
    }

    async fn test_connection(&self, config: &SourceConfig) -> bool {
        let Some(file_key) = config.metadata_value("file_key") else {
            return false;
        };
        match self.client(config) {
            Ok(client) => client.get_comments(&file_key).await.is_ok(),
            Err(_) => false,
        }
    }
}

fn to_parsed_discussion(
    extracted: ExtractedComment,
    tenant_hint: String,
    payload: &serde_json::Value,
) -> ParsedDiscussion {
    // Synthesize a comment id for notifications whose links carry none, so
    // the thread id stays well-formed.
    let comment_id = extracted
        .comment_id
        .clone()
        .unwrap_or_else(|| format!("email-{}", short_hash(&extracted.comment_text)));

    let mut metadata = extracted.metadata;
    metadata.insert("file_key".to_string(), extracted.file_key.clone());
    metadata.insert("comment_id".to_string(), comment_id.clone());
    if let Some(name) = &extracted.file_name {
        metadata.insert("file_name".to_string(), name.clone());
    }

    let author = extracted
        .author_name
        .unwrap_or_else(|| extracted.author_email.clone());

    let timestamp = payload
        .get("timestamp")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    ParsedDiscussion {
        source_type: SOURCE_TYPE.to_string(),
        source_thread_id: format!("{}:{comment_id}", extracted.file_key),
        source_url: extracted.source_url,
        tenant_hint,
        author: author.clone(),
        title: derive_title(&extracted.comment_text),
        content: extracted.comment_text,
        participants: vec![author],
        timestamp,
        metadata,
    }
}

/// Decrypt a stored token, passing through values that were never
/// encrypted. An encrypted value that fails to decrypt refuses the
/// operation.
fn decrypt_token(stored: Option<&str>, settings: &Settings) -> Result<String, AdapterError> {
    let stored = stored
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AdapterError::Credential("api token is not set".to_string()))?;

    if !crypto::is_encrypted(stored) {
        return Ok(stored.to_string());
    }

    let master_key = settings
        .master_key()
        .map_err(|e| AdapterError::Credential(e.to_string()))?;
    crypto::decrypt_secret(stored, master_key).map_err(|e| AdapterError::Credential(e.to_string()))
}

fn missing(field: &str) -> AdapterError {
    AdapterError::InvalidPayload {
        field: field.to_string(),
    }
}

fn short_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

fn derive_title(content: &str) -> String {
    let line = content.lines().next().unwrap_or("").trim();
    if line.chars().count() <= MAX_TITLE_LEN {
        line.to_string()
    } else {
        line.chars().take(MAX_TITLE_LEN).collect()
    }
}
