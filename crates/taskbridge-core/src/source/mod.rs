//! Source-adapter framework.
//!
//! Every external collaboration source (chat mentions, design-comment
//! emails) is abstracted behind the `SourceAdapter` trait: webhook parsing,
//! thread fetching, reply posting, and status updates. Adapters decrypt
//! tenant credentials at operation time and hold no plaintext secret beyond
//! the operation's call stack.

pub mod chat_mention;
pub mod comment_email;
pub mod extract;
pub mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::storage::source_configs::SourceConfig;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from source adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The payload does not match the expected shape for this source.
    #[error("invalid payload: missing required ingress field {field}")]
    InvalidPayload {
        /// The field that was absent or malformed.
        field: String,
    },

    /// The payload is well-formed but intentionally not processed
    /// (e.g. a chat event type other than an app mention).
    #[error("payload ignored: {0}")]
    Ignored(String),

    /// The source config lacks metadata this operation needs
    /// (e.g. channel id or design-file key).
    #[error("missing source metadata: {0}")]
    MissingMetadata(String),

    /// A stored credential could not be decrypted or is absent.
    #[error("credential error: {0}")]
    Credential(String),

    /// The upstream platform call failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// No adapter is registered for the requested source type.
    #[error("unknown source type '{requested}', available: {available}")]
    UnknownSourceType {
        /// The tag that was requested.
        requested: String,
        /// Comma-separated registered tags.
        available: String,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Abstract status of a discussion, mapped by each adapter to a
/// source-specific wire gesture (reaction glyph, status field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStatus {
    /// Ingested, not yet picked up by the processor.
    Pending,
    /// A processor run is in flight.
    Processing,
    /// Tasks were created.
    Completed,
    /// The last processing attempt failed terminally.
    Failed,
}

impl DiscussionStatus {
    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage representation, defaulting unknown values to pending.
    pub fn parse(value: &str) -> Self {
        match value {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// The adapter's parse of one incoming webhook payload.
///
/// Transient: converted into a persisted discussion by the ingress handler.
#[derive(Debug, Clone)]
pub struct ParsedDiscussion {
    /// Source-type tag of the adapter that produced this.
    pub source_type: String,
    /// Source-side thread identifier (replies aggregate to the root).
    pub source_thread_id: String,
    /// Deep link back to the source conversation, when derivable.
    pub source_url: Option<String>,
    /// Tenant identifier hint (workspace id, recipient slug).
    pub tenant_hint: String,
    /// Author handle on the source platform.
    pub author: String,
    /// Short title derived from the message.
    pub title: String,
    /// The author's original message text.
    pub content: String,
    /// Participant handles, ordered, duplicates removed.
    pub participants: Vec<String>,
    /// ISO-8601 event timestamp.
    pub timestamp: String,
    /// Source-specific metadata needed by later operations
    /// (channel id, message ts, file key, comment id).
    pub metadata: BTreeMap<String, String>,
}

/// Kind of a message attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
    Link,
}

/// An attachment carried by a thread message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// Source-side attachment id.
    pub id: String,
    /// Attachment kind.
    pub kind: AttachmentKind,
    /// Direct URL.
    pub url: String,
    /// Display name, when the source provides one.
    pub name: Option<String>,
    /// MIME type, when the source provides one.
    pub mime: Option<String>,
}

/// A single message inside a thread.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThreadMessage {
    /// Source-side message id.
    pub id: String,
    /// Author handle.
    pub author: String,
    /// Message text.
    pub content: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Attachments, empty for plain messages.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A conversation snapshot: root message plus ordered replies.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Thread {
    /// Source-side thread id.
    pub id: String,
    /// The message that started the thread.
    pub root: ThreadMessage,
    /// Replies in chronological order.
    pub replies: Vec<ThreadMessage>,
    /// Distinct participant handles.
    pub participants: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Thread {
    /// Ordered ids of all messages, root first. Cache keys for LLM
    /// summaries derive from this sequence.
    pub fn message_ids(&self) -> Vec<&str> {
        std::iter::once(self.root.id.as_str())
            .chain(self.replies.iter().map(|m| m.id.as_str()))
            .collect()
    }
}

/// Per-tenant mapping from abstract task fields to task-database property
/// names. Absent mappings cause the property to be omitted.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FieldMapping {
    /// Title property name; the task database requires one, so this
    /// defaults to `Name` when unset.
    pub title: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub due: Option<String>,
    pub tags: Option<String>,
    /// Property holding the deep link back to the source discussion; also
    /// the duplicate-detection key.
    pub source_url: Option<String>,
}

impl FieldMapping {
    /// The title property name, defaulting to `Name`.
    pub fn title_field(&self) -> &str {
        self.title.as_deref().unwrap_or("Name")
    }
}

/// Result of `validate_config`; never an error.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConfigValidation {
    /// Whether the config can be used as-is.
    pub valid: bool,
    /// Human-readable problems when invalid.
    pub errors: Vec<String>,
}

impl ConfigValidation {
    /// A passing validation.
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// A failing validation with the given problems.
    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Uniform capability set every source adapter implements.
///
/// Adapters are cheap to construct; the registry builds a fresh instance
/// per lookup. Operations that need platform credentials decrypt them from
/// the config at call time.
#[async_trait]
pub trait SourceAdapter: Send + Sync + std::fmt::Debug {
    /// The source-type tag this adapter serves (e.g. `"chat_mention"`).
    fn source_type(&self) -> &str;

    /// Parse a raw webhook payload into a `ParsedDiscussion`.
    ///
    /// Total over the expected payload shape: any structural mismatch fails
    /// fast with an error naming the missing field.
    fn parse_incoming(&self, payload: &serde_json::Value) -> Result<ParsedDiscussion, AdapterError>;

    /// Fetch the full conversation snapshot for a thread.
    async fn fetch_thread(
        &self,
        thread_id: &str,
        config: &SourceConfig,
    ) -> Result<Thread, AdapterError>;

    /// Post a reply into the thread.
    ///
    /// Honours the config's `post_confirmation` policy flag: when false the
    /// adapter returns `Ok(false)` without calling the remote.
    async fn post_reply(
        &self,
        thread_id: &str,
        message: &str,
        config: &SourceConfig,
    ) -> Result<bool, AdapterError>;

    /// Translate the abstract status to the source's wire gesture.
    ///
    /// Prior status gestures are removed before the new one is set; the
    /// gesture carries the current status, not the history.
    async fn update_status(
        &self,
        thread_id: &str,
        status: DiscussionStatus,
        config: &SourceConfig,
    ) -> Result<bool, AdapterError>;

    /// Validate a config for this source. Never errors.
    fn validate_config(&self, config: &SourceConfig) -> ConfigValidation;

    /// Probe connectivity with the config's credentials. Never errors.
    async fn test_connection(&self, config: &SourceConfig) -> bool;
}
