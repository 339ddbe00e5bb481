//! Request and response types for the task-database client.

use serde::Deserialize;

use crate::llm::TaskPriority;

/// One task to be created as a page in the task database.
///
/// Assembled by the processor from the discussion, the thread, and any AI
/// enrichment. Optional fields are omitted from the page when the tenant's
/// field mapping has no target for them.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Task title (maps to the title property).
    pub title: String,
    /// Task description; becomes the page body's description block.
    pub description: String,
    /// Detected priority, when AI enrichment ran.
    pub priority: Option<TaskPriority>,
    /// Initial status label.
    pub status: Option<String>,
    /// Assignee handle.
    pub assignee: Option<String>,
    /// Due date (ISO-8601 date).
    pub due: Option<String>,
    /// Tag labels.
    pub tags: Vec<String>,
    /// Deep link back to the source discussion; also the duplicate key.
    pub source_url: Option<String>,
    /// AI-generated thread summary for the page body.
    pub ai_summary: Option<String>,
    /// Author handle for the metadata block.
    pub author: Option<String>,
    /// Participant handles for the metadata block.
    pub participants: Vec<String>,
}

impl TaskRecord {
    /// A minimal record with just a title and description.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority: None,
            status: None,
            assignee: None,
            due: None,
            tags: Vec::new(),
            source_url: None,
            ai_summary: None,
            author: None,
            participants: Vec::new(),
        }
    }
}

/// A created or queried page.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    /// Page id.
    pub id: String,
    /// Canonical page URL, when returned.
    #[serde(default)]
    pub url: Option<String>,
}

/// One page of database query results.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    /// Pages matching the query.
    #[serde(default)]
    pub results: Vec<Page>,
    /// Whether another page of results exists.
    #[serde(default)]
    pub has_more: bool,
    /// Cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Database metadata returned by retrieve.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseInfo {
    /// Database id.
    pub id: String,
}
