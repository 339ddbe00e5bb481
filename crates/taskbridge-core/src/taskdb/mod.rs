//! Typed client for the external task database.
//!
//! Wraps the task database's REST API (pages, database queries) in the
//! shared resilience stack. Page properties are assembled from the tenant's
//! field mapping; absent mappings omit the property entirely. Duplicate
//! detection caches both hits and misses per (database, source url).

pub mod blocks;
pub mod types;

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::error::TaskDbError;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitError, RateLimiter, TtlCache};
use crate::source::FieldMapping;

pub use types::{DatabaseInfo, Page, QueryResponse, TaskRecord};

/// Default task database API base URL.
const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";

/// API version header value.
const API_VERSION: &str = "2022-06-28";

const QUERY_PAGE_SIZE: u32 = 100;

const DUPLICATE_CACHE_CAPACITY: usize = 500;
const DUPLICATE_CACHE_TTL: Duration = Duration::from_secs(600);

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(400);
const RETRY_CAP: Duration = Duration::from_secs(8);

/// Client for the external task database.
pub struct TaskDbClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    // (database id, source url) -> page id when a duplicate exists.
    duplicate_cache: std::sync::Arc<TtlCache<(String, String), Option<String>>>,
}

impl TaskDbClient {
    /// Create a client from a decrypted integration token.
    ///
    /// Fails when the token is empty or an obvious placeholder.
    pub fn new(token: &str) -> Result<Self, TaskDbError> {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against a custom base URL (for testing).
    pub fn with_base_url(token: &str, base_url: String) -> Result<Self, TaskDbError> {
        if is_placeholder(token) {
            return Err(TaskDbError::InvalidCredential);
        }

        let duplicate_cache = std::sync::Arc::new(TtlCache::new(
            DUPLICATE_CACHE_CAPACITY,
            DUPLICATE_CACHE_TTL,
        ));
        TtlCache::start_sweeper(&duplicate_cache);

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: token.to_string(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            limiter: RateLimiter::new(3, 3.0),
            duplicate_cache,
        })
    }

    /// Create one page in the database, assembling properties from the
    /// field mapping and the body from the block builders.
    pub async fn create_task(
        &self,
        database_id: &str,
        record: &TaskRecord,
        mapping: &FieldMapping,
    ) -> Result<Page, TaskDbError> {
        let body = json!({
            "parent": {"database_id": database_id},
            "properties": build_properties(record, mapping),
            "children": build_children(record),
        });

        let response = self.post_guarded("/pages", &body).await?;
        serde_json::from_value(response).map_err(|e| TaskDbError::Api {
            status: 200,
            message: format!("unexpected create-page response: {e}"),
        })
    }

    /// Create several pages sequentially, spaced by the rate limiter.
    ///
    /// Fail-fast: the first failure aborts the batch; pages created before
    /// the failure are reported in the error.
    pub async fn create_tasks(
        &self,
        database_id: &str,
        records: &[TaskRecord],
        mapping: &FieldMapping,
    ) -> Result<Vec<String>, TaskDbError> {
        let mut created = Vec::with_capacity(records.len());
        for record in records {
            match self.create_task(database_id, record, mapping).await {
                Ok(page) => created.push(page.id),
                Err(e) => {
                    return Err(TaskDbError::PartialBatch {
                        created,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(created)
    }

    /// Update an existing page's properties.
    pub async fn update_page(
        &self,
        page_id: &str,
        properties: Value,
    ) -> Result<Page, TaskDbError> {
        let body = json!({"properties": properties});
        let response = self
            .send_guarded(reqwest::Method::PATCH, &format!("/pages/{page_id}"), Some(&body))
            .await?;
        serde_json::from_value(response).map_err(|e| TaskDbError::Api {
            status: 200,
            message: format!("unexpected update-page response: {e}"),
        })
    }

    /// Query the database with an optional filter and pagination cursor.
    pub async fn query_database(
        &self,
        database_id: &str,
        filter: Option<Value>,
        start_cursor: Option<&str>,
    ) -> Result<QueryResponse, TaskDbError> {
        let mut body = Map::new();
        body.insert("page_size".to_string(), json!(QUERY_PAGE_SIZE));
        if let Some(filter) = filter {
            body.insert("filter".to_string(), filter);
        }
        if let Some(cursor) = start_cursor {
            body.insert("start_cursor".to_string(), json!(cursor));
        }

        let response = self
            .post_guarded(&format!("/databases/{database_id}/query"), &Value::Object(body))
            .await?;
        serde_json::from_value(response).map_err(|e| TaskDbError::Api {
            status: 200,
            message: format!("unexpected query response: {e}"),
        })
    }

    /// Retrieve database metadata; backs adapter `test_connection`.
    pub async fn retrieve_database(&self, database_id: &str) -> Result<DatabaseInfo, TaskDbError> {
        let response = self
            .send_guarded(reqwest::Method::GET, &format!("/databases/{database_id}"), None)
            .await?;
        serde_json::from_value(response).map_err(|e| TaskDbError::Api {
            status: 200,
            message: format!("unexpected database response: {e}"),
        })
    }

    /// Find a page whose mapped source-url property equals `source_url`.
    ///
    /// Consults the duplicate cache first (both positive and negative
    /// entries), then paginates a filtered query.
    pub async fn find_duplicate_by_url(
        &self,
        database_id: &str,
        source_url: &str,
        mapping: &FieldMapping,
    ) -> Result<Option<String>, TaskDbError> {
        let key = (database_id.to_string(), source_url.to_string());
        if let Some(cached) = self.duplicate_cache.get(&key) {
            return Ok(cached);
        }

        let Some(url_field) = mapping.source_url.as_deref() else {
            // No mapped property to filter on; nothing can be a duplicate.
            self.duplicate_cache.set(key, None);
            return Ok(None);
        };

        let filter = json!({
            "property": url_field,
            "url": {"equals": source_url}
        });

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .query_database(database_id, Some(filter.clone()), cursor.as_deref())
                .await?;

            if let Some(hit) = page.results.first() {
                let id = hit.id.clone();
                self.duplicate_cache.set(key, Some(id.clone()));
                return Ok(Some(id));
            }
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
        }

        self.duplicate_cache.set(key, None);
        Ok(None)
    }

    async fn post_guarded(&self, path: &str, body: &Value) -> Result<Value, TaskDbError> {
        self.send_guarded(reqwest::Method::POST, path, Some(body)).await
    }

    async fn send_guarded(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TaskDbError> {
        crate::resilience::retry_with_backoff(
            || async {
                self.breaker
                    .call(|| async {
                        self.limiter.acquire().await;
                        self.send(method.clone(), path, body).await
                    })
                    .await
                    .map_err(|e| match e {
                        CircuitError::Open => {
                            TaskDbError::CircuitOpen("task DB unavailable".to_string())
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

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TaskDbError> {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .header("Notion-Version", API_VERSION);
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
            return Err(TaskDbError::Api { status, message });
        }

        response.json().await.map_err(TaskDbError::Request)
    }
}

/// Assemble the page properties object from the field mapping.
///
/// Absent mappings cause the corresponding property to be omitted, not set
/// to null. The title property always exists (the mapping defaults it).
fn build_properties(record: &TaskRecord, mapping: &FieldMapping) -> Value {
    let mut properties = Map::new();

    properties.insert(
        mapping.title_field().to_string(),
        json!({"title": [{"text": {"content": record.title}}]}),
    );

    if let (Some(field), Some(priority)) = (mapping.priority.as_deref(), record.priority) {
        properties.insert(
            field.to_string(),
            json!({"select": {"name": priority.as_str()}}),
        );
    }
    if let (Some(field), Some(status)) = (mapping.status.as_deref(), record.status.as_deref()) {
        properties.insert(field.to_string(), json!({"select": {"name": status}}));
    }
    if let (Some(field), Some(assignee)) = (mapping.assignee.as_deref(), record.assignee.as_deref())
    {
        properties.insert(
            field.to_string(),
            json!({"rich_text": [{"text": {"content": assignee}}]}),
        );
    }
    if let (Some(field), Some(due)) = (mapping.due.as_deref(), record.due.as_deref()) {
        properties.insert(field.to_string(), json!({"date": {"start": due}}));
    }
    if let Some(field) = mapping.tags.as_deref() {
        if !record.tags.is_empty() {
            let options: Vec<Value> = record.tags.iter().map(|t| json!({"name": t})).collect();
            properties.insert(field.to_string(), json!({"multi_select": options}));
        }
    }
    if let (Some(field), Some(url)) = (mapping.source_url.as_deref(), record.source_url.as_deref())
    {
        properties.insert(field.to_string(), json!({"url": url}));
    }

    Value::Object(properties)
}

/// Compose the page body from the block builders, in fixed order.
fn build_children(record: &TaskRecord) -> Vec<Value> {
    let mut children = Vec::new();

    if let Some(summary) = record.ai_summary.as_deref() {
        children.extend(blocks::ai_summary_blocks(summary));
        children.push(blocks::divider());
    }
    children.extend(blocks::description_blocks(&record.description));

    let metadata = blocks::metadata_blocks(record.author.as_deref(), &record.participants);
    if !metadata.is_empty() {
        children.push(blocks::divider());
        children.extend(metadata);
    }
    if let Some(url) = record.source_url.as_deref() {
        children.push(blocks::divider());
        children.extend(blocks::source_link_blocks(url));
    }

    children
}

/// Whether a credential is unusable (empty or an obvious placeholder).
fn is_placeholder(credential: &str) -> bool {
    let trimmed = credential.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("changeme")
        || trimmed.eq_ignore_ascii_case("placeholder")
        || trimmed.starts_with("your-")
}

#[derive(serde::Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub(crate) message: String,
}
