//! CRUD operations for discussion records.
//!
//! A discussion is the canonical persisted record of one ingested event.
//! Created by webhook ingress; status mutated only by the processor.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// The canonical record of an ingested conversational event.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Discussion {
    /// Unique id (UUID v4).
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning user within the tenant, empty when unattributed.
    pub owner: String,
    /// Source-type tag (`chat_mention`, `comment_email`).
    pub source_type: String,
    /// Source-side thread id; replies aggregate to the root.
    pub source_thread_id: String,
    /// Deep link to the source conversation.
    pub source_url: Option<String>,
    /// The source config this discussion was matched against.
    pub source_config_id: String,
    /// Short title derived from the message.
    pub title: String,
    /// The author's original message.
    pub content: String,
    /// Author handle on the source platform.
    pub author: String,
    /// JSON array of participant handles, ordered, duplicates removed.
    pub participants: String,
    /// pending, processing, completed, or failed.
    pub status: String,
    /// Thread snapshot JSON, set after thread building.
    pub thread_json: Option<String>,
    /// Most recent sync job id.
    pub job_id: Option<String>,
    /// Opaque raw webhook payload.
    pub raw_payload: String,
    /// Free-form metadata map (JSON object).
    pub metadata: String,
    /// Set when a job completes successfully, NULL otherwise.
    pub processed_at: Option<String>,
    /// ISO-8601 UTC creation timestamp.
    pub created_at: String,
    /// ISO-8601 UTC last-update timestamp.
    pub updated_at: String,
}

/// Fields required to insert a new discussion; everything else defaults.
#[derive(Debug, Clone)]
pub struct NewDiscussion {
    pub id: String,
    pub tenant_id: String,
    pub owner: String,
    pub source_type: String,
    pub source_thread_id: String,
    pub source_url: Option<String>,
    pub source_config_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    /// JSON array of handles.
    pub participants: String,
    /// Opaque raw webhook payload (JSON).
    pub raw_payload: String,
    /// Adapter-supplied metadata (JSON object).
    pub metadata: String,
}

/// Insert a new discussion with status `pending`.
pub async fn insert_discussion(pool: &DbPool, new: &NewDiscussion) -> Result<(), StorageError> {
    let now = now_iso();
    sqlx::query(
        "INSERT INTO discussions \
         (id, tenant_id, owner, source_type, source_thread_id, source_url, source_config_id, \
          title, content, author, participants, status, raw_payload, metadata, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?)",
    )
    .bind(&new.id)
    .bind(&new.tenant_id)
    .bind(&new.owner)
    .bind(&new.source_type)
    .bind(&new.source_thread_id)
    .bind(&new.source_url)
    .bind(&new.source_config_id)
    .bind(&new.title)
    .bind(&new.content)
    .bind(&new.author)
    .bind(&new.participants)
    .bind(&new.raw_payload)
    .bind(&new.metadata)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Fetch a discussion by id.
pub async fn get_discussion(pool: &DbPool, id: &str) -> Result<Option<Discussion>, StorageError> {
    sqlx::query_as("SELECT * FROM discussions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Find the discussion for a logical source event, if one was already
/// persisted. This is the dedupe check backing at-most-once persistence.
pub async fn find_by_source_thread(
    pool: &DbPool,
    tenant_id: &str,
    source_type: &str,
    source_thread_id: &str,
) -> Result<Option<Discussion>, StorageError> {
    sqlx::query_as(
        "SELECT * FROM discussions \
         WHERE tenant_id = ? AND source_type = ? AND source_thread_id = ? \
         LIMIT 1",
    )
    .bind(tenant_id)
    .bind(source_type)
    .bind(source_thread_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Update a discussion's status, scoped to its tenant.
pub async fn update_status(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    status: &str,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "UPDATE discussions SET status = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
    )
    .bind(status)
    .bind(now_iso())
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    ensure_found(result.rows_affected(), "discussion", id)
}

/// Store the thread snapshot captured during thread building.
pub async fn set_thread_json(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    thread_json: &str,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "UPDATE discussions SET thread_json = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
    )
    .bind(thread_json)
    .bind(now_iso())
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    ensure_found(result.rows_affected(), "discussion", id)
}

/// Point the discussion at its most recent sync job.
pub async fn set_job_id(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    job_id: &str,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "UPDATE discussions SET job_id = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
    )
    .bind(job_id)
    .bind(now_iso())
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    ensure_found(result.rows_affected(), "discussion", id)
}

/// Stamp `processed_at`; called only on successful job completion.
pub async fn mark_processed(pool: &DbPool, id: &str, tenant_id: &str) -> Result<(), StorageError> {
    let now = now_iso();
    let result = sqlx::query(
        "UPDATE discussions SET processed_at = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
    )
    .bind(&now)
    .bind(&now)
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    ensure_found(result.rows_affected(), "discussion", id)
}

fn ensure_found(rows: u64, entity: &'static str, id: &str) -> Result<(), StorageError> {
    if rows == 0 {
        return Err(StorageError::NotFound {
            entity,
            id: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    pub(crate) fn sample(id: &str, tenant: &str) -> NewDiscussion {
        NewDiscussion {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            owner: "owner-1".to_string(),
            source_type: "chat_mention".to_string(),
            source_thread_id: "1700000000.000100".to_string(),
            source_url: Some("https://chat.example.com/archives/C1/p1".to_string()),
            source_config_id: "cfg-1".to_string(),
            title: "fix login".to_string(),
            content: "fix login".to_string(),
            author: "U1".to_string(),
            participants: "[\"U1\"]".to_string(),
            raw_payload: "{}".to_string(),
            metadata: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let pool = init_test_db().await.unwrap();
        insert_discussion(&pool, &sample("d1", "acme")).await.unwrap();

        let row = get_discussion(&pool, "d1").await.unwrap().unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.tenant_id, "acme");
        assert!(row.processed_at.is_none());
    }

    #[tokio::test]
    async fn dedupe_lookup_finds_the_row() {
        let pool = init_test_db().await.unwrap();
        insert_discussion(&pool, &sample("d1", "acme")).await.unwrap();

        let hit = find_by_source_thread(&pool, "acme", "chat_mention", "1700000000.000100")
            .await
            .unwrap();
        assert!(hit.is_some());

        let miss = find_by_source_thread(&pool, "other", "chat_mention", "1700000000.000100")
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn status_update_is_tenant_scoped() {
        let pool = init_test_db().await.unwrap();
        insert_discussion(&pool, &sample("d1", "acme")).await.unwrap();

        let err = update_status(&pool, "d1", "intruder", "completed")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));

        update_status(&pool, "d1", "acme", "completed").await.unwrap();
        let row = get_discussion(&pool, "d1").await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
    }

    #[tokio::test]
    async fn mark_processed_sets_the_timestamp() {
        let pool = init_test_db().await.unwrap();
        insert_discussion(&pool, &sample("d1", "acme")).await.unwrap();

        mark_processed(&pool, "d1", "acme").await.unwrap();
        let row = get_discussion(&pool, "d1").await.unwrap().unwrap();
        assert!(row.processed_at.is_some());
    }
}
