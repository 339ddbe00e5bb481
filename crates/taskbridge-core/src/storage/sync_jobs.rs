//! CRUD operations for sync job records.
//!
//! One row per processing attempt. Status is monotone
//! (processing → completed | failed) and `stage` only advances while the
//! job is processing; terminal rows are preserved for audit.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A running or finished processing attempt.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SyncJob {
    /// Unique id (UUID v4).
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning user within the tenant, empty when unattributed.
    pub owner: String,
    /// The discussion being processed.
    pub discussion_id: String,
    /// The source config resolved for the run.
    pub source_config_id: String,
    /// pending, processing, completed, or failed.
    pub status: String,
    /// Current pipeline stage.
    pub stage: String,
    /// 1-based attempt number within a retry series.
    pub attempt: i64,
    /// Attempt ceiling for the retry series.
    pub max_attempts: i64,
    /// Error message for failed jobs.
    pub error_message: Option<String>,
    /// Error chain/backtrace text for failed jobs.
    pub error_stack: Option<String>,
    /// ISO-8601 UTC start timestamp.
    pub started_at: Option<String>,
    /// ISO-8601 UTC completion timestamp.
    pub completed_at: Option<String>,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: Option<i64>,
    /// JSON array of created task page ids, in creation order.
    pub task_ids: String,
    /// Free-form metadata (JSON object).
    pub metadata: String,
    /// ISO-8601 UTC creation timestamp.
    pub created_at: String,
    /// ISO-8601 UTC last-update timestamp.
    pub updated_at: String,
}

impl SyncJob {
    /// Parse the created-task id list.
    pub fn task_id_list(&self) -> Vec<String> {
        serde_json::from_str(&self.task_ids).unwrap_or_default()
    }
}

/// Insert a job at the start of a processing attempt.
///
/// The row begins with status `processing`, stage `pending`, and
/// `started_at` set.
pub async fn insert_sync_job(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    owner: &str,
    discussion_id: &str,
    source_config_id: &str,
    attempt: u32,
    max_attempts: u32,
) -> Result<(), StorageError> {
    let now = now_iso();
    sqlx::query(
        "INSERT INTO sync_jobs \
         (id, tenant_id, owner, discussion_id, source_config_id, status, stage, attempt, \
          max_attempts, started_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 'processing', 'pending', ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(owner)
    .bind(discussion_id)
    .bind(source_config_id)
    .bind(i64::from(attempt))
    .bind(i64::from(max_attempts))
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Fetch a job by id.
pub async fn get_sync_job(pool: &DbPool, id: &str) -> Result<Option<SyncJob>, StorageError> {
    sqlx::query_as("SELECT * FROM sync_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// All jobs for a discussion, oldest first.
pub async fn list_jobs_for_discussion(
    pool: &DbPool,
    discussion_id: &str,
) -> Result<Vec<SyncJob>, StorageError> {
    sqlx::query_as("SELECT * FROM sync_jobs WHERE discussion_id = ? ORDER BY created_at ASC, id ASC")
        .bind(discussion_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Advance the job to a new stage.
pub async fn update_stage(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    stage: &str,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "UPDATE sync_jobs SET stage = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
    )
    .bind(stage)
    .bind(now_iso())
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    ensure_found(result.rows_affected(), id)
}

/// Mark the job completed, recording created task ids and timings.
pub async fn complete_job(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    task_ids_json: &str,
    processing_time_ms: i64,
) -> Result<(), StorageError> {
    let now = now_iso();
    let result = sqlx::query(
        "UPDATE sync_jobs \
         SET status = 'completed', stage = 'completed', task_ids = ?, completed_at = ?, \
             processing_time_ms = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ?",
    )
    .bind(task_ids_json)
    .bind(&now)
    .bind(processing_time_ms)
    .bind(&now)
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    ensure_found(result.rows_affected(), id)
}

/// Mark the job failed, capturing the error message and chain.
pub async fn fail_job(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    error_message: &str,
    error_stack: Option<&str>,
    processing_time_ms: i64,
) -> Result<(), StorageError> {
    let now = now_iso();
    let result = sqlx::query(
        "UPDATE sync_jobs \
         SET status = 'failed', error_message = ?, error_stack = ?, completed_at = ?, \
             processing_time_ms = ?, updated_at = ? \
         WHERE id = ? AND tenant_id = ?",
    )
    .bind(error_message)
    .bind(error_stack)
    .bind(&now)
    .bind(processing_time_ms)
    .bind(&now)
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    ensure_found(result.rows_affected(), id)
}

fn ensure_found(rows: u64, id: &str) -> Result<(), StorageError> {
    if rows == 0 {
        return Err(StorageError::NotFound {
            entity: "sync job",
            id: id.to_string(),
        });
    }
    Ok(())
}
