//! Dedupe ledger for platform-supplied webhook event ids.
//!
//! Chat platforms redeliver events; the ledger's unique constraint on
//! (tenant, source type, event id) makes recording idempotent and tells the
//! ingress handler whether it has seen an event before.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// Record an event id. Returns `true` when the event is new, `false` when
/// it was already recorded (a redelivery).
pub async fn record_event(
    pool: &DbPool,
    tenant_id: &str,
    source_type: &str,
    event_id: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO webhook_events (tenant_id, source_type, event_id, received_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(tenant_id)
    .bind(source_type)
    .bind(event_id)
    .bind(now_iso())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(result.rows_affected() == 1)
}
