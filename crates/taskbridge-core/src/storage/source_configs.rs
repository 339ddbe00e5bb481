//! CRUD operations for per-tenant source configurations.
//!
//! A source config carries one tenant's credentials and policy for one
//! source. Credential columns hold the encrypted at-rest format; nothing in
//! this module decrypts them.

use std::collections::BTreeMap;

use super::{now_iso, DbPool};
use crate::error::StorageError;
use crate::source::FieldMapping;

/// Per-tenant credentials and policy for one source.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SourceConfig {
    /// Unique id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Source-type tag this config applies to.
    pub source_type: String,
    /// Human-readable name shown in admin tooling.
    pub display_name: String,
    /// Encrypted source-platform API token.
    pub api_token: Option<String>,
    /// Encrypted task-database token.
    pub taskdb_token: Option<String>,
    /// Target database identifier in the task DB.
    pub taskdb_database_id: Option<String>,
    /// Field-mapping JSON (see `FieldMapping`).
    pub field_mapping: String,
    /// Encrypted LLM API key.
    pub llm_key: Option<String>,
    /// Whether AI enrichment runs for this source.
    pub ai_enabled: bool,
    /// Whether ingested events are processed automatically.
    pub auto_sync: bool,
    /// Whether a confirmation reply is posted after task creation.
    pub post_confirmation: bool,
    /// Inactive configs are never selected for processing.
    pub active: bool,
    /// Source-type-specific metadata JSON (workspace id, file key).
    pub metadata: String,
    /// ISO-8601 UTC creation timestamp.
    pub created_at: String,
    /// ISO-8601 UTC last-update timestamp.
    pub updated_at: String,
}

impl SourceConfig {
    /// Parse the field-mapping column; malformed JSON yields the defaults.
    pub fn field_mapping(&self) -> FieldMapping {
        serde_json::from_str(&self.field_mapping).unwrap_or_default()
    }

    /// Parse the metadata column into a string map.
    pub fn metadata_map(&self) -> BTreeMap<String, String> {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }

    /// One metadata value by key.
    pub fn metadata_value(&self, key: &str) -> Option<String> {
        self.metadata_map().get(key).cloned()
    }
}

/// Insert a source config row.
pub async fn insert_source_config(pool: &DbPool, config: &SourceConfig) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO source_configs \
         (id, tenant_id, source_type, display_name, api_token, taskdb_token, taskdb_database_id, \
          field_mapping, llm_key, ai_enabled, auto_sync, post_confirmation, active, metadata, \
          created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&config.id)
    .bind(&config.tenant_id)
    .bind(&config.source_type)
    .bind(&config.display_name)
    .bind(&config.api_token)
    .bind(&config.taskdb_token)
    .bind(&config.taskdb_database_id)
    .bind(&config.field_mapping)
    .bind(&config.llm_key)
    .bind(config.ai_enabled)
    .bind(config.auto_sync)
    .bind(config.post_confirmation)
    .bind(config.active)
    .bind(&config.metadata)
    .bind(&config.created_at)
    .bind(&config.updated_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Fetch a source config by id.
pub async fn get_source_config(
    pool: &DbPool,
    id: &str,
) -> Result<Option<SourceConfig>, StorageError> {
    sqlx::query_as("SELECT * FROM source_configs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Find the first active config matching a tenant identifier and source
/// type. Inactive configs are never returned.
pub async fn find_first_active(
    pool: &DbPool,
    tenant_id: &str,
    source_type: &str,
) -> Result<Option<SourceConfig>, StorageError> {
    sqlx::query_as(
        "SELECT * FROM source_configs \
         WHERE tenant_id = ? AND source_type = ? AND active = 1 \
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(tenant_id)
    .bind(source_type)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Resolve the first active config for a parsed tenant identifier.
///
/// The hint is either the tenant id itself (email recipient slug) or a
/// source-side workspace id recorded in the config's metadata (chat
/// `team_id`). Inactive configs are never returned.
pub async fn resolve_active(
    pool: &DbPool,
    source_type: &str,
    tenant_hint: &str,
) -> Result<Option<SourceConfig>, StorageError> {
    sqlx::query_as(
        "SELECT * FROM source_configs \
         WHERE source_type = ? AND active = 1 \
           AND (tenant_id = ? OR json_extract(metadata, '$.workspace_id') = ?) \
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(source_type)
    .bind(tenant_hint)
    .bind(tenant_hint)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Enable or disable a config, scoped to its tenant.
pub async fn set_active(
    pool: &DbPool,
    id: &str,
    tenant_id: &str,
    active: bool,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "UPDATE source_configs SET active = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
    )
    .bind(active)
    .bind(now_iso())
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound {
            entity: "source config",
            id: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config(id: &str, tenant: &str, source_type: &str) -> SourceConfig {
    let now = now_iso();
    SourceConfig {
        id: id.to_string(),
        tenant_id: tenant.to_string(),
        source_type: source_type.to_string(),
        display_name: "test config".to_string(),
        api_token: None,
        taskdb_token: None,
        taskdb_database_id: Some("db-1".to_string()),
        field_mapping: "{}".to_string(),
        llm_key: None,
        ai_enabled: false,
        auto_sync: true,
        post_confirmation: true,
        active: true,
        metadata: "{}".to_string(),
        created_at: now.clone(),
        updated_at: now,
    }
}
