//! Error types for the taskbridge core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors related to environment configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is absent at the point of first use.
    #[error("missing required environment variable: {name}")]
    MissingKey {
        /// The name of the missing variable.
        name: String,
    },

    /// A configuration value has an unacceptable shape.
    #[error("invalid value for {name}: {message}")]
    InvalidValue {
        /// The name of the invalid variable.
        name: String,
        /// A description of why the value is invalid.
        message: String,
    },
}

/// Errors from credential encryption and webhook signature verification.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The master key is empty or otherwise unusable.
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    /// A stored value does not match the `salt:iv:tag:ciphertext` format.
    #[error("malformed encrypted value: {0}")]
    Malformed(String),

    /// Key derivation via scrypt failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// AES-GCM encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// AES-GCM decryption failed (wrong key or tampered ciphertext).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Webhook signature did not match or the timestamp fell outside the
    /// replay window.
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// A row update matched nothing for the given (id, tenant) pair.
    #[error("{entity} not found for this tenant: {id}")]
    NotFound {
        /// The entity kind (discussion, source config, sync job).
        entity: &'static str,
        /// The id that was requested.
        id: String,
    },
}

/// Errors from the LLM enrichment client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP request to the LLM endpoint failed.
    #[error("LLM HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// LLM API returned an error response.
    #[error("LLM API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// The client was constructed with an empty or placeholder key.
    #[error("LLM API key is empty or a placeholder")]
    InvalidCredential,

    /// The resilience stack rejected the call (circuit open).
    #[error("LLM circuit open: {0}")]
    CircuitOpen(String),
}

/// Errors from the external task-database client.
#[derive(Debug, thiserror::Error)]
pub enum TaskDbError {
    /// HTTP request failed.
    #[error("task DB HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The task database returned an error response.
    #[error("task DB error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// The client was constructed with an empty or placeholder token.
    #[error("task DB token is empty or a placeholder")]
    InvalidCredential,

    /// Batch creation failed part-way through.
    #[error("batch task creation failed after {created:?}: {message}")]
    PartialBatch {
        /// Page ids created before the failure, in order.
        created: Vec<String>,
        /// The underlying failure.
        message: String,
    },

    /// The resilience stack rejected the call (circuit open).
    #[error("task DB circuit open: {0}")]
    CircuitOpen(String),
}

/// Errors from the chat-platform client.
#[derive(Debug, thiserror::Error)]
pub enum ChatApiError {
    /// HTTP request failed.
    #[error("chat API HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The platform reported `ok=false`.
    #[error("chat API error: {0}")]
    Platform(String),

    /// The client was constructed with an empty or placeholder token.
    #[error("chat API token is empty or a placeholder")]
    InvalidCredential,

    /// The resilience stack rejected the call (circuit open).
    #[error("chat API circuit open: {0}")]
    CircuitOpen(String),
}

/// Errors from the design-platform client.
#[derive(Debug, thiserror::Error)]
pub enum DesignApiError {
    /// HTTP request failed.
    #[error("design API HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The design platform returned an error response.
    #[error("design API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// The client was constructed with an empty or placeholder token.
    #[error("design API token is empty or a placeholder")]
    InvalidCredential,

    /// A comment referenced by id does not exist in the file.
    #[error("comment not found: {0}")]
    CommentNotFound(String),

    /// The resilience stack rejected the call (circuit open).
    #[error("design API circuit open: {0}")]
    CircuitOpen(String),
}

/// Errors from the discussion processor pipeline.
///
/// Every variant is terminal for the pipeline run that raised it; recoverable
/// conditions (LLM failure, notification failure) are handled inside the
/// stages and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The discussion id does not exist.
    #[error("discussion not found: {0}")]
    DiscussionNotFound(String),

    /// The source config referenced by the discussion does not exist.
    #[error("source config not found: {0}")]
    ConfigNotFound(String),

    /// The source config belongs to a different tenant than the discussion.
    #[error("source config {config_id} does not belong to tenant {tenant_id}")]
    ConfigTenantMismatch {
        /// The config that was loaded.
        config_id: String,
        /// The discussion's tenant.
        tenant_id: String,
    },

    /// The source config is disabled.
    #[error("source config {0} is not active")]
    ConfigInactive(String),

    /// Building the thread via the adapter failed.
    #[error("thread building failed: {0}")]
    ThreadBuild(String),

    /// Creating tasks in the external task database failed.
    #[error("task creation failed: {0}")]
    TaskCreation(String),

    /// Storage failure while updating discussion or job rows.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// All retry attempts were exhausted.
    #[error("processing failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's error message.
        last_error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_key_message() {
        let err = ConfigError::MissingKey {
            name: "TASKBRIDGE_MASTER_KEY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing required environment variable: TASKBRIDGE_MASTER_KEY"
        );
    }

    #[test]
    fn crypto_error_malformed_message() {
        let err = CryptoError::Malformed("expected 4 colon-separated fields".to_string());
        assert_eq!(
            err.to_string(),
            "malformed encrypted value: expected 4 colon-separated fields"
        );
    }

    #[test]
    fn storage_error_not_found_message() {
        let err = StorageError::NotFound {
            entity: "discussion",
            id: "d-123".to_string(),
        };
        assert_eq!(err.to_string(), "discussion not found for this tenant: d-123");
    }

    #[test]
    fn llm_error_api_message() {
        let err = LlmError::Api {
            status: 401,
            message: "invalid x-api-key".to_string(),
        };
        assert_eq!(err.to_string(), "LLM API error (status 401): invalid x-api-key");
    }

    #[test]
    fn task_db_partial_batch_message() {
        let err = TaskDbError::PartialBatch {
            created: vec!["p1".to_string()],
            message: "rate limited".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "batch task creation failed after [\"p1\"]: rate limited"
        );
    }

    #[test]
    fn processor_error_tenant_mismatch_message() {
        let err = ProcessorError::ConfigTenantMismatch {
            config_id: "cfg-1".to_string(),
            tenant_id: "acme".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "source config cfg-1 does not belong to tenant acme"
        );
    }

    #[test]
    fn chat_api_platform_error_message() {
        let err = ChatApiError::Platform("channel_not_found".to_string());
        assert_eq!(err.to_string(), "chat API error: channel_not_found");
    }
}
