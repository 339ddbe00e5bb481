//! Environment configuration for the service.
//!
//! All secrets and platform credentials arrive through environment
//! variables. Absence of a variable is not a startup failure; each accessor
//! returns a `ConfigError::MissingKey` naming the variable when the value is
//! first needed and absent.

use std::env;

use crate::error::ConfigError;

/// Environment variable holding the process-wide master encryption key.
pub const ENV_MASTER_KEY: &str = "TASKBRIDGE_MASTER_KEY";
/// Environment variable holding the LLM API key.
pub const ENV_LLM_API_KEY: &str = "TASKBRIDGE_LLM_API_KEY";
/// Environment variable holding the task-database API key.
pub const ENV_TASKDB_API_KEY: &str = "TASKBRIDGE_TASKDB_API_KEY";
/// Environment variable holding the chat-platform client id.
pub const ENV_CHAT_CLIENT_ID: &str = "TASKBRIDGE_CHAT_CLIENT_ID";
/// Environment variable holding the chat-platform client secret.
pub const ENV_CHAT_CLIENT_SECRET: &str = "TASKBRIDGE_CHAT_CLIENT_SECRET";
/// Environment variable holding the chat-platform webhook signing secret.
pub const ENV_CHAT_SIGNING_SECRET: &str = "TASKBRIDGE_CHAT_SIGNING_SECRET";
/// Environment variable holding the email-provider webhook secret.
pub const ENV_EMAIL_WEBHOOK_SECRET: &str = "TASKBRIDGE_EMAIL_WEBHOOK_SECRET";
/// Environment variable holding the email-provider inbound domain.
pub const ENV_EMAIL_DOMAIN: &str = "TASKBRIDGE_EMAIL_DOMAIN";
/// Environment variable holding the design-platform API key.
pub const ENV_DESIGN_API_KEY: &str = "TASKBRIDGE_DESIGN_API_KEY";
/// Environment variable enabling development mode (skips signature
/// verification when no signing secret is configured).
pub const ENV_DEV_MODE: &str = "TASKBRIDGE_DEV_MODE";

/// Resolved environment configuration.
///
/// Every field is optional at load time; accessors surface a clear error
/// when a missing value is actually needed.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Master key used to derive per-secret encryption keys.
    pub master_key: Option<String>,
    /// LLM API key (fallback when a config carries no tenant key).
    pub llm_api_key: Option<String>,
    /// Task-database API key (fallback when a config carries no tenant key).
    pub taskdb_api_key: Option<String>,
    /// Chat-platform OAuth client id.
    pub chat_client_id: Option<String>,
    /// Chat-platform OAuth client secret.
    pub chat_client_secret: Option<String>,
    /// Chat-platform webhook signing secret.
    pub chat_signing_secret: Option<String>,
    /// Email-provider webhook signing secret.
    pub email_webhook_secret: Option<String>,
    /// Email-provider inbound domain (e.g. `inbound.example.com`).
    pub email_domain: Option<String>,
    /// Design-platform API key.
    pub design_api_key: Option<String>,
    /// Development mode: disables signature verification for sources with
    /// no configured signing secret.
    pub dev_mode: bool,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            master_key: read(ENV_MASTER_KEY),
            llm_api_key: read(ENV_LLM_API_KEY),
            taskdb_api_key: read(ENV_TASKDB_API_KEY),
            chat_client_id: read(ENV_CHAT_CLIENT_ID),
            chat_client_secret: read(ENV_CHAT_CLIENT_SECRET),
            chat_signing_secret: read(ENV_CHAT_SIGNING_SECRET),
            email_webhook_secret: read(ENV_EMAIL_WEBHOOK_SECRET),
            email_domain: read(ENV_EMAIL_DOMAIN),
            design_api_key: read(ENV_DESIGN_API_KEY),
            dev_mode: env::var(ENV_DEV_MODE)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// The master encryption key, required for any credential operation.
    pub fn master_key(&self) -> Result<&str, ConfigError> {
        require(self.master_key.as_deref(), ENV_MASTER_KEY)
    }

    /// The chat-platform signing secret, required unless `dev_mode` is set.
    pub fn chat_signing_secret(&self) -> Result<&str, ConfigError> {
        require(self.chat_signing_secret.as_deref(), ENV_CHAT_SIGNING_SECRET)
    }

    /// The email-provider webhook secret, required unless `dev_mode` is set.
    pub fn email_webhook_secret(&self) -> Result<&str, ConfigError> {
        require(self.email_webhook_secret.as_deref(), ENV_EMAIL_WEBHOOK_SECRET)
    }
}

/// Read a variable, treating empty values as absent.
fn read(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingKey {
        name: name.to_string(),
    })
}
