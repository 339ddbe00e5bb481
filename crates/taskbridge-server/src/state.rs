//! Shared application state for the taskbridge server.

use std::sync::Arc;

use taskbridge_core::config::Settings;
use taskbridge_core::processor::Processor;
use taskbridge_core::source::registry::AdapterRegistry;
use taskbridge_core::storage::DbPool;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// SQLite connection pool.
    pub db: DbPool,
    /// Environment configuration (signing secrets, dev-mode flag).
    pub settings: Settings,
    /// Adapter registry, populated once at startup and read-only after.
    pub registry: Arc<AdapterRegistry>,
    /// The discussion processor driven by webhook ingress and the internal
    /// processing endpoint.
    pub processor: Arc<Processor>,
}
