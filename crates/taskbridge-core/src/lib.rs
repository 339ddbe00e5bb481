/// Core library for the taskbridge discussion-to-task sync service.
///
/// This crate contains all business logic: the source-adapter framework,
/// the resilience primitives, the outbound service clients, the storage
/// layer, and the processor pipeline driven by the HTTP server crate.
pub mod chat_api;
pub mod config;
pub mod crypto;
pub mod design_api;
pub mod error;
pub mod llm;
pub mod processor;
pub mod resilience;
pub mod source;
pub mod storage;
pub mod taskdb;

pub use error::*;

/// Returns the version of the taskbridge-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
