//! Taskbridge ingress server binary.
//!
//! Starts the HTTP server that receives collaboration-platform webhooks and
//! drives the discussion processor.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskbridge_core::config::Settings;
use taskbridge_core::processor::Processor;
use taskbridge_core::source::registry::AdapterRegistry;
use taskbridge_core::storage;

use taskbridge_server::build_router;
use taskbridge_server::state::AppState;

/// Taskbridge ingress server — receives webhooks, creates tasks.
#[derive(Parser)]
#[command(name = "taskbridge-server", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value = "3002")]
    port: u16,

    /// Host address to bind to. Use 0.0.0.0 for external access.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "taskbridge.db")]
    db: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    if settings.dev_mode {
        tracing::warn!("dev mode enabled: unsigned webhooks are accepted for unconfigured sources");
    }

    let db = storage::init_db(&cli.db).await?;
    let registry = Arc::new(AdapterRegistry::with_defaults(settings.clone()));
    let processor = Arc::new(Processor::new(
        db.clone(),
        settings.clone(),
        registry.clone(),
    ));

    let state = Arc::new(AppState {
        db,
        settings,
        registry,
        processor,
    });

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, version = taskbridge_core::version(), "taskbridge listening");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
