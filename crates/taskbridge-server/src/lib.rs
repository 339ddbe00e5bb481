//! Taskbridge HTTP ingress server.
//!
//! Exposes the webhook ingress endpoints and the internal processing
//! endpoint over taskbridge-core, with request tracing and CORS layers.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/webhook/{source}/events", post(routes::webhooks::receive))
        .route(
            "/internal/process-discussion",
            post(routes::process::process),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
