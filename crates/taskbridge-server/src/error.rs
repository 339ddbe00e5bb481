//! API error types for the taskbridge server.
//!
//! Maps core domain errors to HTTP status codes and JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type for route handlers.
pub enum ApiError {
    /// Internal storage/database error.
    Storage(taskbridge_core::error::StorageError),
    /// Signature verification failed or is unconfigured.
    Unauthorized(String),
    /// Requested resource not found (unknown source, no active config).
    NotFound(String),
    /// Bad request (malformed payload, missing fields).
    BadRequest(String),
    /// Any other internal failure.
    Internal(String),
}

impl From<taskbridge_core::error::StorageError> for ApiError {
    fn from(err: taskbridge_core::error::StorageError) -> Self {
        Self::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Storage(e) => {
                tracing::error!("storage error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = axum::Json(json!({ "ok": false, "error": message }));
        (status, body).into_response()
    }
}
