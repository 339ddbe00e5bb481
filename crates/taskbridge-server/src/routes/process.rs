//! Internal processing endpoint.
//!
//! Invoked same-origin by the ingress enqueue fallback and by admin
//! actions. Unlike the webhook path this endpoint runs the pipeline inline
//! and reports the outcome.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    /// The discussion to process.
    #[serde(default)]
    pub discussion_id: Option<String>,
    /// Run with the retry policy instead of a single attempt.
    #[serde(default)]
    pub retry: bool,
}

/// `POST /internal/process-discussion` — run the pipeline for one discussion.
pub async fn process(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(discussion_id) = body.discussion_id.filter(|id| !id.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "discussionId is required" })),
        );
    };

    let result = if body.retry {
        state.processor.process_with_retry(&discussion_id).await
    } else {
        state.processor.process(&discussion_id).await
    };

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "jobId": outcome.job_id,
                "discussionId": outcome.discussion_id,
                "pageIds": outcome.page_ids,
                "processingTime": outcome.processing_time_ms,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "discussionId": discussion_id,
                "error": e.to_string(),
            })),
        ),
    }
}
