//! Webhook ingress: verify, dedupe, persist, enqueue.
//!
//! `POST /webhook/{source}/events` receives the raw body so the signature
//! can be verified over the exact bytes the platform signed. After
//! verification the selected adapter parses the payload, duplicates are
//! answered without re-enqueueing, a discussion row is persisted, and the
//! processor is invoked fire-and-forget; the handler returns as soon as the
//! row is durable.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use taskbridge_core::crypto;
use taskbridge_core::source::{chat_mention, comment_email, AdapterError};
use taskbridge_core::storage::discussions::{self, NewDiscussion};
use taskbridge_core::storage::{source_configs, webhook_events};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the signing timestamp on chat-platform deliveries.
pub const HEADER_TIMESTAMP: &str = "x-request-timestamp";
/// Header carrying the signature on chat-platform deliveries.
pub const HEADER_SIGNATURE: &str = "x-request-signature";

/// `POST /webhook/{source}/events` — source-specific webhook ingress.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Unknown sources 404 before any body inspection.
    if state.registry.get(&source).is_err() {
        return Err(ApiError::NotFound(format!("unknown source '{source}'")));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;

    verify_signature(&state, &source, &headers, &body, &payload)?;

    // URL-verification challenges are answered inline; nothing persists.
    if payload["type"] == "url_verification" {
        let challenge = payload["challenge"].as_str().unwrap_or_default();
        return Ok(Json(json!({ "ok": true, "challenge": challenge })));
    }

    let adapter = state
        .registry
        .get(&source)
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    let parsed = match adapter.parse_incoming(&payload) {
        Ok(parsed) => parsed,
        Err(AdapterError::Ignored(reason)) => {
            tracing::debug!(%source, %reason, "payload ignored");
            return Ok(Json(json!({ "ok": true, "ignored": true })));
        }
        Err(e) => return Err(ApiError::BadRequest(e.to_string())),
    };

    // Platform-supplied event ids dedupe redeliveries before anything else.
    if let Some(event_id) = parsed.metadata.get("event_id") {
        let fresh =
            webhook_events::record_event(&state.db, &parsed.tenant_hint, &source, event_id).await?;
        if !fresh {
            tracing::debug!(%source, %event_id, "duplicate event delivery");
            return Ok(Json(json!({ "ok": true, "duplicate": true })));
        }
    }

    // Tenant and config resolution; inactive configs never match.
    let config = source_configs::resolve_active(&state.db, &source, &parsed.tenant_hint)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "no active source config for tenant '{}'",
                parsed.tenant_hint
            ))
        })?;

    // One discussion per logical source event.
    if let Some(existing) = discussions::find_by_source_thread(
        &state.db,
        &config.tenant_id,
        &source,
        &parsed.source_thread_id,
    )
    .await?
    {
        return Ok(Json(json!({
            "ok": true,
            "duplicate": true,
            "discussionId": existing.id,
        })));
    }

    let discussion_id = uuid::Uuid::new_v4().to_string();
    let new = NewDiscussion {
        id: discussion_id.clone(),
        tenant_id: config.tenant_id.clone(),
        owner: String::new(),
        source_type: parsed.source_type.clone(),
        source_thread_id: parsed.source_thread_id.clone(),
        source_url: parsed.source_url.clone(),
        source_config_id: config.id.clone(),
        title: parsed.title.clone(),
        content: parsed.content.clone(),
        author: parsed.author.clone(),
        participants: serde_json::to_string(&parsed.participants)
            .unwrap_or_else(|_| "[]".to_string()),
        raw_payload: String::from_utf8_lossy(&body).into_owned(),
        metadata: serde_json::to_string(&parsed.metadata).unwrap_or_else(|_| "{}".to_string()),
    };
    discussions::insert_discussion(&state.db, &new).await?;

    tracing::info!(
        %source,
        %discussion_id,
        tenant_id = %config.tenant_id,
        "discussion persisted"
    );

    // Fire-and-forget: the 200 does not depend on the processor run, and
    // enqueue failures are logged only.
    let processor = state.processor.clone();
    let spawned_id = discussion_id.clone();
    tokio::spawn(async move {
        if let Err(e) = processor.process(&spawned_id).await {
            tracing::error!(discussion_id = %spawned_id, error = %e, "async processing failed");
        }
    });

    Ok(Json(json!({ "ok": true, "discussionId": discussion_id })))
}

/// Verify the source-specific signature scheme over the raw request.
///
/// A missing signing secret disables verification only in dev mode.
fn verify_signature(
    state: &AppState,
    source: &str,
    headers: &HeaderMap,
    body: &[u8],
    payload: &serde_json::Value,
) -> Result<(), ApiError> {
    match source {
        chat_mention::SOURCE_TYPE => {
            let secret = match state.settings.chat_signing_secret.as_deref() {
                Some(secret) => secret,
                None if state.settings.dev_mode => {
                    tracing::warn!("dev mode: chat signature verification disabled");
                    return Ok(());
                }
                None => {
                    return Err(ApiError::Unauthorized(
                        "chat signing secret is not configured".to_string(),
                    ));
                }
            };

            let timestamp = header(headers, HEADER_TIMESTAMP)?;
            let signature = header(headers, HEADER_SIGNATURE)?;

            crypto::verify_chat_signature(secret, &timestamp, body, &signature)
                .map_err(|e| ApiError::Unauthorized(e.to_string()))
        }
        comment_email::SOURCE_TYPE => {
            let secret = match state.settings.email_webhook_secret.as_deref() {
                Some(secret) => secret,
                None if state.settings.dev_mode => {
                    tracing::warn!("dev mode: email signature verification disabled");
                    return Ok(());
                }
                None => {
                    return Err(ApiError::Unauthorized(
                        "email webhook secret is not configured".to_string(),
                    ));
                }
            };

            // The mail provider signs {timestamp}{token} and carries all
            // three fields in the payload itself.
            let timestamp = payload_field(payload, "timestamp")?;
            let token = payload_field(payload, "token")?;
            let signature = payload_field(payload, "signature")?;

            crypto::verify_email_signature(secret, timestamp, token, signature)
                .map_err(|e| ApiError::Unauthorized(e.to_string()))
        }
        other => Err(ApiError::NotFound(format!("unknown source '{other}'"))),
    }
}

fn header(headers: &HeaderMap, name: &str) -> Result<String, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))
}

fn payload_field<'a>(payload: &'a serde_json::Value, field: &str) -> Result<&'a str, ApiError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {field} field")))
}
