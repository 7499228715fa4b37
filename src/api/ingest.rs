use crate::address;
use crate::api::errors::ApiError;
use crate::server::AppState;
use crate::storage::store::SentEmail;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

/// Maximum number of messages accepted in one request.
pub const MAX_BATCH: usize = 1000;

/// Maximum byte length of a recipient header.
pub const MAX_RECIPIENT_LEN: usize = 2048;

/// Inbound batch of sent emails for the authenticated owner.
#[derive(Debug, Deserialize)]
pub struct SentBatch {
    pub messages: Vec<SentMessage>,
}

/// One sent email, as reported by the sync job.
#[derive(Debug, Deserialize)]
pub struct SentMessage {
    /// Recipient header value, e.g. `"Alice" <alice@example.com>`.
    pub to: String,
    /// Epoch milliseconds; defaults to the time of ingestion.
    pub timestamp: Option<i64>,
}

/// Validate a batch and stamp it with the owner.
fn build_rows(owner_email: &str, batch: SentBatch, now_ms: i64) -> Result<Vec<SentEmail>, ApiError> {
    if batch.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }
    if batch.messages.len() > MAX_BATCH {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_BATCH} messages per request"
        )));
    }

    batch
        .messages
        .into_iter()
        .enumerate()
        .map(|(i, message)| {
            let to = message.to.trim();
            if to.is_empty() || to.len() > MAX_RECIPIENT_LEN {
                return Err(ApiError::BadRequest(format!(
                    "messages[{i}].to must be 1-{MAX_RECIPIENT_LEN} bytes"
                )));
            }
            if address::first_address(to).is_none_or(|addr| !addr.contains('@')) {
                return Err(ApiError::BadRequest(format!(
                    "messages[{i}].to has no parseable address"
                )));
            }
            if message.timestamp.is_some_and(|ts| ts < 0) {
                return Err(ApiError::BadRequest(format!(
                    "messages[{i}].timestamp must not be negative"
                )));
            }
            Ok(SentEmail {
                owner_email: owner_email.to_string(),
                recipient: to.to_string(),
                timestamp_ms: message.timestamp.unwrap_or(now_ms),
            })
        })
        .collect()
}

/// POST /api/user/stats/sent — Record sent emails into the analytics store.
pub async fn record_sent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(batch): Json<SentBatch>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .resolve(&headers)
        .await
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    let owner = session.user.email;
    let rows = build_rows(&owner, batch, Utc::now().timestamp_millis())?;

    let store = state.store.clone();
    let accepted = tokio::task::spawn_blocking(move || store.record_sent(&rows))
        .await
        .map_err(|e| ApiError::Internal(format!("Insert task panicked: {e}")))??;

    let invalidated = state.response_cache.invalidate_owner(&owner);
    tracing::info!(owner = %owner, accepted, invalidated, "Recorded sent emails");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": accepted })),
    ))
}
