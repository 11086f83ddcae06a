//! Cursor long-poll adapter.
//!
//! The client sends the number of events it has seen and gets back exactly one
//! notification plus the cursor to send next in `last_seen_index`. When nothing
//! new arrives within the wait window the reply is a `timeout` with the cursor
//! unchanged.

use crate::WebResult;
use crate::error::AppError;
use crate::extractors::QueryIdParam;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State, rejection::QueryRejection};
use querycast_core::notification::Notification;
use serde::Deserialize;

/// Cursor parameter.
#[derive(Debug, Default, Deserialize)]
pub struct CursorParams {
    /// Events seen so far. Defaults to 0.
    #[serde(default)]
    pub last_seen_index: Option<u64>,
}

/// Answer one poll.
///
/// ```text
/// GET /api/result/longpoll?query_id=...&last_seen_index=3
/// ```
///
/// # Errors
///
/// - 400 for a missing or malformed `query_id` or a non-numeric cursor
/// - 404 for an unknown query
pub async fn poll_results(
    State(state): State<AppState>,
    QueryIdParam(query_id): QueryIdParam,
    cursor: Result<Query<CursorParams>, QueryRejection>,
) -> WebResult<Json<Notification>> {
    let Query(cursor) = cursor.map_err(|e| AppError::bad_request(e.body_text()))?;
    let cursor = cursor.last_seen_index.unwrap_or(0);

    let reply = state.engine().poll(&query_id, cursor).await?;
    tracing::debug!(
        query_id = %query_id.short(),
        cursor,
        reply = reply.event_name(),
        "Long-poll answered"
    );
    Ok(Json(reply))
}
