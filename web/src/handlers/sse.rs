//! Server-push (SSE) adapter.
//!
//! Each notification becomes one event whose name is the notification's `type`
//! and whose data is its JSON. The stream ends after the terminal event. An
//! idle window with no message yields a non-terminal `timeout` event, and
//! keep-alive comments hold the connection open in between.

use crate::error::AppError;
use crate::extractors::QueryIdParam;
use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::time::Duration;

/// Interval of keep-alive comments.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Stream the query's notifications as server-sent events.
///
/// ```text
/// GET /api/result/sse?query_id=...
/// ```
///
/// # Errors
///
/// - 400 for a missing or malformed `query_id`
/// - 404 for an unknown query
pub async fn stream_events(
    State(state): State<AppState>,
    QueryIdParam(query_id): QueryIdParam,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let session = state
        .engine()
        .open_live(&query_id, Some(state.sse_idle()))
        .await?;
    tracing::info!(query_id = %query_id.short(), "Server-push stream opened");

    let events = session.into_stream().map(|notification| {
        Event::default()
            .event(notification.event_name())
            .json_data(&notification)
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    ))
}
