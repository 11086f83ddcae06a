//! Query lifecycle endpoints.
//!
//! ```text
//! GET  /api/search?from=CGK&to=DPS&trip_type=one-way&departure_date=2025-08-17&pax=1
//! POST /api/search/cancel?query_id=...
//! GET  /api/search/status?query_id=...
//! ```

use crate::WebResult;
use crate::error::AppError;
use crate::extractors::{CorrelationId, QueryIdParam};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use querycast_core::query::{QueryId, QueryState, SearchRequest};
use serde::{Deserialize, Serialize};

/// Reply to a successful search: the query ID and one link per adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStarted {
    /// New query identifier.
    pub query_id: QueryId,
    /// WebSocket stream link.
    pub ws_url: String,
    /// Server-push link.
    pub sse_url: String,
    /// Long-poll link, cursor 0.
    pub longpoll_url: String,
}

/// Reply to a successful cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancelled {
    /// Always `cancelled`.
    pub status: String,
}

/// Query status as seen by operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Query identifier.
    pub query_id: QueryId,
    /// `running`, `cancelled` or `completed`.
    pub state: QueryState,
    /// Expected result count.
    pub expected_count: u64,
    /// Events currently stored.
    pub events_logged: u64,
}

/// Validate the request and start a query.
///
/// # Errors
///
/// - 400 for malformed parameters
/// - 503 when no result source is configured
pub async fn start_search(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    request: Result<Query<SearchRequest>, QueryRejection>,
) -> Result<Json<SearchStarted>, AppError> {
    let Query(request) = request.map_err(|e| AppError::bad_request(e.body_text()))?;
    let query_id = state.engine().start(&request).await?;

    tracing::info!(
        correlation_id = %correlation_id.0,
        query_id = %query_id.short(),
        from = %request.from,
        to = %request.to,
        "Search accepted"
    );
    Ok(Json(SearchStarted {
        ws_url: state.ws_url(&query_id),
        sse_url: state.sse_url(&query_id),
        longpoll_url: state.longpoll_url(&query_id),
        query_id,
    }))
}

/// Cancel a running query.
///
/// # Errors
///
/// 404 when the query is unknown or already finished.
pub async fn cancel_search(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    QueryIdParam(query_id): QueryIdParam,
) -> Result<Json<Cancelled>, AppError> {
    if !state.engine().cancel(&query_id).await {
        return Err(AppError::new(
            axum::http::StatusCode::NOT_FOUND,
            "query not found or already finished".to_string(),
            "NOT_FOUND",
        ));
    }
    tracing::info!(
        correlation_id = %correlation_id.0,
        query_id = %query_id.short(),
        "Search cancelled by client"
    );
    Ok(Json(Cancelled {
        status: "cancelled".to_string(),
    }))
}

/// Lifecycle state and counters of a query.
///
/// # Errors
///
/// 404 when neither the registry nor the log know the query.
pub async fn search_status(
    State(state): State<AppState>,
    QueryIdParam(query_id): QueryIdParam,
) -> WebResult<Json<StatusResponse>> {
    let status = state.engine().status(&query_id).await?;
    Ok(Json(StatusResponse {
        query_id: status.query_id,
        state: status.state,
        expected_count: status.expected_count,
        events_logged: status.events_logged,
    }))
}
