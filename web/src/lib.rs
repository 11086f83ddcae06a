//! Axum HTTP surface for Querycast.
//!
//! A thin shell over [`SearchEngine`](querycast_runtime::SearchEngine): handlers
//! parse the request, call the engine and map the outcome to HTTP.
//!
//! # Routes
//!
//! ```text
//! GET  /api/search                 start a query, returns delivery links
//! POST /api/search/cancel          cancel a running query
//! GET  /api/search/status          lifecycle state and counters
//! GET  /ws/result/stream           WebSocket stream adapter
//! GET  /api/result/sse             server-push adapter
//! GET  /api/result/longpoll        cursor long-poll adapter
//! GET  /health                     liveness
//! GET  /health/ready               readiness
//! ```
//!
//! # Example
//!
//! ```ignore
//! let state = AppState::new(Arc::new(engine), "http://localhost:3001");
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
//! axum::serve(listener, querycast_web::router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{CorrelationId, QueryIdParam};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router with tracing, CORS and correlation IDs.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(handlers::search::start_search))
        .route("/api/search/cancel", post(handlers::search::cancel_search))
        .route("/api/search/status", get(handlers::search::search_status))
        .route("/ws/result/stream", get(handlers::websocket::stream_results))
        .route("/api/result/sse", get(handlers::sse::stream_events))
        .route("/api/result/longpoll", get(handlers::longpoll::poll_results))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(correlation_id_layer())
        .with_state(state)
}
