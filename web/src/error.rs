//! HTTP error responses.
//!
//! Every handler returns [`AppError`] on failure. It renders as a JSON body
//! `{ "code": ..., "message": ... }` with the matching status code. Server-side
//! failures are logged with their source before the response leaves.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use querycast_core::query::{ParamsError, ParseQueryIdError};
use querycast_runtime::{DeliveryError, EngineError};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Body>, AppError> {
///     let status = state.engine().status(&id).await?;
///     Ok(Json(status.into()))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the error that caused this one.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE",
        )
    }

    /// Response status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Internal server error"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<ParamsError> for AppError {
    fn from(err: ParamsError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<ParseQueryIdError> for AppError {
    fn from(err: ParseQueryIdError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Params(e) => e.into(),
            EngineError::NoSources => Self::unavailable("No result sources are configured"),
            EngineError::Bus(e) => {
                Self::internal("Failed to start the search").with_source(anyhow::Error::new(e))
            }
        }
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::NotFound(id) => Self::not_found("Query", id),
            other => Self::internal("Failed to read query results")
                .with_source(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use querycast_core::event_log::EventLogError;
    use querycast_core::query::QueryId;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_params_error_is_bad_request() {
        let err: AppError = EngineError::Params(ParamsError::Missing("from")).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "BAD_REQUEST");
        assert!(err.to_string().contains("from"));
    }

    #[test]
    fn test_unknown_query_is_not_found() {
        let id: QueryId = "c".repeat(64).parse().unwrap();
        let err: AppError = DeliveryError::NotFound(id.clone()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), format!("[NOT_FOUND] Query with id {id} not found"));
    }

    #[test]
    fn test_storage_failure_is_internal_with_source() {
        let err: AppError = DeliveryError::Log(EventLogError::Storage("disk".to_string())).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_no_sources_is_unavailable() {
        let err: AppError = EngineError::NoSources.into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
