//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use querycast_runtime::{HealthReport, health::engine_report};

/// Liveness: the process is up.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: registry, bus and log diagnostics.
///
/// 200 when every check is healthy, 503 otherwise (including while the engine
/// shuts down).
///
/// ```text
/// GET /health/ready
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = engine_report(state.engine()).await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use querycast_runtime::{EngineConfig, InMemoryEventLog, InMemoryNotificationBus, SearchEngine};
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> AppState {
        let engine = SearchEngine::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryNotificationBus::new()),
            Vec::new(),
            EngineConfig::default(),
        );
        AppState::new(Arc::new(engine), "http://localhost:3001")
    }

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_ready_while_running() {
        let (status, Json(report)) = readiness_check(State(state())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(report.is_healthy());
    }

    #[tokio::test]
    async fn test_not_ready_after_shutdown() {
        let state = state();
        state.engine().shutdown(Duration::from_millis(10)).await;

        let (status, Json(report)) = readiness_check(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!report.is_healthy());
    }
}
