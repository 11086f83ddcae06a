//! HTTP surface scenarios over an in-memory engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::StatusCode;
use axum_test::TestServer;
use querycast_runtime::engine::{EngineConfig, SearchEngine};
use querycast_runtime::memory_bus::InMemoryNotificationBus;
use querycast_runtime::memory_log::InMemoryEventLog;
use querycast_runtime::producer::{ProducerConfig, ResultSource};
use querycast_testing::ScriptedSource;
use querycast_testing::helpers::{fast_config, init_tracing, test_engine};
use querycast_web::handlers::search::{Cancelled, SearchStarted, StatusResponse};
use querycast_web::{AppState, CORRELATION_ID_HEADER, router};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const BASE_URL: &str = "http://localhost:3001";

fn sources() -> Vec<Arc<dyn ResultSource>> {
    vec![
        Arc::new(ScriptedSource::new("garuda")),
        Arc::new(ScriptedSource::new("lion")),
    ]
}

fn server_with(engine: SearchEngine) -> TestServer {
    init_tracing();
    let state = AppState::new(Arc::new(engine), BASE_URL).with_sse_idle(Duration::from_secs(2));
    TestServer::new(router(state)).unwrap()
}

fn server() -> TestServer {
    server_with(test_engine(sources()))
}

/// Producers wait long enough for the test to act on a running query.
fn slow_server() -> TestServer {
    server_with(SearchEngine::new(
        Arc::new(InMemoryEventLog::new()),
        Arc::new(InMemoryNotificationBus::new()),
        sources(),
        EngineConfig {
            producer: ProducerConfig::new(Duration::from_millis(500), Duration::from_millis(600)),
            ..fast_config()
        },
    ))
}

async fn start(server: &TestServer) -> SearchStarted {
    let response = server
        .get("/api/search")
        .add_query_param("from", "CGK")
        .add_query_param("to", "DPS")
        .add_query_param("trip_type", "one-way")
        .add_query_param("departure_date", "2025-08-17")
        .add_query_param("pax", 2)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json()
}

async fn poll(server: &TestServer, query_id: &str, cursor: u64) -> Value {
    server
        .get("/api/result/longpoll")
        .add_query_param("query_id", query_id)
        .add_query_param("last_seen_index", cursor)
        .await
        .json()
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn search_returns_one_link_per_adapter() {
    let server = server();
    let started = start(&server).await;
    let id = started.query_id.as_str();

    assert_eq!(id.len(), 64);
    assert_eq!(started.ws_url, format!("ws://localhost:3001/ws/result/stream?query_id={id}"));
    assert_eq!(started.sse_url, format!("{BASE_URL}/api/result/sse?query_id={id}"));
    assert_eq!(
        started.longpoll_url,
        format!("{BASE_URL}/api/result/longpoll?query_id={id}&last_seen_index=0")
    );
}

#[tokio::test]
async fn malformed_search_is_rejected_with_json_error() {
    let server = server();
    let response = server
        .get("/api/search")
        .add_query_param("from", "CGK")
        .add_query_param("to", "CGK")
        .add_query_param("trip_type", "one-way")
        .add_query_param("departure_date", "2025-08-17")
        .expect_failure()
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(body["message"].as_str().unwrap().contains("CGK"));
}

#[tokio::test]
async fn non_numeric_pax_is_bad_request() {
    let server = server();
    let response = server
        .get("/api/search")
        .add_query_param("from", "CGK")
        .add_query_param("to", "DPS")
        .add_query_param("trip_type", "one-way")
        .add_query_param("departure_date", "2025-08-17")
        .add_query_param("pax", "many")
        .expect_failure()
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_carry_a_correlation_id() {
    let server = server();
    let response = server.get("/health").await;
    assert_eq!(response.text(), "ok");
    assert!(!response.header(CORRELATION_ID_HEADER).is_empty());
}

// ============================================================================
// Long-poll
// ============================================================================

#[tokio::test]
async fn longpoll_walks_the_log_to_completion() {
    let server = server();
    let started = start(&server).await;
    let id = started.query_id.as_str();

    let mut cursor = 0;
    let mut flights = 0;
    let mut last = Value::Null;
    for _ in 0..200 {
        last = poll(&server, id, cursor).await;
        let next = last["last_seen_index"].as_u64().unwrap();
        assert!(next >= cursor, "cursor went backwards");
        cursor = next;
        match last["type"].as_str().unwrap() {
            "flight" => {
                flights += 1;
                assert_eq!(last["from"], "CGK");
            }
            "completed" => break,
            "timeout" => {}
            other => panic!("unexpected notification {other}"),
        }
    }

    assert_eq!(last["type"], "completed");
    assert_eq!(last["progress"], 100);
    assert_eq!(last["total_flights"], flights);

    // the terminal reply repeats for a client that polls again
    let again = poll(&server, id, cursor).await;
    assert_eq!(again["type"], "completed");
}

#[tokio::test]
async fn longpoll_requires_a_known_query() {
    let server = server();

    let missing = server.get("/api/result/longpoll").expect_failure().await;
    assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

    let unknown = server
        .get("/api/result/longpoll")
        .add_query_param("query_id", "f".repeat(64))
        .expect_failure()
        .await;
    assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
    let body: Value = unknown.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

// ============================================================================
// Cancel
// ============================================================================

#[tokio::test]
async fn cancel_running_query_then_poll_reports_cancelled() {
    let server = slow_server();
    let started = start(&server).await;
    let id = started.query_id.as_str();

    let response = server
        .post("/api/search/cancel")
        .add_query_param("query_id", id)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Cancelled = response.json();
    assert_eq!(body.status, "cancelled");

    let reply = poll(&server, id, 0).await;
    assert_eq!(reply["type"], "cancelled");
    assert_eq!(reply["status"], "cancelled");

    let again = server
        .post("/api/search/cancel")
        .add_query_param("query_id", id)
        .expect_failure()
        .await;
    assert_eq!(again.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_unknown_query_is_not_found() {
    let server = server();
    let response = server
        .post("/api/search/cancel")
        .add_query_param("query_id", "0".repeat(64))
        .expect_failure()
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

// ============================================================================
// Status and server-push
// ============================================================================

#[tokio::test]
async fn status_reports_running_query() {
    let server = slow_server();
    let started = start(&server).await;

    let status: StatusResponse = server
        .get("/api/search/status")
        .add_query_param("query_id", started.query_id.as_str())
        .await
        .json();
    assert_eq!(status.query_id, started.query_id);
    assert_eq!(status.state, querycast_core::query::QueryState::Running);
    assert!(status.expected_count > 0);
}

#[tokio::test]
async fn sse_stream_ends_with_the_terminal_event() {
    let server = server();
    let started = start(&server).await;

    let response = server
        .get("/api/result/sse")
        .add_query_param("query_id", started.query_id.as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body = response.text();
    assert!(body.starts_with("event: progress"), "body: {body}");
    assert!(body.contains("event: completed"), "body: {body}");
    assert!(body.contains(r#""progress":100"#), "body: {body}");
}

#[tokio::test]
async fn sse_unknown_query_is_not_found() {
    let server = server();
    let response = server
        .get("/api/result/sse")
        .add_query_param("query_id", "9".repeat(64))
        .expect_failure()
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ready_while_serving() {
    let server = server();
    let response = server.get("/health/ready").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let report: Value = response.json();
    assert_eq!(report["status"], "healthy");
}
