//! Application state shared by every handler.

use querycast_core::query::QueryId;
use querycast_runtime::SearchEngine;
use std::sync::Arc;
use std::time::Duration;

/// Default idle window of a server-push session.
pub const DEFAULT_SSE_IDLE: Duration = Duration::from_secs(30);

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone: the engine is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<SearchEngine>,
    public_base_url: Arc<str>,
    sse_idle: Duration,
}

impl AppState {
    /// Create the state. `public_base_url` is the `http(s)://host[:port]` clients
    /// reach this server on; delivery links are built from it.
    #[must_use]
    pub fn new(engine: Arc<SearchEngine>, public_base_url: &str) -> Self {
        Self {
            engine,
            public_base_url: Arc::from(public_base_url.trim_end_matches('/')),
            sse_idle: DEFAULT_SSE_IDLE,
        }
    }

    /// Override the server-push idle window.
    #[must_use]
    pub const fn with_sse_idle(mut self, idle: Duration) -> Self {
        self.sse_idle = idle;
        self
    }

    /// The search engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<SearchEngine> {
        &self.engine
    }

    /// Idle window of a server-push session.
    #[must_use]
    pub const fn sse_idle(&self) -> Duration {
        self.sse_idle
    }

    /// WebSocket link for `id`.
    #[must_use]
    pub fn ws_url(&self, id: &QueryId) -> String {
        let base = if let Some(rest) = self.public_base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.public_base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.public_base_url.to_string()
        };
        format!("{base}/ws/result/stream?query_id={id}")
    }

    /// Server-push link for `id`.
    #[must_use]
    pub fn sse_url(&self, id: &QueryId) -> String {
        format!("{}/api/result/sse?query_id={id}", self.public_base_url)
    }

    /// Long-poll link for `id`, starting at cursor 0.
    #[must_use]
    pub fn longpoll_url(&self, id: &QueryId) -> String {
        format!(
            "{}/api/result/longpoll?query_id={id}&last_seen_index=0",
            self.public_base_url
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use querycast_runtime::{EngineConfig, InMemoryEventLog, InMemoryNotificationBus};

    fn state(base: &str) -> AppState {
        let engine = SearchEngine::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryNotificationBus::new()),
            Vec::new(),
            EngineConfig::default(),
        );
        AppState::new(Arc::new(engine), base)
    }

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_links_follow_the_public_base_url() {
        let id: QueryId = "d".repeat(64).parse().unwrap();
        let state = state("http://localhost:3001/");

        assert_eq!(
            state.ws_url(&id),
            format!("ws://localhost:3001/ws/result/stream?query_id={id}")
        );
        assert_eq!(
            state.sse_url(&id),
            format!("http://localhost:3001/api/result/sse?query_id={id}")
        );
        assert!(state.longpoll_url(&id).ends_with("&last_seen_index=0"));
    }

    #[test]
    fn test_secure_base_uses_wss() {
        let id: QueryId = "d".repeat(64).parse().unwrap();
        assert!(state("https://flights.example").ws_url(&id).starts_with("wss://flights.example/"));
    }
}
