//! # Querycast Testing
//!
//! Testing utilities for Querycast.
//!
//! This crate provides:
//! - A controllable clock for registry and retention timestamps
//! - Scripted result sources with deterministic payloads and injectable failures
//! - A fault-injecting event log for write-failure paths
//! - Helpers to build requests and drain a query through the cursor adapter
//!
//! ## Example
//!
//! ```no_run
//! use querycast_testing::helpers::{drain_cursor, search_params, test_engine};
//! use querycast_testing::sources::ScriptedSource;
//! use querycast_runtime::SearchPlan;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let engine = test_engine(Vec::new());
//! let plan = SearchPlan::new().with(Arc::new(ScriptedSource::new("kiwi")), 3);
//! let id = engine.start_with_plan(search_params(), &plan).await.unwrap();
//!
//! let notifications = drain_cursor(&engine, &id, 10).await;
//! assert!(notifications.last().unwrap().is_terminal());
//! # }
//! ```

use chrono::{DateTime, Utc};
use querycast_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one clone and hand
    /// another to the engine.
    ///
    /// # Example
    ///
    /// ```
    /// use querycast_testing::mocks::FixedClock;
    /// use querycast_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// assert_eq!(clock.now(), before);
    ///
    /// clock.advance(Duration::minutes(31));
    /// assert_eq!(clock.now() - before, Duration::minutes(31));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Result sources for tests.
pub mod sources {
    use querycast_core::query::SearchParams;
    use querycast_runtime::producer::{ResultSource, SourceError, SourceFuture};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Source producing `{ "source", "index", "from", "to" }` payloads.
    ///
    /// Optionally fails from a given index on, or delays every fetch.
    #[derive(Debug)]
    pub struct ScriptedSource {
        name: String,
        fail_from: Option<u64>,
        fetch_delay: Duration,
        fetched: AtomicU64,
    }

    impl ScriptedSource {
        /// Always-succeeding source.
        #[must_use]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                fail_from: None,
                fetch_delay: Duration::ZERO,
                fetched: AtomicU64::new(0),
            }
        }

        /// Fail every fetch whose index is `index` or higher.
        #[must_use]
        pub const fn failing_from(mut self, index: u64) -> Self {
            self.fail_from = Some(index);
            self
        }

        /// Spend `delay` inside every fetch.
        #[must_use]
        pub const fn with_fetch_delay(mut self, delay: Duration) -> Self {
            self.fetch_delay = delay;
            self
        }

        /// Number of fetches that returned a payload.
        #[must_use]
        pub fn fetched(&self) -> u64 {
            self.fetched.load(Ordering::SeqCst)
        }
    }

    impl ResultSource for ScriptedSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn fetch<'a>(&'a self, params: &'a SearchParams, index: u64) -> SourceFuture<'a> {
            Box::pin(async move {
                if !self.fetch_delay.is_zero() {
                    tokio::time::sleep(self.fetch_delay).await;
                }
                if self.fail_from.is_some_and(|from| index >= from) {
                    return Err(SourceError::Unavailable(format!(
                        "{} refused result {index}",
                        self.name
                    )));
                }
                self.fetched.fetch_add(1, Ordering::SeqCst);
                Ok(json!({
                    "source": self.name,
                    "index": index,
                    "from": params.origin,
                    "to": params.destination,
                }))
            })
        }
    }
}

/// Fault injection.
pub mod faults {
    use querycast_core::event::{EventBody, Position, ResultEvent};
    use querycast_core::event_log::{AppendOutcome, EventLog, EventLogError, LogFuture};
    use querycast_core::query::QueryId;
    use querycast_runtime::memory_log::InMemoryEventLog;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Event log whose next `n` position-assigning appends fail with a storage
    /// error. Everything else, including `append_at`, goes to an inner
    /// [`InMemoryEventLog`].
    #[derive(Clone, Default)]
    pub struct FailingEventLog {
        inner: InMemoryEventLog,
        failures_left: Arc<AtomicU64>,
    }

    impl FailingEventLog {
        /// Log that behaves normally until [`FailingEventLog::fail_next`] is called.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `n` calls to `append` fail.
        pub fn fail_next(&self, n: u64) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        /// The wrapped log.
        #[must_use]
        pub const fn inner(&self) -> &InMemoryEventLog {
            &self.inner
        }

        fn take_failure(&self) -> bool {
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        }
    }

    impl EventLog for FailingEventLog {
        fn append<'a>(&'a self, query_id: &'a QueryId, body: EventBody) -> LogFuture<'a, ResultEvent> {
            if self.take_failure() {
                return Box::pin(async {
                    Err(EventLogError::Storage("injected append failure".to_string()))
                });
            }
            self.inner.append(query_id, body)
        }

        fn append_at<'a>(
            &'a self,
            query_id: &'a QueryId,
            position: Position,
            body: EventBody,
        ) -> LogFuture<'a, AppendOutcome> {
            self.inner.append_at(query_id, position, body)
        }

        fn len<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, u64> {
            self.inner.len(query_id)
        }

        fn read<'a>(
            &'a self,
            query_id: &'a QueryId,
            position: Position,
        ) -> LogFuture<'a, Option<ResultEvent>> {
            self.inner.read(query_id, position)
        }

        fn read_from<'a>(
            &'a self,
            query_id: &'a QueryId,
            from: Position,
        ) -> LogFuture<'a, Vec<ResultEvent>> {
            self.inner.read_from(query_id, from)
        }

        fn terminal<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, Option<ResultEvent>> {
            self.inner.terminal(query_id)
        }

        fn remove<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, bool> {
            self.inner.remove(query_id)
        }

        fn purge_expired(&self, retention: Duration) -> LogFuture<'_, usize> {
            self.inner.purge_expired(retention)
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use querycast_core::notification::Notification;
    use querycast_core::query::{QueryId, SearchParams, SearchRequest};
    use querycast_runtime::delivery::CursorConfig;
    use querycast_runtime::engine::{EngineConfig, SearchEngine};
    use querycast_runtime::memory_bus::InMemoryNotificationBus;
    use querycast_runtime::memory_log::InMemoryEventLog;
    use querycast_runtime::producer::{ProducerConfig, ResultSource};
    use std::sync::Arc;
    use std::time::Duration;

    /// A valid one-way request, CGK to DPS.
    #[must_use]
    pub fn search_request() -> SearchRequest {
        SearchRequest {
            from: "CGK".to_string(),
            to: "DPS".to_string(),
            trip_type: "one-way".to_string(),
            departure_date: "2025-08-17".to_string(),
            return_date: None,
            pax: Some(1),
        }
    }

    /// Parsed form of [`search_request`].
    ///
    /// # Panics
    ///
    /// Never: the request is valid.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn search_params() -> SearchParams {
        SearchParams::parse(&search_request()).expect("fixture request is valid")
    }

    /// Engine config with millisecond delays and a short cursor wait.
    #[must_use]
    pub fn fast_config() -> EngineConfig {
        EngineConfig {
            producer: ProducerConfig::new(Duration::from_millis(1), Duration::from_millis(5)),
            results_per_source: 2..=3,
            cursor: CursorConfig {
                interval: Duration::from_millis(10),
                max_wait: Duration::from_millis(500),
            },
            ..EngineConfig::default()
        }
    }

    /// In-memory engine with [`fast_config`].
    #[must_use]
    pub fn test_engine(sources: Vec<Arc<dyn ResultSource>>) -> SearchEngine {
        SearchEngine::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryNotificationBus::new()),
            sources,
            fast_config(),
        )
    }

    /// Poll a query through the cursor adapter until a terminal notification,
    /// an error, or `max_polls` polls, following `last_seen_index` each time.
    pub async fn drain_cursor(
        engine: &SearchEngine,
        id: &QueryId,
        max_polls: usize,
    ) -> Vec<Notification> {
        let mut cursor = 0;
        let mut received = Vec::new();
        for _ in 0..max_polls {
            let Ok(notification) = engine.poll(id, cursor).await else {
                break;
            };
            cursor = notification.last_seen_index().unwrap_or(cursor);
            let terminal = notification.is_terminal();
            received.push(notification);
            if terminal {
                break;
            }
        }
        received
    }

    /// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use faults::FailingEventLog;
pub use mocks::{FixedClock, test_clock};
pub use sources::ScriptedSource;
