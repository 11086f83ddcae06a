use super::DeliveryError;
use crate::metrics::DeliveryMetrics;
use querycast_core::event::{EventBody, EventKind, Position};
use querycast_core::event_log::EventLog;
use querycast_core::notification::Notification;
use querycast_core::progress::Progress;
use querycast_core::query::QueryId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default delay between two reads of the log while a poll waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default longest time a poll waits for a new event.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Timing of cursor polls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorConfig {
    /// Delay between two reads of the log.
    pub interval: Duration,
    /// Longest time one poll waits before answering `timeout`.
    pub max_wait: Duration,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Stateless long-poll reader over the event log.
///
/// The client's cursor is the number of events it has seen. Each reply carries
/// the cursor to send next in `last_seen_index`, which never decreases.
#[derive(Clone)]
pub struct CursorReader {
    log: Arc<dyn EventLog>,
    config: CursorConfig,
}

impl CursorReader {
    /// Create a reader over `log`.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, config: CursorConfig) -> Self {
        Self { log, config }
    }

    /// Configured timing.
    #[must_use]
    pub const fn config(&self) -> &CursorConfig {
        &self.config
    }

    /// Answer one poll for the query `id`.
    ///
    /// - A cancelled query answers `cancelled` whatever the cursor.
    /// - `cursor < len`: the event at `cursor`, with progress for `cursor + 1`
    ///   events seen and `last_seen_index = cursor + 1`. Progress events are
    ///   stepped over.
    /// - `cursor >= len` on a completed query: `completed` again.
    /// - Otherwise wait for a new event up to the max wait, then `timeout` with
    ///   the cursor unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Log`] if the log cannot be read.
    pub async fn poll(
        &self,
        id: &QueryId,
        cursor: u64,
        expected_count: u64,
    ) -> Result<Notification, DeliveryError> {
        let started = Instant::now();
        let deadline = started + self.config.max_wait;
        let mut cursor = cursor;

        loop {
            let terminal = self.log.terminal(id).await?;
            if let Some(event) = terminal.as_ref().filter(|e| e.kind() == EventKind::Cancelled) {
                DeliveryMetrics::record_cursor_wait(started.elapsed(), false);
                return Ok(Notification::cancelled(Some(
                    cursor.max(event.position.events_through()),
                )));
            }

            let len = self.log.len(id).await?;
            if cursor < len {
                if let Some(event) = self.log.read(id, Position::new(cursor)).await? {
                    let seen = cursor + 1;
                    let reply = match event.body {
                        EventBody::Result { payload } => Notification::flight(
                            payload,
                            Progress::running(seen, expected_count),
                            seen,
                            expected_count,
                            Some(seen),
                        ),
                        EventBody::Progress { .. } => {
                            cursor = seen;
                            continue;
                        }
                        EventBody::Completed { total_flights } => {
                            Notification::completed(total_flights, Some(seen))
                        }
                        EventBody::Cancelled { .. } => Notification::cancelled(Some(seen)),
                    };
                    DeliveryMetrics::record_cursor_wait(started.elapsed(), false);
                    return Ok(reply);
                }
            } else if let Some(EventBody::Completed { total_flights }) = terminal.map(|e| e.body) {
                DeliveryMetrics::record_cursor_wait(started.elapsed(), false);
                return Ok(Notification::completed(total_flights, Some(cursor)));
            }

            let now = Instant::now();
            if now >= deadline {
                DeliveryMetrics::record_cursor_wait(started.elapsed(), true);
                tracing::debug!(query_id = %id.short(), cursor, "Cursor poll timed out");
                return Ok(Notification::timeout(
                    Progress::running(cursor, expected_count),
                    self.config.max_wait.as_secs(),
                    Some(cursor),
                    cursor,
                    expected_count,
                ));
            }
            tokio::time::sleep(self.config.interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::memory_log::InMemoryEventLog;
    use serde_json::json;

    fn query() -> QueryId {
        "2".repeat(64).parse().unwrap()
    }

    fn reader(log: &InMemoryEventLog) -> CursorReader {
        CursorReader::new(
            Arc::new(log.clone()),
            CursorConfig {
                interval: Duration::from_millis(500),
                max_wait: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn returns_event_at_cursor_with_next_cursor() {
        let log = InMemoryEventLog::new();
        let id = query();
        log.append(&id, EventBody::result(json!({ "n": 0 }))).await.unwrap();
        log.append(&id, EventBody::result(json!({ "n": 1 }))).await.unwrap();

        let reply = reader(&log).poll(&id, 1, 4).await.unwrap();
        assert_eq!(reply.last_seen_index(), Some(2));
        assert_eq!(reply.progress().value(), 50);
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["n"], 1);
        assert_eq!(value["received_flights"], 2);
    }

    #[tokio::test]
    async fn cancelled_short_circuits_any_cursor() {
        let log = InMemoryEventLog::new();
        let id = query();
        log.append(&id, EventBody::result(json!({ "n": 0 }))).await.unwrap();
        log.append(&id, EventBody::Cancelled { total_flights: 1 }).await.unwrap();

        let reply = reader(&log).poll(&id, 0, 10).await.unwrap();
        assert_eq!(reply, Notification::cancelled(Some(2)));
    }

    #[tokio::test]
    async fn completed_log_repeats_completion_past_the_end() {
        let log = InMemoryEventLog::new();
        let id = query();
        log.append(&id, EventBody::result(json!({ "n": 0 }))).await.unwrap();
        log.append(&id, EventBody::Completed { total_flights: 1 }).await.unwrap();

        let at_terminal = reader(&log).poll(&id, 1, 1).await.unwrap();
        assert_eq!(at_terminal, Notification::completed(1, Some(2)));

        let past_end = reader(&log).poll(&id, 2, 1).await.unwrap();
        assert_eq!(past_end, Notification::completed(1, Some(2)));
    }

    #[tokio::test]
    async fn progress_events_are_stepped_over() {
        let log = InMemoryEventLog::new();
        let id = query();
        log.append(&id, EventBody::Progress { message: "warming up".to_string() })
            .await
            .unwrap();
        log.append(&id, EventBody::result(json!({ "n": 1 }))).await.unwrap();

        let reply = reader(&log).poll(&id, 0, 2).await.unwrap();
        assert_eq!(reply.event_name(), "flight");
        assert_eq!(reply.last_seen_index(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_then_times_out_with_cursor_unchanged() {
        let log = InMemoryEventLog::new();
        let id = query();
        log.append(&id, EventBody::result(json!({ "n": 0 }))).await.unwrap();

        let started = Instant::now();
        let reply = reader(&log).poll(&id, 1, 4).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(reply.event_name(), "timeout");
        assert_eq!(reply.last_seen_index(), Some(1));
        assert!(!reply.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_when_an_event_arrives() {
        let log = InMemoryEventLog::new();
        let id = query();
        let writer = log.clone();
        let writer_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer
                .append(&writer_id, EventBody::result(json!({ "n": 0 })))
                .await
                .unwrap();
        });

        let reply = reader(&log).poll(&id, 0, 1).await.unwrap();
        assert_eq!(reply.event_name(), "flight");
        assert_eq!(reply.last_seen_index(), Some(1));
    }
}
