//! Retention janitor: periodically forgets ended queries.
//!
//! Each tick sweeps the registry (entries past their retention window, with their
//! logs and topics) and then purges orphaned logs the registry no longer knows
//! about, such as logs left behind by a previous process on a durable backend.

use crate::registry::QueryRegistry;
use querycast_core::cancellation::CancellationHandle;
use querycast_core::event_log::EventLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default time between two sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default time an ended query stays readable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Janitor timing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JanitorConfig {
    /// Time between two sweeps.
    pub sweep_interval: Duration,
    /// Time an ended query stays readable.
    pub retention: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Outcome of one sweep.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Registry entries removed.
    pub expired_queries: usize,
    /// Orphaned logs purged.
    pub purged_logs: usize,
}

/// Run one sweep.
pub async fn sweep_once(
    registry: &QueryRegistry,
    log: &dyn EventLog,
    retention: Duration,
) -> SweepReport {
    let expired_queries = registry.sweep(retention).await;
    let purged_logs = match log.purge_expired(retention).await {
        Ok(purged) => purged,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to purge expired event logs");
            0
        }
    };

    if expired_queries > 0 || purged_logs > 0 {
        tracing::info!(expired_queries, purged_logs, "Retention sweep removed queries");
    }
    SweepReport {
        expired_queries,
        purged_logs,
    }
}

/// Start the janitor. It stops when `shutdown` fires.
#[must_use]
pub fn spawn(
    registry: Arc<QueryRegistry>,
    log: Arc<dyn EventLog>,
    config: JanitorConfig,
    shutdown: CancellationHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        tracing::info!(
            interval_secs = config.sweep_interval.as_secs(),
            retention_secs = config.retention.as_secs(),
            "Retention janitor started"
        );
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweep_once(&registry, log.as_ref(), config.retention).await;
                }
            }
        }
        tracing::info!("Retention janitor stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::memory_bus::InMemoryNotificationBus;
    use crate::memory_log::InMemoryEventLog;
    use querycast_core::environment::SystemClock;
    use querycast_core::event::EventBody;
    use querycast_core::notification_bus::NotificationBus;
    use querycast_core::query::{QueryId, SearchParams, SearchRequest};

    fn params() -> SearchParams {
        SearchParams::parse(&SearchRequest {
            from: "DPS".to_string(),
            to: "KUL".to_string(),
            trip_type: "one-way".to_string(),
            departure_date: "2025-07-14".to_string(),
            ..SearchRequest::default()
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_completed_queries_after_retention() {
        let log = InMemoryEventLog::new();
        let registry = Arc::new(QueryRegistry::new(
            Arc::new(log.clone()),
            Arc::new(InMemoryNotificationBus::new()),
            Arc::new(SystemClock),
            Duration::from_secs(5),
        ));
        let id = QueryId::generate(&params());
        registry.register(id.clone(), params(), 0).await;
        registry.complete(&id, 0).await;

        let report = sweep_once(&registry, &log, Duration::ZERO).await;
        assert_eq!(report.expired_queries, 1);
        assert!(registry.is_empty().await);
        assert_eq!(log.len(&id).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_query_is_cancelled_before_its_topic_closes() {
        use futures::StreamExt;

        let bus = InMemoryNotificationBus::new();
        let registry = QueryRegistry::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(bus.clone()),
            Arc::new(SystemClock),
            Duration::from_secs(5),
        );
        let id = QueryId::generate(&params());
        let entry = registry.register(id.clone(), params(), 3).await;
        entry.record_emitted();
        let mut messages = bus.subscribe(&id).await.unwrap();

        let report = sweep_once(&registry, &InMemoryEventLog::new(), Duration::ZERO).await;
        assert_eq!(report.expired_queries, 1);
        assert!(entry.handle().is_cancelled());

        let message = messages.next().await.unwrap().unwrap();
        assert!(message.is_terminal());
        assert_eq!(message.body, EventBody::Cancelled { total_flights: 1 });
        assert!(messages.next().await.is_none());
        assert_eq!(bus.topic_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purges_orphaned_logs() {
        let log = InMemoryEventLog::new();
        let registry = QueryRegistry::new(
            Arc::new(log.clone()),
            Arc::new(InMemoryNotificationBus::new()),
            Arc::new(SystemClock),
            Duration::from_secs(5),
        );
        let orphan = QueryId::generate(&params());
        log.append(&orphan, EventBody::Completed { total_flights: 0 })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let report = sweep_once(&registry, &log, Duration::from_secs(60)).await;
        assert_eq!(report.purged_logs, 1);
        assert_eq!(report.expired_queries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_shutdown() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let registry = Arc::new(QueryRegistry::new(
            Arc::clone(&log),
            Arc::new(InMemoryNotificationBus::new()),
            Arc::new(SystemClock),
            Duration::from_secs(5),
        ));
        let shutdown = CancellationHandle::new();
        let task = spawn(registry, log, JanitorConfig::default(), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(125)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("janitor stops")
            .unwrap();
    }
}
