//! Producer task: one worker per result source, all feeding one query.
//!
//! Every worker runs the same loop for each result it owes:
//!
//! 1. stop if the query's handle has fired
//! 2. sleep a random delay, woken early by cancellation
//! 3. stop if the handle fired while sleeping
//! 4. fetch the result from its source (an in-flight fetch always finishes)
//! 5. append a `Result` event to the log, then publish it on the bus
//! 6. bump the query's shared counter; the worker that reaches the expected
//!    count asks the registry to complete the query
//!
//! A failing source stops only its own worker. A failed log write is not fatal:
//! the message is published without a position and the log mirror records it.

use crate::metrics::EventMetrics;
use crate::registry::{QueryEntry, QueryRegistry};
use querycast_core::event::{BusMessage, EventBody};
use querycast_core::event_log::{EventLog, EventLogError};
use querycast_core::notification_bus::NotificationBus;
use querycast_core::query::SearchParams;
use rand::Rng;
use std::future::Future;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Default lower bound of the delay between two results of one source.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(10);

/// Default upper bound of the delay between two results of one source.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(710);

/// Default number of results each source contributes to a query.
pub const DEFAULT_RESULTS_PER_SOURCE: RangeInclusive<u64> = 8..=10;

/// Errors reported by a result source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The upstream could not be reached or refused the request.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The upstream answered with something that is not a result.
    #[error("Invalid source response: {0}")]
    InvalidResponse(String),
}

/// Boxed future returned by [`ResultSource::fetch`].
pub type SourceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, SourceError>> + Send + 'a>>;

/// External collaborator that produces result payloads for a search.
///
/// The payload shape is owned by the source and opaque to the rest of the system.
pub trait ResultSource: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Produce the `index`-th result of this source for `params`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when no result can be produced; the calling worker
    /// stops.
    fn fetch<'a>(&'a self, params: &'a SearchParams, index: u64) -> SourceFuture<'a>;
}

/// Which sources a query uses and how many results each owes.
#[derive(Clone, Default)]
pub struct SearchPlan {
    steps: Vec<(Arc<dyn ResultSource>, u64)>,
}

impl SearchPlan {
    /// Empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source owing `count` results.
    #[must_use]
    pub fn with(mut self, source: Arc<dyn ResultSource>, count: u64) -> Self {
        self.steps.push((source, count));
        self
    }

    /// Draw each source's count uniformly from `per_source`.
    #[must_use]
    pub fn random(sources: &[Arc<dyn ResultSource>], per_source: RangeInclusive<u64>) -> Self {
        let mut rng = rand::thread_rng();
        let steps = sources
            .iter()
            .map(|source| {
                let count = if per_source.is_empty() {
                    0
                } else {
                    rng.gen_range(per_source.clone())
                };
                (Arc::clone(source), count)
            })
            .collect();
        Self { steps }
    }

    /// Total number of results the plan will emit.
    #[must_use]
    pub fn expected_count(&self) -> u64 {
        self.steps.iter().map(|(_, count)| count).sum()
    }

    /// Number of sources in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for SearchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|(source, count)| (source.name(), count)))
            .finish()
    }
}

/// Timing of the producer workers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Shortest delay before each result.
    pub min_delay: Duration,
    /// Longest delay before each result.
    pub max_delay: Duration,
}

impl ProducerConfig {
    /// Create a config; bounds are swapped if given in the wrong order.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        if min_delay <= max_delay {
            Self { min_delay, max_delay }
        } else {
            Self {
                min_delay: max_delay,
                max_delay: min_delay,
            }
        }
    }

    /// Draw one delay from `min_delay..=max_delay`.
    #[must_use]
    pub fn sample_delay(&self) -> Duration {
        if self.min_delay >= self.max_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY)
    }
}

/// Spawns and runs producer workers.
#[derive(Clone)]
pub struct Producer {
    log: Arc<dyn EventLog>,
    bus: Arc<dyn NotificationBus>,
    registry: Arc<QueryRegistry>,
    config: ProducerConfig,
}

impl Producer {
    /// Create a producer writing to `log` and `bus` and completing through `registry`.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        bus: Arc<dyn NotificationBus>,
        registry: Arc<QueryRegistry>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            log,
            bus,
            registry,
            config,
        }
    }

    /// Start one worker per source of `plan` for the query of `entry`.
    #[must_use]
    pub fn spawn(&self, entry: &Arc<QueryEntry>, plan: &SearchPlan) -> Vec<JoinHandle<()>> {
        plan.steps
            .iter()
            .map(|(source, count)| {
                let worker = self.clone();
                let entry = Arc::clone(entry);
                let source = Arc::clone(source);
                let count = *count;
                tokio::spawn(async move { worker.run(&entry, source.as_ref(), count).await })
            })
            .collect()
    }

    /// Worker loop for one source.
    async fn run(&self, entry: &QueryEntry, source: &dyn ResultSource, count: u64) {
        let id = entry.id();
        let handle = entry.handle();

        for index in 0..count {
            if handle.is_cancelled() {
                tracing::debug!(query_id = %id.short(), source = source.name(), "Worker stopped by cancellation");
                return;
            }

            tokio::select! {
                () = handle.cancelled() => {
                    tracing::debug!(query_id = %id.short(), source = source.name(), "Worker woken by cancellation");
                    return;
                }
                () = tokio::time::sleep(self.config.sample_delay()) => {}
            }
            if handle.is_cancelled() {
                return;
            }

            let payload = match source.fetch(entry.params(), index).await {
                Ok(payload) => payload,
                Err(e) => {
                    EventMetrics::record_source_failure(source.name());
                    tracing::warn!(
                        query_id = %id.short(),
                        source = source.name(),
                        index,
                        error = %e,
                        "Result source failed, stopping worker"
                    );
                    return;
                }
            };

            let body = EventBody::result(payload);
            let (message, recorded) = match self.log.append(id, body.clone()).await {
                Ok(event) => {
                    EventMetrics::record_append();
                    (event.to_message(), true)
                }
                Err(EventLogError::Sealed(_)) => {
                    tracing::debug!(query_id = %id.short(), source = source.name(), "Log sealed, stopping worker");
                    return;
                }
                Err(e) => {
                    EventMetrics::record_write_failure();
                    tracing::warn!(
                        query_id = %id.short(),
                        source = source.name(),
                        error = %e,
                        "Failed to append result, publishing unrecorded"
                    );
                    (BusMessage::unrecorded(body), false)
                }
            };

            let published = match self.bus.publish(id, message).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(query_id = %id.short(), source = source.name(), error = %e, "Failed to publish result");
                    false
                }
            };
            if !recorded && !published {
                // dropped on both paths, does not count toward completion
                continue;
            }

            let emitted = entry.record_emitted();
            tracing::trace!(query_id = %id.short(), source = source.name(), emitted, "Result emitted");
            if emitted == entry.expected_count() {
                self.registry.complete(id, emitted).await;
            }
        }
        tracing::debug!(query_id = %id.short(), source = source.name(), "Worker finished");
    }
}
