//! `SearchEngine`: the facade the HTTP layer talks to.
//!
//! Owns one [`QueryRegistry`], one event log and one notification bus for the
//! whole process and wires the producer, the log mirror and the delivery
//! sessions around them.
//!
//! # Example
//!
//! ```no_run
//! use querycast_core::query::SearchRequest;
//! use querycast_runtime::engine::{EngineConfig, SearchEngine};
//! use querycast_runtime::memory_bus::InMemoryNotificationBus;
//! use querycast_runtime::memory_log::InMemoryEventLog;
//! use querycast_runtime::producer::ResultSource;
//! use std::sync::Arc;
//!
//! # async fn example(sources: Vec<Arc<dyn ResultSource>>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SearchEngine::new(
//!     Arc::new(InMemoryEventLog::new()),
//!     Arc::new(InMemoryNotificationBus::new()),
//!     sources,
//!     EngineConfig::default(),
//! );
//!
//! let id = engine
//!     .start(&SearchRequest {
//!         from: "CGK".to_string(),
//!         to: "DPS".to_string(),
//!         trip_type: "one-way".to_string(),
//!         departure_date: "2025-08-17".to_string(),
//!         ..SearchRequest::default()
//!     })
//!     .await?;
//!
//! let first = engine.poll(&id, 0).await?;
//! println!("{}", serde_json::to_string(&first)?);
//! # Ok(())
//! # }
//! ```

use crate::delivery::{CursorConfig, CursorReader, DeliveryError, LiveSession};
use crate::janitor::{self, JanitorConfig};
use crate::mirror::LogMirror;
use crate::producer::{
    DEFAULT_RESULTS_PER_SOURCE, Producer, ProducerConfig, ResultSource, SearchPlan,
};
use crate::registry::{DEFAULT_CANCEL_GRACE, QueryRegistry};
use querycast_core::cancellation::CancellationHandle;
use querycast_core::environment::{Clock, SystemClock};
use querycast_core::event::EventBody;
use querycast_core::event_log::EventLog;
use querycast_core::notification::Notification;
use querycast_core::notification_bus::{NotificationBus, NotificationBusError};
use querycast_core::query::{ParamsError, QueryId, QueryState, SearchParams, SearchRequest};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors from starting a query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The request parameters are invalid.
    #[error(transparent)]
    Params(#[from] ParamsError),

    /// No result source is configured.
    #[error("No result sources configured")]
    NoSources,

    /// The mirror could not subscribe to the new query's topic.
    #[error("Notification bus error: {0}")]
    Bus(#[from] NotificationBusError),
}

/// Engine tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Producer delays.
    pub producer: ProducerConfig,
    /// Number of results each source contributes to a query.
    pub results_per_source: RangeInclusive<u64>,
    /// Delay between a cancellation and the removal of the query's log and topic.
    pub cancel_grace: Duration,
    /// Retention sweep timing.
    pub janitor: JanitorConfig,
    /// Long-poll timing.
    pub cursor: CursorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            producer: ProducerConfig::default(),
            results_per_source: DEFAULT_RESULTS_PER_SOURCE,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            janitor: JanitorConfig::default(),
            cursor: CursorConfig::default(),
        }
    }
}

/// Status of a query, resolved from the registry or, once the registry forgot
/// it, from its log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryStatus {
    /// Query identifier.
    pub query_id: QueryId,
    /// Lifecycle state.
    pub state: QueryState,
    /// Expected result count.
    pub expected_count: u64,
    /// Events currently stored in the log.
    pub events_logged: u64,
}

/// Process-wide search engine.
pub struct SearchEngine {
    registry: Arc<QueryRegistry>,
    log: Arc<dyn EventLog>,
    bus: Arc<dyn NotificationBus>,
    sources: Vec<Arc<dyn ResultSource>>,
    producer: Producer,
    cursor: CursorReader,
    config: EngineConfig,
    shutdown: CancellationHandle,
}

impl SearchEngine {
    /// Create an engine with the system clock.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        bus: Arc<dyn NotificationBus>,
        sources: Vec<Arc<dyn ResultSource>>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(log, bus, sources, config, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit clock.
    #[must_use]
    pub fn with_clock(
        log: Arc<dyn EventLog>,
        bus: Arc<dyn NotificationBus>,
        sources: Vec<Arc<dyn ResultSource>>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(QueryRegistry::new(
            Arc::clone(&log),
            Arc::clone(&bus),
            clock,
            config.cancel_grace,
        ));
        let producer = Producer::new(
            Arc::clone(&log),
            Arc::clone(&bus),
            Arc::clone(&registry),
            config.producer.clone(),
        );
        let cursor = CursorReader::new(Arc::clone(&log), config.cursor.clone());
        Self {
            registry,
            log,
            bus,
            sources,
            producer,
            cursor,
            config,
            shutdown: CancellationHandle::new(),
        }
    }

    /// Validate `request` and start a query over every configured source.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Params`] for malformed input; no query is created
    /// - [`EngineError::NoSources`] when the engine has no sources
    /// - [`EngineError::Bus`] when the topic cannot be subscribed
    pub async fn start(&self, request: &SearchRequest) -> Result<QueryId, EngineError> {
        let params = SearchParams::parse(request)?;
        if self.sources.is_empty() {
            return Err(EngineError::NoSources);
        }
        let plan = SearchPlan::random(&self.sources, self.config.results_per_source.clone());
        self.start_with_plan(params, &plan).await
    }

    /// Start a query with an explicit plan.
    ///
    /// The mirror subscribes before the query is registered, so it sees every
    /// message the producers publish. A plan expecting no results completes at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Bus`] when the topic cannot be subscribed.
    pub async fn start_with_plan(
        &self,
        params: SearchParams,
        plan: &SearchPlan,
    ) -> Result<QueryId, EngineError> {
        let id = QueryId::generate(&params);
        let messages = self.bus.subscribe(&id).await?;

        let entry = self
            .registry
            .register(id.clone(), params, plan.expected_count())
            .await;
        let mirror = LogMirror::new(id.clone(), Arc::clone(&self.log), entry.handle().clone())
            .spawn(messages);

        let mut tasks = self.producer.spawn(&entry, plan);
        tasks.push(mirror);
        entry.attach(tasks).await;

        if plan.expected_count() == 0 {
            self.registry.complete(&id, 0).await;
        }
        tracing::info!(
            query_id = %id.short(),
            sources = plan.len(),
            expected = plan.expected_count(),
            "Search started"
        );
        Ok(id)
    }

    /// Cancel a running query. Returns whether this call cancelled it.
    pub async fn cancel(&self, id: &QueryId) -> bool {
        self.registry.cancel(id).await
    }

    /// Registry state of a query.
    pub async fn lookup(&self, id: &QueryId) -> Option<QueryState> {
        self.registry.lookup(id).await
    }

    /// Status of a query.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::NotFound`] when neither the registry nor the log know the id
    /// - [`DeliveryError::Log`] when the log cannot be read
    pub async fn status(&self, id: &QueryId) -> Result<QueryStatus, DeliveryError> {
        let events_logged = self.log.len(id).await?;
        if let Some(snapshot) = self.registry.snapshot(id).await {
            return Ok(QueryStatus {
                query_id: snapshot.id,
                state: snapshot.state,
                expected_count: snapshot.expected_count,
                events_logged,
            });
        }
        if events_logged == 0 {
            return Err(DeliveryError::NotFound(id.clone()));
        }

        let terminal = self.log.terminal(id).await?;
        let (state, expected_count) = match terminal.map(|event| event.body) {
            Some(EventBody::Completed { total_flights }) => (QueryState::Completed, total_flights),
            Some(EventBody::Cancelled { total_flights }) => (QueryState::Cancelled, total_flights),
            _ => (QueryState::Running, events_logged),
        };
        Ok(QueryStatus {
            query_id: id.clone(),
            state,
            expected_count,
            events_logged,
        })
    }

    /// Open a bus-fed session for the stream and server-push adapters.
    ///
    /// A query whose log already holds its terminal event gets a session that
    /// replays it and ends, without subscribing to the bus.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::NotFound`] for unknown ids
    /// - [`DeliveryError::Bus`] or [`DeliveryError::Log`] on backend failures
    pub async fn open_live(
        &self,
        id: &QueryId,
        idle: Option<Duration>,
    ) -> Result<LiveSession, DeliveryError> {
        let expected = self.status(id).await?.expected_count;
        if let Some(terminal) = self.log.terminal(id).await? {
            // ended: replay the terminal event without creating a topic
            return Ok(LiveSession::new(
                id.clone(),
                Box::pin(futures::stream::empty()),
                expected,
                Some(&terminal),
                idle,
            ));
        }
        let messages = self.bus.subscribe(id).await?;
        // read after subscribing: a terminal event is either here or on the topic
        let terminal = self.log.terminal(id).await?;
        Ok(LiveSession::new(
            id.clone(),
            messages,
            expected,
            terminal.as_ref(),
            idle,
        ))
    }

    /// Answer one cursor poll.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::NotFound`] for unknown ids
    /// - [`DeliveryError::Log`] when the log cannot be read
    pub async fn poll(&self, id: &QueryId, cursor: u64) -> Result<Notification, DeliveryError> {
        let expected = self.status(id).await?.expected_count;
        self.cursor.poll(id, cursor, expected).await
    }

    /// Start the retention janitor. It stops on [`SearchEngine::shutdown`].
    #[must_use]
    pub fn spawn_janitor(&self) -> JoinHandle<()> {
        janitor::spawn(
            Arc::clone(&self.registry),
            Arc::clone(&self.log),
            self.config.janitor.clone(),
            self.shutdown.clone(),
        )
    }

    /// Stop the janitor, cancel running queries and wait up to `timeout` for
    /// their tasks.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.cancel();
        self.registry.shutdown(timeout).await;
    }

    /// Whether [`SearchEngine::shutdown`] was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of running queries.
    pub async fn active_count(&self) -> usize {
        self.registry.active_count().await
    }

    /// The query registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    /// The event log.
    #[must_use]
    pub const fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// The notification bus.
    #[must_use]
    pub const fn bus(&self) -> &Arc<dyn NotificationBus> {
        &self.bus
    }

    /// Engine tuning.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }
}
