//! Query registry: the per-process owner of every running query.
//!
//! The registry issues query entries, performs the only two lifecycle
//! transitions (`Running → Cancelled`, `Running → Completed`) and records the
//! matching terminal event exactly once. It also supervises each query's tasks
//! so cleanup can abort whatever is still running.
//!
//! # Locking
//!
//! The map sits behind an `RwLock` that is held only to insert, find or remove an
//! entry. Terminal transitions are serialized by each entry's own `Mutex`, so
//! queries never wait on each other. Lock order is always entry, then map.

use crate::metrics::{EventMetrics, QueryMetrics};
use chrono::{DateTime, Utc};
use querycast_core::cancellation::CancellationHandle;
use querycast_core::environment::Clock;
use querycast_core::event::{BusMessage, EventBody};
use querycast_core::event_log::{EventLog, EventLogError};
use querycast_core::notification_bus::NotificationBus;
use querycast_core::query::{QueryId, QueryState, SearchParams};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Default delay between a cancellation and the removal of the query's log and topic.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

const TERMINAL_APPEND_ATTEMPTS: u32 = 3;
const TERMINAL_RETRY_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct Lifecycle {
    state: QueryState,
    terminal_at: Option<DateTime<Utc>>,
    tasks: Vec<JoinHandle<()>>,
}

/// One registered query.
#[derive(Debug)]
pub struct QueryEntry {
    id: QueryId,
    params: SearchParams,
    handle: CancellationHandle,
    created_at: DateTime<Utc>,
    expected_count: u64,
    emitted: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
}

impl QueryEntry {
    /// Query identifier.
    #[must_use]
    pub const fn id(&self) -> &QueryId {
        &self.id
    }

    /// Validated search parameters.
    #[must_use]
    pub const fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Shared cancellation handle of the query.
    #[must_use]
    pub const fn handle(&self) -> &CancellationHandle {
        &self.handle
    }

    /// Number of results the query will emit when nothing fails.
    #[must_use]
    pub const fn expected_count(&self) -> u64 {
        self.expected_count
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Results emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Count one more emitted result and return the new total.
    ///
    /// Increment and compare happen in one atomic step, so exactly one caller
    /// observes any given total.
    pub fn record_emitted(&self) -> u64 {
        self.emitted.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Hand the query's supervised tasks to the entry.
    ///
    /// If the query already ended, the tasks are left to stop on their own; they
    /// observe the fired handle or the sealed log.
    pub async fn attach(&self, tasks: Vec<JoinHandle<()>>) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == QueryState::Running {
            lifecycle.tasks.extend(tasks);
        } else {
            tracing::debug!(
                query_id = %self.id.short(),
                state = %lifecycle.state,
                "Query ended before its tasks were attached"
            );
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> QueryState {
        self.lifecycle.lock().await.state
    }

    async fn snapshot(&self) -> QuerySnapshot {
        let lifecycle = self.lifecycle.lock().await;
        QuerySnapshot {
            id: self.id.clone(),
            params: self.params.clone(),
            state: lifecycle.state,
            expected_count: self.expected_count,
            emitted: self.emitted(),
            created_at: self.created_at,
            terminal_at: lifecycle.terminal_at,
        }
    }
}

/// Point-in-time view of a registry entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuerySnapshot {
    /// Query identifier.
    pub id: QueryId,
    /// Search parameters.
    pub params: SearchParams,
    /// Lifecycle state.
    pub state: QueryState,
    /// Expected result count.
    pub expected_count: u64,
    /// Results emitted so far.
    pub emitted: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the query reached a terminal state.
    pub terminal_at: Option<DateTime<Utc>>,
}

/// Registry of live queries.
pub struct QueryRegistry {
    entries: RwLock<HashMap<QueryId, Arc<QueryEntry>>>,
    log: Arc<dyn EventLog>,
    bus: Arc<dyn NotificationBus>,
    clock: Arc<dyn Clock>,
    cancel_grace: Duration,
    cleanups: Mutex<Vec<JoinHandle<()>>>,
}

impl QueryRegistry {
    /// Create an empty registry writing terminal events to `log` and `bus`.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        bus: Arc<dyn NotificationBus>,
        clock: Arc<dyn Clock>,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            log,
            bus,
            clock,
            cancel_grace,
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Register a running query and return its entry.
    pub async fn register(
        &self,
        id: QueryId,
        params: SearchParams,
        expected_count: u64,
    ) -> Arc<QueryEntry> {
        let entry = Arc::new(QueryEntry {
            id: id.clone(),
            params,
            handle: CancellationHandle::new(),
            created_at: self.clock.now(),
            expected_count,
            emitted: AtomicU64::new(0),
            lifecycle: Mutex::new(Lifecycle {
                state: QueryState::Running,
                terminal_at: None,
                tasks: Vec::new(),
            }),
        });
        self.entries.write().await.insert(id, Arc::clone(&entry));
        QueryMetrics::record_started();
        tracing::info!(
            query_id = %entry.id.short(),
            expected_count,
            "Query registered"
        );
        entry
    }

    /// Find a registered entry.
    pub async fn entry(&self, id: &QueryId) -> Option<Arc<QueryEntry>> {
        self.entries.read().await.get(id).map(Arc::clone)
    }

    /// Lifecycle state of a registered query.
    pub async fn lookup(&self, id: &QueryId) -> Option<QueryState> {
        match self.entry(id).await {
            Some(entry) => Some(entry.state().await),
            None => None,
        }
    }

    /// Snapshot of a registered query.
    pub async fn snapshot(&self, id: &QueryId) -> Option<QuerySnapshot> {
        match self.entry(id).await {
            Some(entry) => Some(entry.snapshot().await),
            None => None,
        }
    }

    /// Number of registered queries still running.
    pub async fn active_count(&self) -> usize {
        let entries: Vec<Arc<QueryEntry>> = self.entries.read().await.values().map(Arc::clone).collect();
        let mut running = 0;
        for entry in entries {
            if entry.state().await == QueryState::Running {
                running += 1;
            }
        }
        running
    }

    /// Number of registry entries, running or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Cancel a running query.
    ///
    /// Returns `true` iff the query was found and still running. The handle is
    /// fired before anything else, so work started after this call observes the
    /// cancellation. A `Cancelled` event is recorded and published once, then the
    /// entry is removed; the log and topic are removed after the cancel grace.
    /// A second call returns `false`.
    pub async fn cancel(&self, id: &QueryId) -> bool {
        let Some(entry) = self.entry(id).await else {
            tracing::debug!(query_id = %id.short(), "Cancel for unknown query");
            return false;
        };
        let Some(tasks) = self.cancel_entry(&entry).await else {
            return false;
        };
        self.schedule_cleanup(id.clone(), tasks).await;
        true
    }

    async fn cancel_entry(&self, entry: &QueryEntry) -> Option<Vec<JoinHandle<()>>> {
        let mut lifecycle = entry.lifecycle.lock().await;
        if lifecycle.state != QueryState::Running {
            return None;
        }
        entry.handle.cancel();
        lifecycle.state = QueryState::Cancelled;
        lifecycle.terminal_at = Some(self.clock.now());

        let total_flights = entry.emitted();
        self.record_terminal(&entry.id, EventBody::Cancelled { total_flights })
            .await;
        // removed only once the terminal event is readable from the log
        self.entries.write().await.remove(&entry.id);
        let tasks = std::mem::take(&mut lifecycle.tasks);
        drop(lifecycle);

        QueryMetrics::record_cancelled();
        tracing::info!(query_id = %entry.id.short(), total_flights, "Query cancelled");
        Some(tasks)
    }

    /// Mark a running query completed and record `Completed { total_flights }`.
    ///
    /// Returns `false` if the query is unknown or already ended; only the first
    /// call for a query records anything.
    pub async fn complete(&self, id: &QueryId, total_flights: u64) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };

        let mut lifecycle = entry.lifecycle.lock().await;
        if !lifecycle.state.can_transition_to(QueryState::Completed) {
            return false;
        }
        lifecycle.state = QueryState::Completed;
        lifecycle.terminal_at = Some(self.clock.now());
        self.record_terminal(id, EventBody::Completed { total_flights })
            .await;
        drop(lifecycle);

        QueryMetrics::record_completed();
        tracing::info!(query_id = %id.short(), total_flights, "Query completed");
        true
    }

    /// Remove entries whose retention window has passed.
    ///
    /// Ended queries expire `retention` after their terminal event. Queries that
    /// never ended expire `retention` after creation; they are cancelled and their
    /// `Cancelled` event is published so attached sessions end. Their logs and
    /// topics are removed. Returns the number of entries removed.
    pub async fn sweep(&self, retention: Duration) -> usize {
        let window = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let now = self.clock.now();

        let entries: Vec<Arc<QueryEntry>> = self.entries.read().await.values().map(Arc::clone).collect();
        let mut expired = Vec::new();
        for entry in entries {
            let mut lifecycle = entry.lifecycle.lock().await;
            let since = lifecycle.terminal_at.unwrap_or(entry.created_at);
            if now - since < window {
                continue;
            }
            if lifecycle.state == QueryState::Running {
                entry.handle.cancel();
                lifecycle.state = QueryState::Cancelled;
                lifecycle.terminal_at = Some(now);
                let total_flights = entry.emitted();
                self.record_terminal(&entry.id, EventBody::Cancelled { total_flights })
                    .await;
                QueryMetrics::record_cancelled();
                tracing::warn!(
                    query_id = %entry.id.short(),
                    emitted = total_flights,
                    expected = entry.expected_count,
                    "Query never finished within retention, abandoning"
                );
            }
            for task in lifecycle.tasks.drain(..) {
                task.abort();
            }
            expired.push(entry.id.clone());
        }

        {
            let mut map = self.entries.write().await;
            for id in &expired {
                map.remove(id);
            }
        }
        for id in &expired {
            self.release(id).await;
        }

        if !expired.is_empty() {
            QueryMetrics::record_expired(expired.len());
            tracing::debug!(removed = expired.len(), "Expired registry entries swept");
        }
        expired.len()
    }

    /// Cancel every running query and wait for its tasks.
    ///
    /// Tasks still running after `timeout` are aborted. Pending cleanups run
    /// immediately.
    pub async fn shutdown(&self, timeout: Duration) {
        let entries: Vec<Arc<QueryEntry>> =
            self.entries.write().await.drain().map(|(_, entry)| entry).collect();
        tracing::info!(queries = entries.len(), "Shutting down query registry");

        let mut tasks = Vec::new();
        for entry in &entries {
            match self.cancel_entry(entry).await {
                Some(mut cancelled) => tasks.append(&mut cancelled),
                None => tasks.append(&mut entry.lifecycle.lock().await.tasks),
            }
        }
        for cleanup in self.cleanups.lock().await.drain(..) {
            cleanup.abort();
        }

        let abort_handles: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(tasks)).await;
        if joined.is_err() {
            tracing::warn!("Shutdown timeout, aborting remaining query tasks");
            for handle in abort_handles {
                handle.abort();
            }
        }

        for entry in &entries {
            self.release(&entry.id).await;
        }
    }

    /// Append `body` and publish it.
    ///
    /// Transient append failures are retried: once the handle has fired, the
    /// mirror no longer records unrecorded messages for this query.
    async fn record_terminal(&self, id: &QueryId, body: EventBody) {
        let mut attempt = 1;
        let message = loop {
            match self.log.append(id, body.clone()).await {
                Ok(event) => {
                    EventMetrics::record_append();
                    break event.to_message();
                }
                Err(EventLogError::Sealed(_)) => {
                    tracing::debug!(query_id = %id.short(), "Log already sealed, terminal event dropped");
                    return;
                }
                Err(e) if !e.is_permanent() && attempt < TERMINAL_APPEND_ATTEMPTS => {
                    EventMetrics::record_write_failure();
                    tracing::warn!(
                        query_id = %id.short(),
                        attempt,
                        error = %e,
                        "Failed to record terminal event, retrying"
                    );
                    tokio::time::sleep(TERMINAL_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    EventMetrics::record_write_failure();
                    tracing::error!(
                        query_id = %id.short(),
                        attempts = attempt,
                        error = %e,
                        "Failed to record terminal event, publishing unrecorded"
                    );
                    break BusMessage::unrecorded(body);
                }
            }
        };

        if let Err(e) = self.bus.publish(id, message).await {
            tracing::warn!(query_id = %id.short(), error = %e, "Failed to publish terminal event");
        }
    }

    async fn schedule_cleanup(&self, id: QueryId, tasks: Vec<JoinHandle<()>>) {
        let log = Arc::clone(&self.log);
        let bus = Arc::clone(&self.bus);
        let grace = self.cancel_grace;

        let cleanup = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for task in tasks {
                if !task.is_finished() {
                    task.abort();
                }
            }
            release_resources(log.as_ref(), bus.as_ref(), &id).await;
        });

        let mut cleanups = self.cleanups.lock().await;
        cleanups.retain(|task| !task.is_finished());
        cleanups.push(cleanup);
    }

    async fn release(&self, id: &QueryId) {
        release_resources(self.log.as_ref(), self.bus.as_ref(), id).await;
    }
}

async fn release_resources(log: &dyn EventLog, bus: &dyn NotificationBus, id: &QueryId) {
    if let Err(e) = log.remove(id).await {
        tracing::warn!(query_id = %id.short(), error = %e, "Failed to remove event log");
    }
    if let Err(e) = bus.close(id).await {
        tracing::warn!(query_id = %id.short(), error = %e, "Failed to close topic");
    }
    tracing::debug!(query_id = %id.short(), "Query resources released");
}
