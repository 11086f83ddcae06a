//! Process-local [`EventLog`] implementation.
//!
//! Each query owns its own `Mutex`-guarded log, so appends for different queries
//! never wait on each other. The outer map is locked only to find or create a
//! query's log.

use querycast_core::event::{EventBody, Position, ResultEvent};
use querycast_core::event_log::{AppendOutcome, EventLog, EventLogError, LogFuture};
use querycast_core::query::QueryId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Debug)]
struct QueryLog {
    events: Vec<ResultEvent>,
    sealed: bool,
    last_write: Instant,
}

impl QueryLog {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            sealed: false,
            last_write: Instant::now(),
        }
    }

    fn len(&self) -> u64 {
        self.events.len() as u64
    }

    fn push(&mut self, query_id: &QueryId, body: EventBody) -> Result<ResultEvent, EventLogError> {
        if self.sealed {
            return Err(EventLogError::Sealed(query_id.clone()));
        }
        let event = ResultEvent::new(Position::new(self.len()), body);
        self.sealed = event.is_terminal();
        self.last_write = Instant::now();
        self.events.push(event.clone());
        Ok(event)
    }

    fn get(&self, position: Position) -> Option<&ResultEvent> {
        usize::try_from(position.value())
            .ok()
            .and_then(|index| self.events.get(index))
    }
}

type SharedLog = Arc<Mutex<QueryLog>>;

/// In-memory event log keyed by query.
///
/// Cheap to clone; clones share the same storage.
///
/// # Example
///
/// ```
/// use querycast_core::event::{EventBody, Position};
/// use querycast_core::event_log::EventLog;
/// use querycast_core::query::QueryId;
/// use querycast_runtime::memory_log::InMemoryEventLog;
///
/// # tokio_test::block_on(async {
/// let log = InMemoryEventLog::new();
/// let id: QueryId = "f".repeat(64).parse().unwrap();
///
/// let first = log.append(&id, EventBody::result(serde_json::json!({}))).await.unwrap();
/// assert_eq!(first.position, Position::ZERO);
/// assert_eq!(log.len(&id).await.unwrap(), 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    logs: Arc<RwLock<HashMap<QueryId, SharedLog>>>,
}

impl InMemoryEventLog {
    /// Create an empty log store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queries with a log.
    pub async fn query_count(&self) -> usize {
        self.logs.read().await.len()
    }

    async fn existing(&self, query_id: &QueryId) -> Option<SharedLog> {
        self.logs.read().await.get(query_id).map(Arc::clone)
    }

    async fn get_or_create(&self, query_id: &QueryId) -> SharedLog {
        if let Some(log) = self.existing(query_id).await {
            return log;
        }
        let mut logs = self.logs.write().await;
        Arc::clone(
            logs.entry(query_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(QueryLog::new()))),
        )
    }
}

impl EventLog for InMemoryEventLog {
    fn append<'a>(&'a self, query_id: &'a QueryId, body: EventBody) -> LogFuture<'a, ResultEvent> {
        Box::pin(async move {
            let log = self.get_or_create(query_id).await;
            let mut log = log.lock().await;
            let event = log.push(query_id, body)?;
            tracing::trace!(
                query_id = %query_id.short(),
                position = %event.position,
                kind = %event.kind(),
                "Event appended"
            );
            Ok(event)
        })
    }

    fn append_at<'a>(
        &'a self,
        query_id: &'a QueryId,
        position: Position,
        body: EventBody,
    ) -> LogFuture<'a, AppendOutcome> {
        Box::pin(async move {
            let log = self.get_or_create(query_id).await;
            let mut log = log.lock().await;
            let len = log.len();
            match position.value() {
                p if p < len => Ok(AppendOutcome::AlreadyPresent),
                p if p == len => log.push(query_id, body).map(AppendOutcome::Recorded),
                _ => Err(EventLogError::Gap {
                    query_id: query_id.clone(),
                    expected: Position::new(len),
                    found: position,
                }),
            }
        })
    }

    fn len<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, u64> {
        Box::pin(async move {
            match self.existing(query_id).await {
                Some(log) => Ok(log.lock().await.len()),
                None => Ok(0),
            }
        })
    }

    fn read<'a>(
        &'a self,
        query_id: &'a QueryId,
        position: Position,
    ) -> LogFuture<'a, Option<ResultEvent>> {
        Box::pin(async move {
            let Some(log) = self.existing(query_id).await else {
                return Ok(None);
            };
            let log = log.lock().await;
            Ok(log.get(position).cloned())
        })
    }

    fn read_from<'a>(
        &'a self,
        query_id: &'a QueryId,
        from: Position,
    ) -> LogFuture<'a, Vec<ResultEvent>> {
        Box::pin(async move {
            let Some(log) = self.existing(query_id).await else {
                return Ok(Vec::new());
            };
            let log = log.lock().await;
            Ok(log
                .events
                .iter()
                .filter(|event| event.position >= from)
                .cloned()
                .collect())
        })
    }

    fn terminal<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, Option<ResultEvent>> {
        Box::pin(async move {
            let Some(log) = self.existing(query_id).await else {
                return Ok(None);
            };
            let log = log.lock().await;
            Ok(log.events.last().filter(|event| event.is_terminal()).cloned())
        })
    }

    fn remove<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, bool> {
        Box::pin(async move { Ok(self.logs.write().await.remove(query_id).is_some()) })
    }

    fn purge_expired(&self, retention: Duration) -> LogFuture<'_, usize> {
        Box::pin(async move {
            let snapshot: Vec<(QueryId, SharedLog)> = self
                .logs
                .read()
                .await
                .iter()
                .map(|(id, log)| (id.clone(), Arc::clone(log)))
                .collect();

            let mut expired = Vec::new();
            for (id, log) in snapshot {
                if log.lock().await.last_write.elapsed() >= retention {
                    expired.push(id);
                }
            }

            let mut logs = self.logs.write().await;
            let removed = expired
                .iter()
                .filter(|id| logs.remove(*id).is_some())
                .count();
            if removed > 0 {
                tracing::debug!(removed, "Purged expired event logs");
            }
            Ok(removed)
        })
    }
}
