//! Event log trait: the durable, per-query, append-only record of result events.
//!
//! The event log is the source of truth every delivery adapter can fall back on.
//! The notification bus only wakes live consumers; anything a consumer missed on
//! the bus can be replayed from here by position.
//!
//! # Invariants
//!
//! - Positions are contiguous and strictly increasing per query, starting at 0.
//! - Entries are never modified once written.
//! - After a terminal event (`Completed` or `Cancelled`) is stored, the log is
//!   sealed: every further append fails with [`EventLogError::Sealed`].
//! - Appends from concurrent writers for the same query are safe. Interleaving
//!   across writers is allowed, positions stay contiguous.
//!
//! # Implementations
//!
//! - `InMemoryEventLog` (in `querycast-runtime`): process-local, used by default
//! - `PostgresEventLog` (in `querycast-postgres`): durable across restarts
//!
//! # Example
//!
//! ```no_run
//! use querycast_core::event::{EventBody, Position};
//! use querycast_core::event_log::{AppendOutcome, EventLog, EventLogError};
//! use querycast_core::query::QueryId;
//!
//! async fn example<L: EventLog>(log: &L, id: &QueryId) -> Result<(), EventLogError> {
//!     // Producer: next position is assigned by the log
//!     let event = log.append(id, EventBody::result(serde_json::json!({}))).await?;
//!
//!     // Mirror: idempotent by position
//!     let outcome = log.append_at(id, event.position, event.body.clone()).await?;
//!     assert!(matches!(outcome, AppendOutcome::AlreadyPresent));
//!
//!     // Cursor reader
//!     let next = log.read(id, Position::ZERO).await?;
//!     Ok(())
//! }
//! ```

use crate::event::{EventBody, Position, ResultEvent};
use crate::query::QueryId;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by [`EventLog`] operations.
pub type LogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventLogError>> + Send + 'a>>;

/// Errors that can occur during event log operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLogError {
    /// A terminal event is already stored for this query.
    #[error("Event log for query {0} is sealed by a terminal event")]
    Sealed(QueryId),

    /// `append_at` was asked to write past the end of the log.
    #[error("Position gap for query {query_id}: log length is {expected}, got position {found}")]
    Gap {
        /// Query whose log was targeted.
        query_id: QueryId,
        /// Current log length (the only position that can be written next).
        expected: Position,
        /// Position the caller tried to write.
        found: Position,
    },

    /// Backend storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Event body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EventLogError {
    /// Whether retrying the same write can never succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Sealed(_) | Self::Gap { .. })
    }
}

/// Result of an idempotent, position-addressed append.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    /// The event was written at the requested position.
    Recorded(ResultEvent),
    /// An event already occupies that position; nothing was written.
    AlreadyPresent,
}

/// Per-query append-only event storage.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the producer workers and the log mirror
/// listener of the same query write concurrently.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` values instead of using
/// `async fn`, so the log can be shared as `Arc<dyn EventLog>`.
pub trait EventLog: Send + Sync {
    /// Append an event at the next free position.
    ///
    /// Creates the log on first write.
    ///
    /// # Errors
    ///
    /// - `Sealed`: a terminal event is already stored
    /// - `Storage`/`Serialization`: backend failure
    fn append<'a>(&'a self, query_id: &'a QueryId, body: EventBody) -> LogFuture<'a, ResultEvent>;

    /// Append an event at an exact position, idempotently.
    ///
    /// - `position < len`: returns [`AppendOutcome::AlreadyPresent`]
    /// - `position == len`: writes and returns [`AppendOutcome::Recorded`]
    /// - `position > len`: fails with [`EventLogError::Gap`]
    ///
    /// # Errors
    ///
    /// `Gap`, `Sealed` (for a new position on a sealed log), or backend failures.
    fn append_at<'a>(
        &'a self,
        query_id: &'a QueryId,
        position: Position,
        body: EventBody,
    ) -> LogFuture<'a, AppendOutcome>;

    /// Number of events stored for the query (0 for unknown queries).
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn len<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, u64>;

    /// Read a single event by position.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn read<'a>(&'a self, query_id: &'a QueryId, position: Position)
    -> LogFuture<'a, Option<ResultEvent>>;

    /// Read every event from `from` (inclusive) to the end, in order.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn read_from<'a>(&'a self, query_id: &'a QueryId, from: Position)
    -> LogFuture<'a, Vec<ResultEvent>>;

    /// The terminal event, if the log is sealed.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn terminal<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, Option<ResultEvent>>;

    /// Delete a query's log. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn remove<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, bool>;

    /// Delete logs whose most recent write is older than `retention`.
    /// Returns the number of logs removed.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn purge_expired(&self, retention: Duration) -> LogFuture<'_, usize>;
}
