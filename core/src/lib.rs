//! # Querycast Core
//!
//! Core traits and types for asynchronous query result distribution.
//!
//! A client starts a search and receives a [`query::QueryId`]. Background producers
//! append ordered [`event::ResultEvent`]s for that query to an [`event_log::EventLog`]
//! and announce each one on a [`notification_bus::NotificationBus`]. Three delivery
//! adapters (stream, server-push, cursor) turn the log and the bus into
//! progress-annotated [`notification::Notification`]s for clients.
//!
//! ## Core Concepts
//!
//! - **Query**: one search, identified by a fixed-length id, with a lifecycle
//!   `Running → Cancelled | Completed`
//! - **Event log**: per-query append-only record, source of truth, sealed by a
//!   terminal event
//! - **Notification bus**: per-query best-effort fan-out to live listeners
//! - **Cancellation handle**: shared single-fire signal observed by every task of a query
//! - **Progress**: `min(100, round(100 * seen / expected))`, 99 at most while running
//!
//! This crate performs no I/O. Implementations live in `querycast-runtime`
//! (in-memory) and `querycast-postgres` (durable log).

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod cancellation;
pub mod event;
pub mod event_log;
pub mod notification;
pub mod notification_bus;
pub mod progress;
pub mod query;

/// Environment module - injected dependencies
///
/// External time is abstracted behind a trait so retention and lifecycle
/// timestamps can be driven deterministically in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use querycast_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use cancellation::CancellationHandle;
pub use environment::{Clock, SystemClock};
pub use event::{BusMessage, EventBody, EventKind, Position, ResultEvent};
pub use event_log::{AppendOutcome, EventLog, EventLogError};
pub use notification::{Notification, SearchStatus};
pub use notification_bus::{MessageStream, NotificationBus, NotificationBusError};
pub use progress::{Progress, ProgressTracker};
pub use query::{ParamsError, QueryId, QueryState, SearchParams, SearchRequest, TripType};
