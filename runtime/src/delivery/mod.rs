//! Delivery sessions shared by the three client-facing adapters.
//!
//! - [`LiveSession`]: bus-fed, used by the stream and server-push adapters
//! - [`CursorReader`]: log-fed, stateless per call, used by the long-poll adapter
//!
//! Both render [`querycast_core::notification::Notification`]s with the same
//! progress rules: capped at 99 while the query runs, 100 on a terminal event.

mod cursor;
mod live;

pub use cursor::{CursorConfig, CursorReader, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL};
pub use live::LiveSession;

use querycast_core::event_log::EventLogError;
use querycast_core::notification_bus::NotificationBusError;
use querycast_core::query::QueryId;
use thiserror::Error;

/// Errors surfaced to delivery adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The registry has no entry and the log holds nothing for this id.
    #[error("Query not found: {0}")]
    NotFound(QueryId),

    /// Reading the event log failed.
    #[error("Event log error: {0}")]
    Log(#[from] EventLogError),

    /// Subscribing to the query's topic failed.
    #[error("Notification bus error: {0}")]
    Bus(#[from] NotificationBusError),
}
