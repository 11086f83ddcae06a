//! Notification bus: per-query, best-effort fan-out of [`BusMessage`]s.
//!
//! The bus wakes live consumers. It keeps no history: a subscriber only sees
//! messages published after it subscribed, and a slow subscriber may skip
//! messages. Anything missed is recovered from the event log.
//!
//! ```text
//!  producer ──► 1. append to event log   ◄── source of truth
//!          │
//!          └──► 2. publish to bus ──┬──► stream adapter
//!                                   ├──► server-push adapter
//!                                   └──► log mirror listener
//! ```
//!
//! # Topics
//!
//! One topic per query, named by its [`QueryId`]. Topics are created lazily by the
//! first subscriber and dropped by [`NotificationBus::close`].
//!
//! # Implementations
//!
//! - `InMemoryNotificationBus` (in `querycast-runtime`): `tokio::sync::broadcast`
//!   channel per topic

use crate::event::BusMessage;
use crate::query::QueryId;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by the notification bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationBusError {
    /// The subscriber fell behind and `skipped` messages were dropped for it.
    ///
    /// The subscription stays usable; the consumer should re-read the event log.
    #[error("Subscriber lagged behind, {skipped} messages skipped")]
    Lagged {
        /// Number of messages this subscriber will never see.
        skipped: u64,
    },

    /// Failed to publish a message.
    #[error("Publish failed for query {query_id}: {reason}")]
    PublishFailed {
        /// Topic that failed.
        query_id: QueryId,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe.
    #[error("Subscription failed for query {query_id}: {reason}")]
    SubscriptionFailed {
        /// Topic that failed.
        query_id: QueryId,
        /// The reason for failure.
        reason: String,
    },

    /// Network or transport error.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Stream of messages for one query's topic.
///
/// Ends when the topic is closed. Yields `Err(Lagged)` in place of skipped messages.
pub type MessageStream =
    Pin<Box<dyn Stream<Item = Result<BusMessage, NotificationBusError>> + Send>>;

/// Boxed future returned by [`NotificationBus`] operations.
pub type BusFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, NotificationBusError>> + Send + 'a>>;

/// Per-query publish/subscribe channel.
///
/// # Delivery
///
/// - Best effort, no persistence, no replay
/// - Messages published to one topic arrive at a given subscriber in publish order
/// - Messages are never delivered to subscribers of another query
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the bus can be shared as
/// `Arc<dyn NotificationBus>` by the producer, the mirror and every adapter.
pub trait NotificationBus: Send + Sync {
    /// Publish a message to the query's topic.
    ///
    /// Returns the number of subscribers the message was handed to. Publishing to
    /// a topic nobody listens on is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationBusError::PublishFailed`] on transport failure.
    fn publish<'a>(&'a self, query_id: &'a QueryId, message: BusMessage) -> BusFuture<'a, usize>;

    /// Subscribe to the query's topic.
    ///
    /// Only messages published after this call returns are delivered.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationBusError::SubscriptionFailed`] on transport failure.
    fn subscribe<'a>(&'a self, query_id: &'a QueryId) -> BusFuture<'a, MessageStream>;

    /// Drop the query's topic. Open subscriptions end after draining what they
    /// already received. Returns whether the topic existed.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationBusError::Transport`] on transport failure.
    fn close<'a>(&'a self, query_id: &'a QueryId) -> BusFuture<'a, bool>;

    /// Number of live topics.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationBusError::Transport`] on transport failure.
    fn topic_count(&self) -> BusFuture<'_, usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagged_error_reports_skipped_count() {
        let error = NotificationBusError::Lagged { skipped: 17 };
        assert_eq!(format!("{error}"), "Subscriber lagged behind, 17 messages skipped");
    }
}
