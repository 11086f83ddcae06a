//! In-process [`NotificationBus`] built on `tokio::sync::broadcast`.
//!
//! One broadcast channel per query topic. Subscribing creates the topic,
//! publishing never does: a message for a topic with no channel reaches nobody.
//! Closing a topic drops its sender, which ends every open subscription once it
//! has drained what it already received.

use querycast_core::event::BusMessage;
use querycast_core::notification_bus::{
    BusFuture, MessageStream, NotificationBus, NotificationBusError,
};
use querycast_core::query::QueryId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast};

/// Default per-topic buffer. A subscriber further behind than this lags.
pub const DEFAULT_CAPACITY: usize = 1000;

type Channels = Arc<RwLock<HashMap<QueryId, broadcast::Sender<BusMessage>>>>;

/// Topic-per-query broadcaster.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use querycast_core::event::{BusMessage, EventBody};
/// use querycast_core::notification_bus::NotificationBus;
/// use querycast_core::query::QueryId;
/// use querycast_runtime::memory_bus::InMemoryNotificationBus;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryNotificationBus::new();
/// let id: QueryId = "e".repeat(64).parse().unwrap();
///
/// let mut messages = bus.subscribe(&id).await.unwrap();
/// let message = BusMessage::unrecorded(EventBody::Completed { total_flights: 0 });
/// assert_eq!(bus.publish(&id, message.clone()).await.unwrap(), 1);
/// assert_eq!(messages.next().await, Some(Ok(message)));
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryNotificationBus {
    channels: Channels,
    capacity: usize,
}

impl InMemoryNotificationBus {
    /// Create a bus with [`DEFAULT_CAPACITY`] per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom per-topic buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Configured per-topic buffer.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryNotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus for InMemoryNotificationBus {
    fn publish<'a>(&'a self, query_id: &'a QueryId, message: BusMessage) -> BusFuture<'a, usize> {
        Box::pin(async move {
            let channels = self.channels.read().await;
            let Some(sender) = channels.get(query_id) else {
                return Ok(0);
            };
            // Err only means nobody is listening right now
            Ok(sender.send(message).unwrap_or(0))
        })
    }

    fn subscribe<'a>(&'a self, query_id: &'a QueryId) -> BusFuture<'a, MessageStream> {
        Box::pin(async move {
            let mut rx = {
                let mut channels = self.channels.write().await;
                channels
                    .entry(query_id.clone())
                    .or_insert_with(|| broadcast::channel(self.capacity).0)
                    .subscribe()
            };

            let stream = async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok(message) => yield Ok(message),
                        Err(RecvError::Lagged(skipped)) => {
                            yield Err(NotificationBusError::Lagged { skipped });
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }

    fn close<'a>(&'a self, query_id: &'a QueryId) -> BusFuture<'a, bool> {
        Box::pin(async move { Ok(self.channels.write().await.remove(query_id).is_some()) })
    }

    fn topic_count(&self) -> BusFuture<'_, usize> {
        Box::pin(async move { Ok(self.channels.read().await.len()) })
    }
}
