//! Log mirror listener.
//!
//! Subscribes to a query's topic before its producers start and copies every bus
//! message into the event log. Positioned messages are already recorded, so the
//! position-addressed append is a no-op for them; unpositioned messages are the
//! producer's failed writes and get appended here.
//!
//! The listener stops when the query's handle fires, after forwarding a terminal
//! message, or when the topic closes.

use crate::metrics::EventMetrics;
use futures::StreamExt;
use querycast_core::cancellation::CancellationHandle;
use querycast_core::event::BusMessage;
use querycast_core::event_log::{AppendOutcome, EventLog, EventLogError};
use querycast_core::notification_bus::{MessageStream, NotificationBusError};
use querycast_core::query::QueryId;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Copies bus messages of one query into the event log.
pub struct LogMirror {
    query_id: QueryId,
    log: Arc<dyn EventLog>,
    handle: CancellationHandle,
}

impl LogMirror {
    /// Create a mirror for `query_id`.
    #[must_use]
    pub fn new(query_id: QueryId, log: Arc<dyn EventLog>, handle: CancellationHandle) -> Self {
        Self {
            query_id,
            log,
            handle,
        }
    }

    /// Run the mirror on its own task, consuming an already open subscription.
    #[must_use]
    pub fn spawn(self, messages: MessageStream) -> JoinHandle<()> {
        tokio::spawn(self.run(messages))
    }

    /// Mirror until cancelled, terminal, or the topic closes.
    pub async fn run(self, mut messages: MessageStream) {
        let id = self.query_id.short();
        tracing::debug!(query_id = %id, "Log mirror started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.handle.cancelled() => None,
                next = messages.next() => next,
            };

            let message = match next {
                None => break,
                Some(Ok(message)) => message,
                Some(Err(NotificationBusError::Lagged { skipped })) => {
                    tracing::warn!(query_id = %id, skipped, "Log mirror lagged behind the bus");
                    continue;
                }
                Some(Err(e)) => {
                    tracing::warn!(query_id = %id, error = %e, "Log mirror subscription failed");
                    break;
                }
            };

            let terminal = message.is_terminal();
            self.mirror(message).await;
            if terminal {
                break;
            }
        }

        tracing::debug!(query_id = %id, "Log mirror stopped");
    }

    async fn mirror(&self, message: BusMessage) {
        let id = &self.query_id;
        let result = match message.position {
            Some(position) => self.log.append_at(id, position, message.body).await,
            None => self
                .log
                .append(id, message.body)
                .await
                .map(AppendOutcome::Recorded),
        };

        match result {
            Ok(AppendOutcome::AlreadyPresent) => {}
            Ok(AppendOutcome::Recorded(event)) => {
                EventMetrics::record_mirrored();
                tracing::debug!(
                    query_id = %id.short(),
                    position = %event.position,
                    kind = %event.kind(),
                    "Mirrored event into log"
                );
            }
            Err(EventLogError::Sealed(_)) => {
                tracing::debug!(query_id = %id.short(), "Log sealed, mirrored message dropped");
            }
            Err(e) => {
                EventMetrics::record_write_failure();
                tracing::warn!(query_id = %id.short(), error = %e, "Log mirror failed to write event");
            }
        }
    }
}
