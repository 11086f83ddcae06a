use crate::metrics::DeliveryMetrics;
use futures::{Stream, StreamExt};
use querycast_core::event::{BusMessage, EventBody, ResultEvent};
use querycast_core::notification::{Notification, SearchStatus};
use querycast_core::notification_bus::{MessageStream, NotificationBusError};
use querycast_core::progress::ProgressTracker;
use querycast_core::query::QueryId;
use std::collections::VecDeque;
use std::time::Duration;

/// A bus-fed client session.
///
/// Yields a `progress` 0 notification first, then one notification per bus
/// message, and ends right after a `completed` or `cancelled` notification or when
/// the topic closes. With an idle window, a `timeout` notification is yielded each
/// time the window passes without a message; the session stays open.
///
/// Dropping the session unsubscribes from the topic.
pub struct LiveSession {
    query_id: QueryId,
    messages: MessageStream,
    tracker: ProgressTracker,
    idle: Option<Duration>,
    pending: VecDeque<Notification>,
    finished: bool,
}

impl LiveSession {
    /// Build a session from an open subscription.
    ///
    /// `terminal` is the log's terminal event read after subscribing; when
    /// present, the session yields it right after the starting notification and
    /// ends, so clients joining an ended query do not wait forever.
    #[must_use]
    pub fn new(
        query_id: QueryId,
        messages: MessageStream,
        expected_count: u64,
        terminal: Option<&ResultEvent>,
        idle: Option<Duration>,
    ) -> Self {
        let mut tracker = ProgressTracker::new(expected_count);
        let mut pending = VecDeque::from([Notification::starting()]);
        if let Some(event) = terminal {
            pending.push_back(render(&mut tracker, event.to_message()));
        }

        DeliveryMetrics::record_session_opened();
        tracing::debug!(query_id = %query_id.short(), expected_count, "Live session opened");
        Self {
            query_id,
            messages,
            tracker,
            idle,
            pending,
            finished: false,
        }
    }

    /// Query this session follows.
    #[must_use]
    pub const fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// Next notification, or `None` once the session is over.
    pub async fn next(&mut self) -> Option<Notification> {
        if let Some(notification) = self.pending.pop_front() {
            if notification.is_terminal() {
                self.finish();
            }
            return Some(notification);
        }
        if self.finished {
            return None;
        }

        loop {
            let received = match self.idle {
                Some(window) => match tokio::time::timeout(window, self.messages.next()).await {
                    Ok(received) => received,
                    Err(_) => {
                        tracing::debug!(query_id = %self.query_id.short(), "Live session idle");
                        return Some(Notification::timeout(
                            self.tracker.current(),
                            window.as_secs(),
                            None,
                            self.tracker.seen(),
                            self.tracker.expected(),
                        ));
                    }
                },
                None => self.messages.next().await,
            };

            match received {
                Some(Ok(message)) => {
                    let notification = render(&mut self.tracker, message);
                    if notification.is_terminal() {
                        self.finish();
                    }
                    return Some(notification);
                }
                Some(Err(NotificationBusError::Lagged { skipped })) => {
                    tracing::warn!(
                        query_id = %self.query_id.short(),
                        skipped,
                        "Live session lagged, messages skipped"
                    );
                }
                Some(Err(e)) => {
                    tracing::warn!(query_id = %self.query_id.short(), error = %e, "Live session subscription failed");
                    self.finish();
                    return None;
                }
                None => {
                    tracing::debug!(query_id = %self.query_id.short(), "Topic closed, ending live session");
                    self.finish();
                    return None;
                }
            }
        }
    }

    /// Turn the session into a stream of notifications.
    pub fn into_stream(self) -> impl Stream<Item = Notification> + Send {
        futures::stream::unfold(self, |mut session| async move {
            session.next().await.map(|notification| (notification, session))
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.pending.clear();
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        DeliveryMetrics::record_session_closed();
        tracing::debug!(query_id = %self.query_id.short(), "Live session closed");
    }
}

fn render(tracker: &mut ProgressTracker, message: BusMessage) -> Notification {
    match message.body {
        EventBody::Result { payload } => {
            let progress = tracker.observe(message.position);
            Notification::flight(payload, progress, tracker.seen(), tracker.expected(), None)
        }
        EventBody::Progress { message } => Notification::Progress {
            progress: tracker.current(),
            status: SearchStatus::Searching,
            message,
        },
        EventBody::Completed { total_flights } => {
            tracker.finish();
            Notification::completed(total_flights, None)
        }
        EventBody::Cancelled { .. } => {
            tracker.finish();
            Notification::cancelled(None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use querycast_core::event::Position;
    use serde_json::json;

    fn query() -> QueryId {
        "1".repeat(64).parse().unwrap()
    }

    fn stream_of(messages: Vec<Result<BusMessage, NotificationBusError>>) -> MessageStream {
        Box::pin(futures::stream::iter(messages))
    }

    fn result_at(n: u64) -> BusMessage {
        BusMessage {
            position: Some(Position::new(n)),
            body: EventBody::result(json!({ "n": n })),
        }
    }

    #[tokio::test]
    async fn starts_with_progress_then_ends_after_terminal() {
        let messages = stream_of(vec![
            Ok(result_at(0)),
            Ok(result_at(1)),
            Ok(BusMessage {
                position: Some(Position::new(2)),
                body: EventBody::Completed { total_flights: 2 },
            }),
            Ok(result_at(3)),
        ]);
        let session = LiveSession::new(query(), messages, 2, None, None);
        let notifications: Vec<Notification> = session.into_stream().collect().await;

        assert_eq!(notifications.len(), 4);
        assert_eq!(notifications[0], Notification::starting());
        assert_eq!(notifications[1].progress().value(), 50);
        assert_eq!(notifications[2].progress().value(), 99);
        assert_eq!(notifications[3], Notification::completed(2, None));
    }

    #[tokio::test]
    async fn cancelled_short_circuits() {
        let messages = stream_of(vec![
            Ok(BusMessage::unrecorded(EventBody::Cancelled { total_flights: 0 })),
            Ok(result_at(0)),
        ]);
        let session = LiveSession::new(query(), messages, 10, None, None);
        let notifications: Vec<Notification> = session.into_stream().collect().await;
        assert_eq!(
            notifications,
            vec![Notification::starting(), Notification::cancelled(None)]
        );
    }

    #[tokio::test]
    async fn late_joiner_gets_logged_terminal() {
        let terminal = querycast_core::event::ResultEvent::new(
            Position::new(5),
            EventBody::Completed { total_flights: 5 },
        );
        let pending: MessageStream = Box::pin(futures::stream::pending());
        let mut session = LiveSession::new(query(), pending, 5, Some(&terminal), None);

        assert_eq!(session.next().await, Some(Notification::starting()));
        assert_eq!(session.next().await, Some(Notification::completed(5, None)));
        assert_eq!(session.next().await, None);
    }

    #[tokio::test]
    async fn lag_is_skipped() {
        let messages = stream_of(vec![
            Err(NotificationBusError::Lagged { skipped: 4 }),
            Ok(result_at(5)),
        ]);
        let mut session = LiveSession::new(query(), messages, 10, None, None);
        session.next().await;

        let flight = session.next().await.unwrap();
        assert!(matches!(flight, Notification::Flight { received_flights: 6, .. }));
        assert_eq!(session.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_yields_timeout_and_keeps_going() {
        let pending: MessageStream = Box::pin(futures::stream::pending());
        let mut session =
            LiveSession::new(query(), pending, 3, None, Some(Duration::from_secs(30)));
        session.next().await;

        let timeout = session.next().await.unwrap();
        assert_eq!(timeout.event_name(), "timeout");
        assert!(!timeout.is_terminal());

        let again = session.next().await.unwrap();
        assert_eq!(again.event_name(), "timeout");
    }
}
