//! End-to-end scenarios over the in-memory engine: start, produce, deliver,
//! cancel, clean up.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use futures::StreamExt;
use querycast_core::event::{EventBody, EventKind, Position};
use querycast_core::event_log::EventLog;
use querycast_core::notification::Notification;
use querycast_core::notification_bus::NotificationBus;
use querycast_core::query::QueryState;
use querycast_runtime::delivery::DeliveryError;
use querycast_runtime::engine::{EngineConfig, SearchEngine};
use querycast_runtime::memory_bus::InMemoryNotificationBus;
use querycast_runtime::memory_log::InMemoryEventLog;
use querycast_runtime::producer::{ProducerConfig, ResultSource, SearchPlan};
use querycast_testing::helpers::{drain_cursor, fast_config, init_tracing, search_params, test_engine};
use querycast_testing::{FailingEventLog, ScriptedSource};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn source(name: &str) -> Arc<dyn ResultSource> {
    Arc::new(ScriptedSource::new(name))
}

fn plan(counts: &[(&str, u64)]) -> SearchPlan {
    counts
        .iter()
        .fold(SearchPlan::new(), |plan, (name, count)| plan.with(source(name), *count))
}

/// Long enough that nothing is produced before the test acts.
fn slow_config() -> EngineConfig {
    EngineConfig {
        producer: ProducerConfig::new(Duration::from_millis(200), Duration::from_millis(300)),
        ..fast_config()
    }
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("scenario finished in time")
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn three_results_then_completed_in_position_order() {
    init_tracing();
    let engine = test_engine(Vec::new());
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 3)]))
        .await
        .unwrap();

    let notifications = within(drain_cursor(&engine, &id, 50)).await;
    let delivered: Vec<&Notification> = notifications
        .iter()
        .filter(|n| n.event_name() != "timeout")
        .collect();

    assert_eq!(delivered.len(), 4);
    for (i, notification) in delivered[..3].iter().enumerate() {
        assert_eq!(notification.event_name(), "flight");
        assert_eq!(notification.last_seen_index(), Some(i as u64 + 1));
        assert!(notification.progress().value() <= 99);
    }
    assert_eq!(*delivered[3], Notification::completed(3, Some(4)));

    let events = engine.log().read_from(&id, Position::ZERO).await.unwrap();
    let positions: Vec<u64> = events.iter().map(|e| e.position.value()).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
    assert_eq!(events[3].body, EventBody::Completed { total_flights: 3 });
    assert_eq!(engine.lookup(&id).await, Some(QueryState::Completed));
}

#[tokio::test]
async fn many_workers_complete_exactly_once() {
    let engine = test_engine(Vec::new());
    let id = engine
        .start_with_plan(
            search_params(),
            &plan(&[("kiwi", 4), ("traveloka", 4), ("tiket", 4), ("12go", 4)]),
        )
        .await
        .unwrap();

    let notifications = within(drain_cursor(&engine, &id, 100)).await;
    assert_eq!(notifications.last(), Some(&Notification::completed(16, Some(17))));

    let events = engine.log().read_from(&id, Position::ZERO).await.unwrap();
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert_eq!(events.len(), 17);
    assert!(events.last().unwrap().is_terminal());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn immediate_cancel_reports_cancelled_not_timeout() {
    let engine = SearchEngine::new(
        Arc::new(InMemoryEventLog::new()),
        Arc::new(InMemoryNotificationBus::new()),
        Vec::new(),
        slow_config(),
    );
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 5)]))
        .await
        .unwrap();

    assert!(engine.cancel(&id).await);
    assert!(!engine.cancel(&id).await);

    let reply = engine.poll(&id, 0).await.unwrap();
    assert_eq!(reply.event_name(), "cancelled");
    assert!(reply.is_terminal());

    // workers woke up and stopped, nothing follows the terminal event
    tokio::time::sleep(Duration::from_millis(400)).await;
    let events = engine.log().read_from(&id, Position::ZERO).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::Cancelled);
}

#[tokio::test]
async fn cancel_ends_live_sessions() {
    let engine = SearchEngine::new(
        Arc::new(InMemoryEventLog::new()),
        Arc::new(InMemoryNotificationBus::new()),
        Vec::new(),
        slow_config(),
    );
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 10)]))
        .await
        .unwrap();

    let first = engine.open_live(&id, None).await.unwrap().into_stream();
    let second = engine.open_live(&id, None).await.unwrap().into_stream();
    engine.cancel(&id).await;

    for session in [first.boxed(), second.boxed()] {
        let notifications: Vec<Notification> = within(session.collect()).await;
        assert_eq!(notifications.first(), Some(&Notification::starting()));
        assert_eq!(notifications.last(), Some(&Notification::cancelled(None)));
        assert!(notifications.iter().all(|n| n.event_name() != "completed"));
    }
}

#[tokio::test]
async fn cancelled_query_is_not_found_after_grace() {
    let engine = SearchEngine::new(
        Arc::new(InMemoryEventLog::new()),
        Arc::new(InMemoryNotificationBus::new()),
        Vec::new(),
        EngineConfig {
            cancel_grace: Duration::from_millis(50),
            ..slow_config()
        },
    );
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 3)]))
        .await
        .unwrap();
    engine.cancel(&id).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.poll(&id, 0).await, Err(DeliveryError::NotFound(id.clone())));
    assert!(matches!(engine.status(&id).await, Err(DeliveryError::NotFound(_))));
    assert_eq!(engine.bus().topic_count().await.unwrap(), 0);
}

#[tokio::test]
async fn shutdown_cancels_every_running_query() {
    let engine = SearchEngine::new(
        Arc::new(InMemoryEventLog::new()),
        Arc::new(InMemoryNotificationBus::new()),
        Vec::new(),
        slow_config(),
    );
    for _ in 0..3 {
        engine
            .start_with_plan(search_params(), &plan(&[("kiwi", 10)]))
            .await
            .unwrap();
    }
    assert_eq!(engine.active_count().await, 3);

    within(engine.shutdown(Duration::from_secs(1))).await;
    assert!(engine.is_shutting_down());
    assert_eq!(engine.active_count().await, 0);
    assert!(engine.registry().is_empty().await);
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn concurrent_cursor_readers_see_the_same_event() {
    let engine = test_engine(Vec::new());
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 2)]))
        .await
        .unwrap();

    let (a, b) = tokio::join!(engine.poll(&id, 0), engine.poll(&id, 0));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(a.event_name(), "flight");
    assert_eq!(a.last_seen_index(), Some(1));
}

#[tokio::test]
async fn live_progress_never_goes_backwards() {
    let engine = test_engine(Vec::new());
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 3), ("traveloka", 3)]))
        .await
        .unwrap();

    let notifications: Vec<Notification> =
        within(engine.open_live(&id, None).await.unwrap().into_stream().collect()).await;

    let progress: Vec<u8> = notifications.iter().map(|n| n.progress().value()).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(notifications.last(), Some(&Notification::completed(6, None)));
    assert!(
        notifications
            .iter()
            .filter(|n| !n.is_terminal())
            .all(|n| n.progress().value() <= 99)
    );
}

#[tokio::test]
async fn late_live_session_gets_terminal_and_ends() {
    let engine = test_engine(Vec::new());
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 2)]))
        .await
        .unwrap();
    within(drain_cursor(&engine, &id, 50)).await;

    let notifications: Vec<Notification> =
        within(engine.open_live(&id, None).await.unwrap().into_stream().collect()).await;
    assert_eq!(
        notifications,
        vec![Notification::starting(), Notification::completed(2, None)]
    );
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn failing_source_stops_only_its_worker() {
    let engine = test_engine(Vec::new());
    let healthy: Arc<dyn ResultSource> = Arc::new(ScriptedSource::new("kiwi"));
    let broken: Arc<dyn ResultSource> = Arc::new(ScriptedSource::new("tiket").failing_from(1));
    let plan = SearchPlan::new().with(healthy, 3).with(broken, 3);
    let id = engine.start_with_plan(search_params(), &plan).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.lookup(&id).await, Some(QueryState::Running));
    assert_eq!(engine.log().len(&id).await.unwrap(), 4);
    assert!(engine.log().terminal(&id).await.unwrap().is_none());

    let reply = engine.poll(&id, 4).await.unwrap();
    assert_eq!(reply.event_name(), "timeout");
    assert_eq!(reply.last_seen_index(), Some(4));
}

#[tokio::test]
async fn failed_log_write_is_recorded_by_the_mirror() {
    let log = FailingEventLog::new();
    log.fail_next(1);
    let engine = SearchEngine::new(
        Arc::new(log.clone()),
        Arc::new(InMemoryNotificationBus::new()),
        Vec::new(),
        EngineConfig {
            producer: ProducerConfig::new(Duration::from_millis(30), Duration::from_millis(40)),
            ..fast_config()
        },
    );
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 2)]))
        .await
        .unwrap();

    let notifications = within(drain_cursor(&engine, &id, 50)).await;
    assert_eq!(notifications.last(), Some(&Notification::completed(2, Some(3))));

    let events = log.inner().read_from(&id, Position::ZERO).await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Result, EventKind::Result, EventKind::Completed]
    );
}

#[tokio::test]
async fn cancel_survives_a_failed_terminal_write() {
    let log = FailingEventLog::new();
    let engine = SearchEngine::new(
        Arc::new(log.clone()),
        Arc::new(InMemoryNotificationBus::new()),
        Vec::new(),
        slow_config(),
    );
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 3)]))
        .await
        .unwrap();

    log.fail_next(1);
    assert!(engine.cancel(&id).await);

    let reply = engine.poll(&id, 0).await.unwrap();
    assert_eq!(reply.event_name(), "cancelled");
    assert!(reply.is_terminal());

    let events = log.inner().read_from(&id, Position::ZERO).await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec![EventKind::Cancelled]);
}

#[tokio::test]
async fn status_during_cancel_is_never_not_found() {
    let log = FailingEventLog::new();
    let engine = SearchEngine::new(
        Arc::new(log.clone()),
        Arc::new(InMemoryNotificationBus::new()),
        Vec::new(),
        slow_config(),
    );
    let id = engine
        .start_with_plan(search_params(), &plan(&[("kiwi", 3)]))
        .await
        .unwrap();

    // the first terminal write fails, holding the cancel in its retry delay
    log.fail_next(1);
    let (cancelled, status) = tokio::join!(engine.cancel(&id), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.status(&id).await
    });

    assert!(cancelled);
    assert_eq!(status.unwrap().state, QueryState::Cancelled);
}
