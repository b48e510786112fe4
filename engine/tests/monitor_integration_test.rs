//! Integration tests for the background task monitor
//!
//! Covers the supervisor lifecycle against a live tracker:
//! - Terminal outcomes enqueue exactly once, even when events are dropped
//! - Status and input-required events
//! - Concurrent ticks never start duplicate supervisors
//! - Shutdown through `stop` and through the start token

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use sdk::types::ToolExecutionResult;
use steward_engine::events::{Event, EventBus, EventKind};
use steward_engine::monitor::{
    BackgroundTaskMonitor, InMemoryTaskTracker, TaskPollingState, TaskTracker,
    INPUT_REQUIRED_STATUS,
};
use steward_engine::queue::MessageQueue;
use steward_engine::session::AgentMode;

/// Tracker that counts stop_polling calls
#[derive(Default)]
struct CountingTracker {
    inner: InMemoryTaskTracker,
    stops: AtomicUsize,
}

impl TaskTracker for CountingTracker {
    fn polling_task_ids(&self) -> Vec<String> {
        self.inner.polling_task_ids()
    }

    fn polling_state(&self, task_id: &str) -> Option<Arc<TaskPollingState>> {
        self.inner.polling_state(task_id)
    }

    fn stop_polling(&self, task_id: &str) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.stop_polling(task_id);
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_saturated_bus_still_enqueues_once() {
    let tracker = Arc::new(CountingTracker::default());
    let handle = tracker.inner.start_polling("task-a", "agent-a");

    let events = Arc::new(EventBus::with_buffer(1));
    let queue = Arc::new(MessageQueue::new());

    // Fill the only slot of a subscriber that never reads
    let _stalled = events.subscribe(EventKind::All);
    events
        .try_publish(Event::AgentModeChanged {
            mode: AgentMode::Plan,
        })
        .unwrap();

    let monitor = BackgroundTaskMonitor::new(
        tracker.clone(),
        Arc::clone(&events),
        Arc::clone(&queue),
        "req-1",
    );

    assert_eq!(monitor.tick(), 1);
    handle
        .complete(ToolExecutionResult::success("Delegate", serde_json::json!("42")))
        .await
        .unwrap();

    wait_until(|| monitor.active_monitors().is_empty()).await;

    assert_eq!(queue.size(), 1);
    assert_eq!(tracker.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        queue.dequeue().unwrap().message.content,
        "[System] The background task task-a from agent-a has completed. Result: 42"
    );

    // Terminal outcome stopped polling, so later ticks find nothing
    assert_eq!(monitor.tick(), 0);
}

#[tokio::test]
async fn test_status_updates_and_input_required() {
    let tracker = Arc::new(InMemoryTaskTracker::new());
    let handle = tracker.start_polling("task-a", "agent-a");

    let events = Arc::new(EventBus::new());
    let queue = Arc::new(MessageQueue::new());
    let mut statuses = events.subscribe(EventKind::TaskStatusUpdated);
    let mut input = events.subscribe(EventKind::TaskInputRequired);

    let monitor = BackgroundTaskMonitor::new(
        tracker.clone(),
        Arc::clone(&events),
        Arc::clone(&queue),
        "req-1",
    );
    monitor.tick();

    handle.update_status("working", None).await.unwrap();
    handle
        .update_status(INPUT_REQUIRED_STATUS, Some("Which branch?".to_string()))
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(5), statuses.recv()).await.unwrap().unwrap();
    assert!(matches!(first, Event::TaskStatusUpdated { status, .. } if status == "working"));

    let second = timeout(Duration::from_secs(5), statuses.recv()).await.unwrap().unwrap();
    assert!(
        matches!(second, Event::TaskStatusUpdated { status, .. } if status == INPUT_REQUIRED_STATUS)
    );

    let needs_input = timeout(Duration::from_secs(5), input.recv()).await.unwrap().unwrap();
    match needs_input {
        Event::TaskInputRequired { task_id, message } => {
            assert_eq!(task_id, "task-a");
            assert_eq!(message.as_deref(), Some("Which branch?"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Status updates are not terminal
    assert!(tracker.is_polling("task-a"));
    assert!(queue.is_empty());
    assert_eq!(
        tracker.polling_state("task-a").unwrap().last_known_status().as_deref(),
        Some(INPUT_REQUIRED_STATUS)
    );

    monitor.stop();
}

#[tokio::test]
async fn test_error_source_enqueues_failure() {
    let tracker = Arc::new(InMemoryTaskTracker::new());
    let handle = tracker.start_polling("task-b", "agent-b");

    let events = Arc::new(EventBus::new());
    let queue = Arc::new(MessageQueue::new());
    let mut failures = events.subscribe(EventKind::TaskFailed);

    let monitor = BackgroundTaskMonitor::new(
        tracker.clone(),
        Arc::clone(&events),
        Arc::clone(&queue),
        "req-2",
    );
    monitor.tick();

    handle.fail("connection reset").await.unwrap();

    let event = timeout(Duration::from_secs(5), failures.recv()).await.unwrap().unwrap();
    assert!(matches!(event, Event::TaskFailed { error, .. } if error == "connection reset"));

    wait_until(|| !queue.is_empty()).await;
    let queued = queue.dequeue().unwrap();
    assert_eq!(
        queued.message.content,
        "[System] The background task task-b from agent-b has failed. Error: connection reset"
    );
    assert_eq!(queued.request_id, "req-2");
    assert!(!tracker.is_polling("task-b"));
}

#[tokio::test]
async fn test_failed_result_enqueues_failure_summary() {
    let tracker = Arc::new(InMemoryTaskTracker::new());
    let handle = tracker.start_polling("task-c", "agent-c");
    let queue = Arc::new(MessageQueue::new());

    let monitor = BackgroundTaskMonitor::new(
        tracker.clone(),
        Arc::new(EventBus::new()),
        Arc::clone(&queue),
        "req-3",
    );
    monitor.tick();

    handle
        .complete(ToolExecutionResult::failure("Delegate", "quota exceeded"))
        .await
        .unwrap();

    wait_until(|| !queue.is_empty()).await;
    let content = queue.dequeue().unwrap().message.content;
    assert!(content.starts_with("[System] The background task task-c from agent-c has failed."));
    assert!(content.contains("quota exceeded"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ticks_never_duplicate_supervisors() {
    let tracker = Arc::new(InMemoryTaskTracker::new());
    let handles: Vec<_> = (0..8)
        .map(|i| tracker.start_polling(format!("task-{}", i), "agent"))
        .collect();

    let monitor = Arc::new(BackgroundTaskMonitor::new(
        tracker.clone(),
        Arc::new(EventBus::new()),
        Arc::new(MessageQueue::new()),
        "req-1",
    ));

    // Watch the active set while the ticks race
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let monitor = Arc::clone(&monitor);
        let done = Arc::clone(&done);
        let limit = handles.len();
        tokio::spawn(async move {
            loop {
                let active = monitor.active_monitors().len();
                assert!(active <= limit, "{} supervisors for {} tasks", active, limit);
                if done.load(Ordering::SeqCst) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let ticks: Vec<_> = (0..16)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.tick() })
        })
        .collect();

    let mut started = 0;
    for tick in ticks {
        started += tick.await.unwrap();
    }

    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert_eq!(started, handles.len());
    assert_eq!(monitor.active_monitors().len(), handles.len());

    monitor.stop();
    assert!(monitor.active_monitors().is_empty());
}

#[tokio::test]
async fn test_restored_sources_resume_after_restart() {
    let tracker = Arc::new(InMemoryTaskTracker::new());
    let handle = tracker.start_polling("task-a", "agent-a");
    let queue = Arc::new(MessageQueue::new());
    let events = Arc::new(EventBus::new());

    let first = BackgroundTaskMonitor::new(
        tracker.clone(),
        Arc::clone(&events),
        Arc::clone(&queue),
        "req-1",
    );
    first.tick();
    first.stop();

    // The cancelled supervisor hands the sources back to the task state
    let state = tracker.polling_state("task-a").unwrap();
    wait_until(|| state.take_sources().map(|s| state.restore_sources(s)).is_some()).await;

    let second = BackgroundTaskMonitor::new(
        tracker.clone(),
        Arc::clone(&events),
        Arc::clone(&queue),
        "req-1",
    );
    assert_eq!(second.tick(), 1);

    handle
        .complete(ToolExecutionResult::success("Delegate", serde_json::json!("done")))
        .await
        .unwrap();

    wait_until(|| !queue.is_empty()).await;
    assert_eq!(queue.size(), 1);
}

#[tokio::test]
async fn test_start_runs_until_token_cancelled() {
    let tracker = Arc::new(InMemoryTaskTracker::new());
    let _handle = tracker.start_polling("task-a", "agent-a");

    let monitor = Arc::new(
        BackgroundTaskMonitor::new(
            tracker.clone(),
            Arc::new(EventBus::new()),
            Arc::new(MessageQueue::new()),
            "req-1",
        )
        .with_tick_interval(Duration::from_millis(10)),
    );

    let cancel = CancellationToken::new();
    let running = {
        let monitor = Arc::clone(&monitor);
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.start(cancel).await })
    };

    wait_until(|| monitor.active_monitors().contains("task-a")).await;

    cancel.cancel();
    timeout(Duration::from_secs(5), running)
        .await
        .expect("monitor did not stop")
        .unwrap();

    assert!(monitor.active_monitors().is_empty());
    // Cancelling the supervisors leaves the task polling
    assert!(tracker.is_polling("task-a"));
}

#[tokio::test]
async fn test_stop_ends_start_loop() {
    let monitor = Arc::new(
        BackgroundTaskMonitor::new(
            Arc::new(InMemoryTaskTracker::new()),
            Arc::new(EventBus::new()),
            Arc::new(MessageQueue::new()),
            "req-1",
        )
        .with_tick_interval(Duration::from_millis(10)),
    );

    let running = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.start(CancellationToken::new()).await })
    };

    sleep(Duration::from_millis(30)).await;
    monitor.stop();

    timeout(Duration::from_secs(5), running)
        .await
        .expect("monitor did not stop")
        .unwrap();
    assert!(monitor.is_stopped());
}
