//! Background task monitor
//!
//! Watches delegated background tasks and feeds their outcome back into the
//! conversation. A periodic tick looks for newly polling tasks and starts one
//! supervisor per task id. Each supervisor races the task's result, status and
//! error sources against its own cancellation:
//!
//! - result: stop polling, emit completion or failure, enqueue a summary
//! - status: record it, emit a status event (plus input-required if needed)
//! - error: stop polling, emit failure, enqueue a failure summary
//! - cancellation: give the sources back to the task state and exit
//!
//! Events go out through `EventBus::try_publish` and may be dropped when a
//! subscriber is saturated. The MessageQueue enqueue is never dropped.

pub mod active;
pub mod tracker;

pub use active::ActiveMonitorSet;
pub use tracker::{
    InMemoryTaskTracker, TaskEventSources, TaskHandle, TaskPollingState, TaskStatusUpdate,
    TaskTracker, INPUT_REQUIRED_STATUS,
};

use crate::conversation::{PlainResultFormatter, ResultFormatter};
use crate::events::{Event, EventBus};
use crate::queue::MessageQueue;
use sdk::errors::EngineError;
use sdk::types::{Message, ToolExecutionResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default interval between scans for new polling tasks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Supervises background tasks reported by a `TaskTracker`
pub struct BackgroundTaskMonitor {
    tracker: Arc<dyn TaskTracker>,
    events: Arc<EventBus>,
    queue: Arc<MessageQueue>,
    formatter: Arc<dyn ResultFormatter>,
    request_id: String,
    tick_interval: Duration,
    active: Arc<ActiveMonitorSet>,
    shutdown: CancellationToken,
}

impl BackgroundTaskMonitor {
    pub fn new(
        tracker: Arc<dyn TaskTracker>,
        events: Arc<EventBus>,
        queue: Arc<MessageQueue>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            events,
            queue,
            formatter: Arc::new(PlainResultFormatter),
            request_id: request_id.into(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            active: Arc::new(ActiveMonitorSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ResultFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Supervisors currently running
    pub fn active_monitors(&self) -> &ActiveMonitorSet {
        &self.active
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run the poll loop until `cancel` fires or `stop` is called
    ///
    /// Every running supervisor is cancelled before this returns.
    pub async fn start(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            request_id = %self.request_id,
            tick_ms = u64::try_from(self.tick_interval.as_millis()).unwrap_or(u64::MAX),
            "Background task monitor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        let cancelled = self.active.cancel_all();
        tracing::info!(
            request_id = %self.request_id,
            cancelled,
            "Background task monitor stopped"
        );
    }

    /// Stop the monitor and cancel every supervisor
    ///
    /// A stopped monitor starts no new supervisors.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let cancelled = self.active.cancel_all();
        tracing::debug!(cancelled, "Cancelled active supervisors");
    }

    /// Start supervisors for polling tasks that have none. Returns how many started.
    pub fn tick(&self) -> usize {
        let mut started = 0;

        for task_id in self.tracker.polling_task_ids() {
            if self.active.contains(&task_id) {
                continue;
            }

            match self.tracker.polling_state(&task_id) {
                Some(state) if state.is_polling() => {
                    if self.monitor_task(&task_id, state) {
                        started += 1;
                    }
                }
                _ => {
                    tracing::debug!(task_id = %task_id, "Task no longer polling, skipping");
                }
            }
        }

        started
    }

    /// Start a supervisor for one task
    ///
    /// Returns false if the task is already supervised, its sources are lent
    /// elsewhere, or the monitor is stopped.
    pub fn monitor_task(&self, task_id: &str, state: Arc<TaskPollingState>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        let cancel = self.shutdown.child_token();
        let Some(generation) = self.active.try_insert(task_id, cancel.clone()) else {
            return false;
        };

        let Some(sources) = state.take_sources() else {
            self.active.remove(task_id, generation);
            tracing::debug!(task_id, "Task sources already in use");
            return false;
        };

        tracing::debug!(
            task_id,
            source_agent = %state.source_agent(),
            "Supervising background task"
        );

        let supervisor = Supervisor {
            task_id: task_id.to_string(),
            state,
            tracker: Arc::clone(&self.tracker),
            events: Arc::clone(&self.events),
            queue: Arc::clone(&self.queue),
            formatter: Arc::clone(&self.formatter),
            request_id: self.request_id.clone(),
            active: Arc::clone(&self.active),
            generation,
            cancel,
        };

        tokio::spawn(supervisor.run(sources));
        true
    }
}

enum Step {
    Cancelled,
    Result(Option<ToolExecutionResult>),
    Status(Option<TaskStatusUpdate>),
    Error(Option<String>),
}

struct Supervisor {
    task_id: String,
    state: Arc<TaskPollingState>,
    tracker: Arc<dyn TaskTracker>,
    events: Arc<EventBus>,
    queue: Arc<MessageQueue>,
    formatter: Arc<dyn ResultFormatter>,
    request_id: String,
    active: Arc<ActiveMonitorSet>,
    generation: u64,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, mut sources: TaskEventSources) {
        let mut result_open = true;
        let mut status_open = true;
        let mut error_open = true;

        loop {
            if !result_open && !status_open && !error_open {
                let error = EngineError::TrackerInconsistency(self.task_id.clone());
                tracing::warn!(
                    task_id = %self.task_id,
                    error = %error,
                    "All task event sources closed"
                );
                self.tracker.stop_polling(&self.task_id);
                break;
            }

            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancelled,
                result = sources.result.recv(), if result_open => Step::Result(result),
                update = sources.status.recv(), if status_open => Step::Status(update),
                error = sources.error.recv(), if error_open => Step::Error(error),
            };

            match step {
                Step::Cancelled => {
                    tracing::debug!(task_id = %self.task_id, "Supervisor cancelled");
                    self.state.restore_sources(sources);
                    break;
                }
                Step::Result(Some(result)) => {
                    self.on_result(result);
                    break;
                }
                Step::Status(Some(update)) => self.on_status(update),
                Step::Error(Some(error)) => {
                    self.on_error(error);
                    break;
                }
                Step::Result(None) => result_open = false,
                Step::Status(None) => status_open = false,
                Step::Error(None) => error_open = false,
            }
        }

        self.active.remove(&self.task_id, self.generation);
    }

    fn emit(&self, event: Event) {
        // Dropped events are logged by the bus
        let _ = self.events.try_publish(event);
    }

    fn enqueue(&self, content: String) {
        self.queue.enqueue(Message::user(content), &self.request_id);
    }

    fn on_result(&self, result: ToolExecutionResult) {
        self.tracker.stop_polling(&self.task_id);

        let elapsed = chrono::Utc::now() - self.state.started_at();
        tracing::info!(
            task_id = %self.task_id,
            success = result.success,
            elapsed_ms = elapsed.num_milliseconds(),
            "Background task completed"
        );

        let formatted = self.formatter.format_tool_result(&result);
        let summary = if result.success {
            format!(
                "[System] The background task {} from {} has completed. Result: {}",
                self.task_id,
                self.state.source_agent(),
                formatted
            )
        } else {
            format!(
                "[System] The background task {} from {} has failed. {}",
                self.task_id,
                self.state.source_agent(),
                formatted
            )
        };

        let event = if result.success {
            Event::TaskCompleted {
                task_id: self.task_id.clone(),
                result,
            }
        } else {
            Event::TaskFailed {
                task_id: self.task_id.clone(),
                error: result.error.unwrap_or_default(),
            }
        };

        self.emit(event);
        self.enqueue(summary);
    }

    fn on_status(&self, update: TaskStatusUpdate) {
        tracing::debug!(task_id = %self.task_id, status = %update.status, "Background task status");

        self.state.set_last_known_status(&update.status);

        let input_required = update.is_input_required();
        self.emit(Event::TaskStatusUpdated {
            task_id: self.task_id.clone(),
            status: update.status,
            message: update.message.clone(),
        });

        if input_required {
            self.emit(Event::TaskInputRequired {
                task_id: self.task_id.clone(),
                message: update.message,
            });
        }
    }

    fn on_error(&self, error: String) {
        self.tracker.stop_polling(&self.task_id);

        tracing::error!(task_id = %self.task_id, error = %error, "Background task failed");

        self.emit(Event::TaskFailed {
            task_id: self.task_id.clone(),
            error: error.clone(),
        });
        self.enqueue(format!(
            "[System] The background task {} from {} has failed. Error: {}",
            self.task_id,
            self.state.source_agent(),
            error
        ));
    }
}
