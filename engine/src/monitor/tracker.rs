//! Background task tracking
//!
//! A task tracker owns the polling state of every delegated background task.
//! The monitor only borrows that state: it lends the three event sources from
//! `TaskPollingState` to a supervisor and gives them back if the supervisor is
//! cancelled before the task finishes.

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::ToolExecutionResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// Status reported by a task that is waiting for user input
pub const INPUT_REQUIRED_STATUS: &str = "input-required";

const STATUS_BUFFER_SIZE: usize = 32;

/// Non-terminal status change of a background task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusUpdate {
    pub task_id: String,
    pub status: String,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatusUpdate {
    pub fn new(
        task_id: impl Into<String>,
        status: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: status.into(),
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn is_input_required(&self) -> bool {
        self.status == INPUT_REQUIRED_STATUS
    }
}

/// The three independent event sources of one background task
#[derive(Debug)]
pub struct TaskEventSources {
    pub result: mpsc::Receiver<ToolExecutionResult>,
    pub status: mpsc::Receiver<TaskStatusUpdate>,
    pub error: mpsc::Receiver<String>,
}

/// Polling state of one delegated task
#[derive(Debug)]
pub struct TaskPollingState {
    task_id: String,
    source_agent: String,
    started_at: DateTime<Utc>,
    polling: AtomicBool,
    last_known_status: RwLock<Option<String>>,
    sources: Mutex<Option<TaskEventSources>>,
}

impl TaskPollingState {
    pub fn new(
        task_id: impl Into<String>,
        source_agent: impl Into<String>,
        sources: TaskEventSources,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            source_agent: source_agent.into(),
            started_at: Utc::now(),
            polling: AtomicBool::new(true),
            last_known_status: RwLock::new(None),
            sources: Mutex::new(Some(sources)),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Identity of the agent running the task
    pub fn source_agent(&self) -> &str {
        &self.source_agent
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    pub fn mark_stopped(&self) {
        self.polling.store(false, Ordering::SeqCst);
    }

    pub fn last_known_status(&self) -> Option<String> {
        self.last_known_status
            .read()
            .expect("TaskPollingState lock poisoned")
            .clone()
    }

    pub fn set_last_known_status(&self, status: impl Into<String>) {
        *self
            .last_known_status
            .write()
            .expect("TaskPollingState lock poisoned") = Some(status.into());
    }

    /// Borrow the event sources. `None` while another supervisor holds them.
    pub fn take_sources(&self) -> Option<TaskEventSources> {
        self.sources
            .lock()
            .expect("TaskPollingState lock poisoned")
            .take()
    }

    /// Return previously borrowed event sources
    pub fn restore_sources(&self, sources: TaskEventSources) {
        *self.sources.lock().expect("TaskPollingState lock poisoned") = Some(sources);
    }
}

/// Producer side of a tracked task's event sources
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: String,
    result: mpsc::Sender<ToolExecutionResult>,
    status: mpsc::Sender<TaskStatusUpdate>,
    error: mpsc::Sender<String>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Report the terminal result
    pub async fn complete(&self, result: ToolExecutionResult) -> Result<(), EngineError> {
        self.result
            .send(result)
            .await
            .map_err(|_| EngineError::TrackerInconsistency(self.task_id.clone()))
    }

    /// Report a non-terminal status change
    pub async fn update_status(
        &self,
        status: impl Into<String>,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        let update = TaskStatusUpdate::new(&self.task_id, status, message);
        self.status
            .send(update)
            .await
            .map_err(|_| EngineError::TrackerInconsistency(self.task_id.clone()))
    }

    /// Report a terminal error
    pub async fn fail(&self, error: impl Into<String>) -> Result<(), EngineError> {
        self.error
            .send(error.into())
            .await
            .map_err(|_| EngineError::TrackerInconsistency(self.task_id.clone()))
    }
}

/// Source of background tasks the monitor supervises
pub trait TaskTracker: Send + Sync {
    /// Ids of every task currently being polled
    fn polling_task_ids(&self) -> Vec<String>;

    fn polling_state(&self, task_id: &str) -> Option<Arc<TaskPollingState>>;

    fn is_polling(&self, task_id: &str) -> bool {
        self.polling_state(task_id)
            .is_some_and(|state| state.is_polling())
    }

    /// Stop polling a task that reached a terminal outcome
    fn stop_polling(&self, task_id: &str);
}

/// Task tracker kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryTaskTracker {
    tasks: RwLock<HashMap<String, Arc<TaskPollingState>>>,
}

impl InMemoryTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and return the handle its worker reports through
    ///
    /// Registering an id that is already tracked replaces the old state.
    pub fn start_polling(
        &self,
        task_id: impl Into<String>,
        source_agent: impl Into<String>,
    ) -> TaskHandle {
        let task_id = task_id.into();
        let (result_tx, result_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = mpsc::channel(STATUS_BUFFER_SIZE);
        let (error_tx, error_rx) = mpsc::channel(1);

        let state = TaskPollingState::new(
            &task_id,
            source_agent,
            TaskEventSources {
                result: result_rx,
                status: status_rx,
                error: error_rx,
            },
        );

        tracing::debug!(
            task_id = %task_id,
            source_agent = %state.source_agent(),
            "Started polling task"
        );

        self.tasks
            .write()
            .expect("InMemoryTaskTracker lock poisoned")
            .insert(task_id.clone(), Arc::new(state));

        TaskHandle {
            task_id,
            result: result_tx,
            status: status_tx,
            error: error_tx,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks
            .read()
            .expect("InMemoryTaskTracker lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskTracker for InMemoryTaskTracker {
    fn polling_task_ids(&self) -> Vec<String> {
        let tasks = self.tasks.read().expect("InMemoryTaskTracker lock poisoned");
        let mut ids: Vec<String> = tasks
            .iter()
            .filter(|(_, state)| state.is_polling())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn polling_state(&self, task_id: &str) -> Option<Arc<TaskPollingState>> {
        self.tasks
            .read()
            .expect("InMemoryTaskTracker lock poisoned")
            .get(task_id)
            .cloned()
    }

    fn stop_polling(&self, task_id: &str) {
        let removed = self
            .tasks
            .write()
            .expect("InMemoryTaskTracker lock poisoned")
            .remove(task_id);

        match removed {
            Some(state) => {
                state.mark_stopped();
                tracing::debug!(task_id, "Stopped polling task");
            }
            None => tracing::debug!(task_id, "Stop requested for untracked task"),
        }
    }
}
