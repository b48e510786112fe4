//! Observability event stream
//!
//! The EventBus is a pub/sub channel for telemetry and for approval requests.
//! Every subscriber owns a bounded channel, so a slow consumer can never cause
//! unbounded memory growth. Subscriptions are made either for a specific
//! `EventKind` or for `EventKind::All`.
//!
//! Two delivery modes exist:
//! - `try_publish` never waits. A full subscriber channel drops the event and
//!   the drop is logged. Background task telemetry uses this mode.
//! - `publish` waits for capacity. Approval requests use this mode because a
//!   dropped request would leave the gate waiting for its timeout.

use crate::agent::AgentExecutionState;
use crate::approval::ApprovalAction;
use crate::session::AgentMode;
use sdk::errors::EngineError;
use sdk::types::{ToolCall, ToolExecutionResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

/// Default capacity of each subscriber channel
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Event kinds that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    /// Non-terminal status update from a background task
    TaskStatusUpdated,
    /// A background task is waiting for input
    TaskInputRequired,
    /// A background task finished successfully
    TaskCompleted,
    /// A background task finished with an error
    TaskFailed,
    /// A tool call is waiting for an approval decision
    ApprovalRequested,
    /// The turn state machine moved to a new state
    StateTransition,
    /// The session agent mode changed
    AgentModeChanged,
    /// Subscribe to all event kinds
    All,
}

/// Events published on the bus
#[derive(Debug, Clone)]
pub enum Event {
    TaskStatusUpdated {
        task_id: String,
        status: String,
        message: Option<String>,
    },
    TaskInputRequired {
        task_id: String,
        message: Option<String>,
    },
    TaskCompleted {
        task_id: String,
        result: ToolExecutionResult,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    ApprovalRequested {
        request_id: String,
        tool_call: ToolCall,
        responder: ApprovalResponder,
    },
    StateTransition {
        from: AgentExecutionState,
        to: AgentExecutionState,
    },
    AgentModeChanged {
        mode: AgentMode,
    },
}

impl Event {
    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TaskStatusUpdated { .. } => EventKind::TaskStatusUpdated,
            Event::TaskInputRequired { .. } => EventKind::TaskInputRequired,
            Event::TaskCompleted { .. } => EventKind::TaskCompleted,
            Event::TaskFailed { .. } => EventKind::TaskFailed,
            Event::ApprovalRequested { .. } => EventKind::ApprovalRequested,
            Event::StateTransition { .. } => EventKind::StateTransition,
            Event::AgentModeChanged { .. } => EventKind::AgentModeChanged,
        }
    }
}

/// Single-use response slot carried by an approval request
///
/// Clones share the same slot. The first `respond` wins; later calls on any
/// clone return false.
#[derive(Clone)]
pub struct ApprovalResponder {
    slot: Arc<Mutex<Option<oneshot::Sender<ApprovalAction>>>>,
}

impl ApprovalResponder {
    /// Create a responder and the receiver the gate waits on
    pub fn channel() -> (Self, oneshot::Receiver<ApprovalAction>) {
        let (tx, rx) = oneshot::channel();
        let responder = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (responder, rx)
    }

    /// Deliver a decision
    ///
    /// Returns false if a decision was already delivered or the requester
    /// stopped waiting.
    pub fn respond(&self, action: ApprovalAction) -> bool {
        let sender = self
            .slot
            .lock()
            .expect("ApprovalResponder lock poisoned")
            .take();

        match sender {
            Some(tx) => tx.send(action).is_ok(),
            None => false,
        }
    }

    /// Whether the slot has already been used
    pub fn is_answered(&self) -> bool {
        self.slot
            .lock()
            .expect("ApprovalResponder lock poisoned")
            .is_none()
    }
}

impl fmt::Debug for ApprovalResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalResponder")
            .field("answered", &self.is_answered())
            .finish()
    }
}

/// Pub/sub bus for observability events and approval requests
pub struct EventBus {
    channels: RwLock<HashMap<EventKind, Vec<mpsc::Sender<Event>>>>,
    buffer: usize,
}

impl EventBus {
    /// Create a bus with the default per-subscriber capacity
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_EVENT_BUFFER)
    }

    /// Create a bus with a custom per-subscriber capacity (minimum 1)
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Subscribe to an event kind, or `EventKind::All`
    pub fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.channels
            .write()
            .expect("EventBus lock poisoned")
            .entry(kind)
            .or_default()
            .push(tx);
        rx
    }

    /// Whether any live subscriber would receive an event of this kind
    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        let channels = self.channels.read().expect("EventBus lock poisoned");
        [kind, EventKind::All].iter().any(|k| {
            channels
                .get(k)
                .is_some_and(|subs| subs.iter().any(|tx| !tx.is_closed()))
        })
    }

    /// Snapshot the senders for an event kind so no lock is held while sending
    fn recipients(&self, kind: EventKind) -> Vec<mpsc::Sender<Event>> {
        let channels = self.channels.read().expect("EventBus lock poisoned");
        let mut recipients = Vec::new();
        for key in [kind, EventKind::All] {
            if let Some(subscribers) = channels.get(&key) {
                recipients.extend(subscribers.iter().cloned());
            }
        }
        recipients
    }

    fn prune_closed(&self) {
        let mut channels = self.channels.write().expect("EventBus lock poisoned");
        for subscribers in channels.values_mut() {
            subscribers.retain(|tx| !tx.is_closed());
        }
    }

    /// Deliver an event without waiting
    ///
    /// Every subscriber with room receives the event. If any subscriber's
    /// channel is full the event is dropped for that subscriber, a warning is
    /// logged and `EventStreamSaturated` is returned.
    pub fn try_publish(&self, event: Event) -> Result<usize, EngineError> {
        let kind = event.kind();
        let mut delivered = 0;
        let mut saturated = false;
        let mut closed = false;

        for tx in self.recipients(kind) {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => saturated = true,
                Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
            }
        }

        if closed {
            self.prune_closed();
        }

        if saturated {
            tracing::warn!(event = ?kind, delivered, "Event stream saturated, event dropped");
            return Err(EngineError::EventStreamSaturated(format!("{:?}", kind)));
        }

        Ok(delivered)
    }

    /// Deliver an event, waiting for capacity on each subscriber
    ///
    /// Returns the number of subscribers that received it.
    pub async fn publish(&self, event: Event) -> usize {
        let mut delivered = 0;
        let mut closed = false;

        for tx in self.recipients(event.kind()) {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                closed = true;
            }
        }

        if closed {
            self.prune_closed();
        }

        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
