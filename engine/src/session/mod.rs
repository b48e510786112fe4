//! Session state
//!
//! Holds the session-wide agent mode. The approval gate and the standard
//! approval policy read and write it through the `StateManager` trait.

use crate::events::{Event, EventBus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Session-wide agent mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Normal operation, the approval policy decides
    #[default]
    Standard,
    /// Planning only
    Plan,
    /// Every tool call is accepted without asking
    AutoAccept,
}

impl AgentMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentMode::Standard => "Standard",
            AgentMode::Plan => "Plan",
            AgentMode::AutoAccept => "Auto-Accept",
        }
    }

    /// Next mode in the Standard -> Plan -> AutoAccept cycle
    pub fn next(&self) -> Self {
        match self {
            AgentMode::Standard => AgentMode::Plan,
            AgentMode::Plan => AgentMode::AutoAccept,
            AgentMode::AutoAccept => AgentMode::Standard,
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Access to the session's agent mode
pub trait StateManager: Send + Sync {
    fn agent_mode(&self) -> AgentMode;

    fn set_agent_mode(&self, mode: AgentMode);

    fn is_auto_accept(&self) -> bool {
        self.agent_mode() == AgentMode::AutoAccept
    }
}

/// In-process session state
#[derive(Default)]
pub struct SessionState {
    mode: RwLock<AgentMode>,
    events: Option<Arc<EventBus>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce mode changes on the given bus
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            mode: RwLock::new(AgentMode::default()),
            events: Some(events),
        }
    }

    /// Advance to the next mode and return it
    pub fn cycle_agent_mode(&self) -> AgentMode {
        let next = self.agent_mode().next();
        self.set_agent_mode(next);
        next
    }
}

impl StateManager for SessionState {
    fn agent_mode(&self) -> AgentMode {
        *self.mode.read().expect("SessionState lock poisoned")
    }

    fn set_agent_mode(&self, mode: AgentMode) {
        let previous = {
            let mut current = self.mode.write().expect("SessionState lock poisoned");
            std::mem::replace(&mut *current, mode)
        };

        if previous == mode {
            return;
        }

        tracing::info!(from = %previous, to = %mode, "Agent mode changed");

        if let Some(events) = &self.events {
            // Telemetry only
            let _ = events.try_publish(Event::AgentModeChanged { mode });
        }
    }
}
