//! Turn orchestration
//!
//! This module implements the state machine that drives one conversation
//! turn and the loop that runs it against a model client, the approval gate
//! and the message queue.

pub mod context;
pub mod state;
pub mod state_machine;
pub mod turn;

pub use context::{AgentContext, PendingToolCall};
pub use state::AgentExecutionState;
pub use state_machine::{guards, TurnStateMachine};
pub use turn::{EchoModel, ModelClient, ModelResponse, TurnLoop, TurnLoopConfig, TurnOutcome};
