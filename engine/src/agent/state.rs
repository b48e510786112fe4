//! Turn execution states

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the turn loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentExecutionState {
    /// No turn in progress
    #[default]
    Idle,
    /// Draining queued messages into the conversation
    CheckingQueue,
    /// Waiting for the model
    StreamingLLM,
    /// Model response received
    PostStream,
    /// Resolving approvals for requested tool calls
    EvaluatingTools,
    /// Running approved tool calls
    ExecutingTools,
    /// Tool results recorded
    PostToolExecution,
    /// Turn finishing
    Completing,
}

impl AgentExecutionState {
    /// Every state, in turn order
    pub const ALL: [AgentExecutionState; 8] = [
        AgentExecutionState::Idle,
        AgentExecutionState::CheckingQueue,
        AgentExecutionState::StreamingLLM,
        AgentExecutionState::PostStream,
        AgentExecutionState::EvaluatingTools,
        AgentExecutionState::ExecutingTools,
        AgentExecutionState::PostToolExecution,
        AgentExecutionState::Completing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentExecutionState::Idle => "Idle",
            AgentExecutionState::CheckingQueue => "CheckingQueue",
            AgentExecutionState::StreamingLLM => "StreamingLLM",
            AgentExecutionState::PostStream => "PostStream",
            AgentExecutionState::EvaluatingTools => "EvaluatingTools",
            AgentExecutionState::ExecutingTools => "ExecutingTools",
            AgentExecutionState::PostToolExecution => "PostToolExecution",
            AgentExecutionState::Completing => "Completing",
        }
    }
}

impl fmt::Display for AgentExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
