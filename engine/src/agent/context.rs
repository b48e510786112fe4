//! Per-turn context
//!
//! `AgentContext` is created at the start of a turn, owned by the turn loop,
//! and dropped when the turn returns to Idle. Guards only read it.

use crate::approval::{ApprovalDecision, ApprovalPolicy};
use crate::queue::MessageQueue;
use sdk::types::{Message, MessageRole, ToolCall, ToolExecutionResult};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A tool call requested in the current model response
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub call: ToolCall,
    /// Set once the approval state is known
    pub decision: Option<ApprovalDecision>,
    /// Set once the call ran or was refused
    pub result: Option<ToolExecutionResult>,
}

impl PendingToolCall {
    pub fn new(call: ToolCall) -> Self {
        Self {
            call,
            decision: None,
            result: None,
        }
    }
}

pub struct AgentContext {
    pub request_id: String,
    pub conversation: Vec<Message>,
    /// Tool calls of the latest model response, in request order
    pub pending_tool_calls: Vec<PendingToolCall>,
    /// Model calls made in this turn
    pub turns: usize,
    pub max_turns: usize,
    /// Tool results were appended that the model has not seen yet
    pub has_tool_results: bool,
    pub approval_policy: Arc<dyn ApprovalPolicy>,
    pub message_queue: Arc<MessageQueue>,
    pub cancel: CancellationToken,
    pub is_chat_mode: bool,
}

impl AgentContext {
    pub fn new(
        request_id: impl Into<String>,
        conversation: Vec<Message>,
        max_turns: usize,
        approval_policy: Arc<dyn ApprovalPolicy>,
        message_queue: Arc<MessageQueue>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            conversation,
            pending_tool_calls: Vec::new(),
            turns: 0,
            max_turns,
            has_tool_results: false,
            approval_policy,
            message_queue,
            cancel: CancellationToken::new(),
            is_chat_mode: true,
        }
    }

    pub fn with_chat_mode(mut self, is_chat_mode: bool) -> Self {
        self.is_chat_mode = is_chat_mode;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Role of the most recent conversation entry
    pub fn last_role(&self) -> Option<MessageRole> {
        self.conversation.last().map(|m| m.role)
    }

    /// Replace the pending calls with those of a new model response
    pub fn set_tool_calls(&mut self, calls: Vec<ToolCall>) {
        self.pending_tool_calls = calls.into_iter().map(PendingToolCall::new).collect();
    }

    pub fn pending_call(&self, call_id: &str) -> Option<&ToolCall> {
        self.pending_tool_calls
            .iter()
            .find(|p| p.call.id == call_id)
            .map(|p| &p.call)
    }

    /// Whether the active policy requires approval for this call
    pub fn requires_approval(&self, call: &ToolCall) -> bool {
        self.approval_policy
            .should_require_approval(call, self.is_chat_mode)
    }
}

impl fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentContext")
            .field("request_id", &self.request_id)
            .field("conversation_len", &self.conversation.len())
            .field("pending_tool_calls", &self.pending_tool_calls.len())
            .field("turns", &self.turns)
            .field("max_turns", &self.max_turns)
            .field("has_tool_results", &self.has_tool_results)
            .field("queued", &self.message_queue.size())
            .field("is_chat_mode", &self.is_chat_mode)
            .finish()
    }
}
