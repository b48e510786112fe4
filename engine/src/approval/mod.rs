//! Tool approval
//!
//! Policies decide whether a tool call needs sign-off; the gate asks for the
//! decision over the event bus and runs (or refuses to run) the call.

pub mod gate;
pub mod policy;

pub use gate::{
    ApprovalGate, ApprovalGateConfig, BatchError, ExecutionScope, FnExecutor, ToolExecutor,
    DEFAULT_APPROVAL_TIMEOUT,
};
pub use policy::{
    ApprovalPolicy, BashWhitelist, PermissiveApprovalPolicy, StandardApprovalPolicy,
    StrictApprovalPolicy,
};

use serde::{Deserialize, Serialize};

/// Decision delivered through an approval responder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    /// Run this call
    Approve,
    /// Do not run this call
    Reject,
    /// Run this call and stop asking for the rest of the session
    AutoAccept,
}

/// Resolved approval state of a pending tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// The policy did not require approval
    NotRequired,
    /// Approved or auto-accepted
    Approved,
    /// Refused by the user
    Rejected,
    /// No decision arrived before the gate timeout
    TimedOut,
    /// Never asked because an earlier call in the batch was rejected
    Skipped,
}

impl ApprovalDecision {
    /// Whether the call should run
    pub fn permits_execution(&self) -> bool {
        matches!(self, ApprovalDecision::NotRequired | ApprovalDecision::Approved)
    }
}
