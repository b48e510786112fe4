//! Error types and handling
//!
//! This module provides the error type used throughout the Steward engine.
//! Every error implements the `StewardErrorExt` trait which provides a
//! user-friendly hint and indicates whether the error is recoverable.
//!
//! # Error Categories
//!
//! - **State machine**: guard failures and missing transition edges
//! - **Approval**: timeouts, cancellation, missing event sink
//! - **Background tasks**: saturated event stream, tracker inconsistencies
//! - **Model / tools**: provider failures, timeouts, tool errors

use thiserror::Error;

/// Trait for Steward error extensions
///
/// Provides additional context for errors, including a hint that is safe to
/// show to end users and whether the caller may retry.
pub trait StewardErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors leave every component in a consistent state and
    /// the operation can be retried later.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, StewardErrorExt};
///
/// let error = EngineError::GuardFailed {
///     from: "PostStream".to_string(),
///     to: "Completing".to_string(),
/// };
/// assert!(error.is_recoverable());
///
/// let wiring = EngineError::NoSuchEdge {
///     from: "PostStream".to_string(),
///     to: "ExecutingTools".to_string(),
/// };
/// assert!(!wiring.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // State machine errors
    #[error("Guard failed for transition {from} -> {to}")]
    GuardFailed { from: String, to: String },

    #[error("Invalid transition from {from} to {to}")]
    NoSuchEdge { from: String, to: String },

    // Approval errors
    #[error("Approval request timed out after {0} seconds")]
    ApprovalTimeout(u64),

    #[error("Approval request cancelled")]
    ApprovalCancelled,

    #[error("Approval event sink not configured")]
    ApprovalSinkMissing,

    // Background task errors
    #[error("Event stream saturated, dropped {0} event")]
    EventStreamSaturated(String),

    #[error("Task {0} is no longer polling")]
    TrackerInconsistency(String),

    // Model errors
    #[error("Model provider error: {0}")]
    ModelProvider(String),

    #[error("Model call timed out")]
    LLMTimeout,

    #[error("Turn cancelled")]
    TurnCancelled,

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StewardErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::GuardFailed { .. } => "The agent is not ready for that step yet. Try again",
            Self::NoSuchEdge { .. } => "Internal wiring error in the turn loop",

            Self::ApprovalTimeout(_) => "No approval decision arrived in time",
            Self::ApprovalCancelled => "The approval request was cancelled",
            Self::ApprovalSinkMissing => "No approval handler is connected",

            Self::EventStreamSaturated(_) => "Some status updates were dropped",
            Self::TrackerInconsistency(_) => "The background task is no longer tracked",

            Self::ModelProvider(_) => "Model provider unavailable. Check your connection",
            Self::LLMTimeout => "Model provider took too long to respond. Try again",
            Self::TurnCancelled => "The request was cancelled",

            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::ToolError(_) => "Tool operation failed",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::NoSuchEdge { .. }
            | Self::ApprovalCancelled
            | Self::ApprovalSinkMissing
            | Self::TurnCancelled => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_failure_is_recoverable() {
        let error = EngineError::GuardFailed {
            from: "CheckingQueue".to_string(),
            to: "StreamingLLM".to_string(),
        };
        assert!(error.is_recoverable());
        assert_eq!(
            error.to_string(),
            "Guard failed for transition CheckingQueue -> StreamingLLM"
        );
    }

    #[test]
    fn test_wiring_and_cancellation_errors_are_fatal() {
        assert!(!EngineError::NoSuchEdge {
            from: "Idle".to_string(),
            to: "Completing".to_string(),
        }
        .is_recoverable());
        assert!(!EngineError::ApprovalCancelled.is_recoverable());
        assert!(!EngineError::ApprovalSinkMissing.is_recoverable());
    }

    #[test]
    fn test_timeout_and_telemetry_errors_are_recoverable() {
        assert!(EngineError::ApprovalTimeout(300).is_recoverable());
        assert!(EngineError::EventStreamSaturated("TaskCompleted".to_string()).is_recoverable());
        assert!(EngineError::TrackerInconsistency("task-1".to_string()).is_recoverable());
    }

    #[test]
    fn test_user_hints_are_not_empty() {
        let errors = vec![
            EngineError::Config("bad".to_string()),
            EngineError::ApprovalTimeout(1),
            EngineError::LLMTimeout,
            EngineError::ToolNotFound("Bash".to_string()),
        ];

        for error in errors {
            assert!(!error.user_hint().is_empty(), "missing hint for {}", error);
        }
    }
}
