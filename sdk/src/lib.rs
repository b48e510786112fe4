//! Steward SDK
//!
//! Shared types and errors for Steward components.
//! This crate is used by the engine and by anything that drives or extends it
//! (model clients, tool executors, task trackers).

/// Error types and handling
pub mod errors;

/// Tool call, tool result and message types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, StewardErrorExt};
pub use types::{Message, MessageRole, ToolCall, ToolExecutionResult};
