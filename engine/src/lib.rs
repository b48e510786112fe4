//! Steward Engine Library
//!
//! This library provides the turn orchestration core of the Steward agent
//! runtime. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Observability event stream
pub mod events;

/// Message queue feeding the turn loop
pub mod queue;

/// Session state (agent mode)
pub mod session;

/// Tool approval policies and gate
pub mod approval;

/// Tool result formatting
pub mod conversation;

/// Background task monitor
pub mod monitor;

/// Turn state machine and loop
pub mod agent;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
