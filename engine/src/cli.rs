//! CLI interface for Steward
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Steward agent runtime
///
/// Drives conversation turns against a model, gates risky tool calls behind
/// approval, and folds background task results back into the conversation.
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one conversation turn
    Run {
        /// The user prompt
        prompt: String,
    },

    /// Print the effective configuration
    Config,
}
