//! Configuration management
//!
//! This module handles loading, validation, and management of the Steward configuration.
//! Configuration is stored in TOML format at ~/.steward/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **agent**: Turn limit, chat mode, model call timeout
//! - **approval**: Global and per-tool approval requirements, bash whitelist, gate timeout
//! - **monitor**: Background task poll interval and event stream capacity
//!
//! # Examples
//!
//! ```no_run
//! use steward_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Max turns: {}", config.agent.max_turns);
//! println!("Approval timeout: {:?}", config.approval.timeout());
//! # Ok(())
//! # }
//! ```

use regex::Regex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Turn loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool approval settings
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Background task monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Turn loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of model calls per turn
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Interactive chat mode (approval prompts are only raised in chat mode)
    #[serde(default = "default_true")]
    pub chat_mode: bool,

    /// Timeout for each model call in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

/// Tool approval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Require approval for tools without a per-tool override
    #[serde(default = "default_true")]
    pub require_approval: bool,

    /// Seconds to wait for an approval decision
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-tool overrides of `require_approval`
    #[serde(default)]
    pub tools: BTreeMap<String, bool>,

    /// Bash commands that never need approval
    #[serde(default)]
    pub bash_whitelist: BashWhitelistConfig,
}

/// Whitelisted bash commands and patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashWhitelistConfig {
    /// Commands matched against the first word of the command line
    #[serde(default)]
    pub commands: Vec<String>,

    /// Regular expressions matched against the whole command line
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Background task monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between polling-task scans in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Capacity of each observability subscriber channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_turns() -> usize {
    50
}

fn default_llm_timeout_secs() -> u64 {
    300
}

fn default_approval_timeout_secs() -> u64 {
    300
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_event_buffer() -> usize {
    100
}

fn default_whitelisted_commands() -> Vec<String> {
    ["ls", "pwd", "echo", "wc", "sort", "uniq"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_whitelisted_patterns() -> Vec<String> {
    [
        "^git branch( --show-current)?$",
        "^git status$",
        "^git diff( [a-zA-Z0-9/_.-]+)*$",
        "^git log --oneline -n [0-9]+$",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            chat_mode: true,
            llm_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl AgentConfig {
    /// Model call timeout as a duration
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_approval: true,
            timeout_secs: default_approval_timeout_secs(),
            tools: BTreeMap::new(),
            bash_whitelist: BashWhitelistConfig::default(),
        }
    }
}

impl ApprovalConfig {
    /// Approval gate timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check whether a tool requires approval
    ///
    /// A per-tool override wins; otherwise the global `require_approval` applies.
    pub fn is_approval_required(&self, tool_name: &str) -> bool {
        self.tools
            .get(tool_name)
            .copied()
            .unwrap_or(self.require_approval)
    }
}

impl Default for BashWhitelistConfig {
    fn default() -> Self {
        Self {
            commands: default_whitelisted_commands(),
            patterns: default_whitelisted_patterns(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl MonitorConfig {
    /// Poll interval as a duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Config {
    /// Load configuration from the default location (~/.steward/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Serialize configuration to pretty TOML
    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Create default configuration and save to path
    pub fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();
        config.validate()?;

        fs::write(path, config.to_toml()?)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.steward/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".steward").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.agent.max_turns == 0 {
            return Err(EngineError::Config(
                "agent.max_turns must be at least 1".to_string(),
            ));
        }

        if self.agent.llm_timeout_secs == 0 {
            return Err(EngineError::Config(
                "agent.llm_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.approval.timeout_secs == 0 {
            return Err(EngineError::Config(
                "approval.timeout_secs must be at least 1".to_string(),
            ));
        }

        for pattern in &self.approval.bash_whitelist.patterns {
            Regex::new(pattern).map_err(|e| {
                EngineError::Config(format!("Invalid bash whitelist pattern '{}': {}", pattern, e))
            })?;
        }

        if self.monitor.tick_interval_ms == 0 {
            return Err(EngineError::Config(
                "monitor.tick_interval_ms must be at least 1".to_string(),
            ));
        }

        if self.monitor.event_buffer == 0 {
            return Err(EngineError::Config(
                "monitor.event_buffer must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.agent.max_turns, 50);
        assert!(config.agent.chat_mode);
        assert_eq!(config.approval.timeout(), Duration::from_secs(300));
        assert_eq!(config.monitor.tick_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.agent.max_turns, 50);
        assert!(config.approval.require_approval);
        assert!(config
            .approval
            .bash_whitelist
            .commands
            .contains(&"ls".to_string()));
    }

    #[test]
    fn test_per_tool_override_wins() {
        let config = Config::from_toml(
            r#"
[approval]
require_approval = true

[approval.tools]
Read = false
"#,
        )
        .unwrap();

        assert!(!config.approval.is_approval_required("Read"));
        assert!(config.approval.is_approval_required("Write"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Config::from_toml("[core]\nlog_level = \"loud\"").unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_zero_max_turns_rejected() {
        assert!(Config::from_toml("[agent]\nmax_turns = 0").is_err());
    }

    #[test]
    fn test_invalid_whitelist_pattern_rejected() {
        let err = Config::from_toml("[approval.bash_whitelist]\npatterns = [\"(unclosed\"]")
            .unwrap_err();
        assert!(err.to_string().contains("Invalid bash whitelist pattern"));
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        assert!(Config::from_toml("[monitor]\nevent_buffer = 0").is_err());
    }
}
