//! Approval policies
//!
//! A policy decides, for a single tool call, whether the user must sign off
//! before the call runs. The standard policy applies these rules in order:
//!
//! 1. Auto-accept mode bypasses approval
//! 2. Non-chat mode bypasses approval
//! 3. `Bash` calls bypass approval only when the command is whitelisted and
//!    carries no dangerous flag (--force, -rf, --delete, --hard)
//! 4. Other tools use the per-tool override, else the global setting

use crate::config::{ApprovalConfig, BashWhitelistConfig};
use crate::session::StateManager;
use regex::Regex;
use sdk::errors::EngineError;
use sdk::types::ToolCall;
use std::sync::Arc;

/// Tool name whose command line is checked against the whitelist
pub const BASH_TOOL: &str = "Bash";

const DANGEROUS_FLAGS: &[&str] = &["--force", "-rf", "--delete", "--hard"];

/// Decides whether a tool call requires approval
pub trait ApprovalPolicy: Send + Sync {
    fn should_require_approval(&self, tool_call: &ToolCall, is_chat_mode: bool) -> bool;
}

/// Check if a command line contains dangerous flags
fn has_dangerous_flags(command: &str) -> bool {
    command
        .split_whitespace()
        .any(|arg| DANGEROUS_FLAGS.iter().any(|flag| arg.contains(flag)))
}

/// Compiled bash whitelist
#[derive(Debug, Clone)]
pub struct BashWhitelist {
    commands: Vec<String>,
    patterns: Vec<Regex>,
}

impl BashWhitelist {
    /// Compile the whitelist, failing on the first invalid pattern
    pub fn from_config(config: &BashWhitelistConfig) -> Result<Self, EngineError> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    EngineError::Config(format!("Invalid bash whitelist pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            commands: config.commands.clone(),
            patterns,
        })
    }

    /// Whether a command line may run without approval
    pub fn allows(&self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() || has_dangerous_flags(command) {
            return false;
        }

        let first_word = command.split_whitespace().next().unwrap_or_default();
        if self.commands.iter().any(|c| c == first_word) {
            return true;
        }

        self.patterns.iter().any(|p| {
            p.find(command)
                .is_some_and(|m| m.start() == 0 && m.end() == command.len())
        })
    }
}

/// Default policy: mode, chat flag, bash whitelist, then configuration
pub struct StandardApprovalPolicy {
    config: ApprovalConfig,
    whitelist: BashWhitelist,
    state: Arc<dyn StateManager>,
}

impl StandardApprovalPolicy {
    pub fn new(config: &ApprovalConfig, state: Arc<dyn StateManager>) -> Result<Self, EngineError> {
        Ok(Self {
            whitelist: BashWhitelist::from_config(&config.bash_whitelist)?,
            config: config.clone(),
            state,
        })
    }

    fn is_bash_command_whitelisted(&self, tool_call: &ToolCall) -> bool {
        tool_call
            .argument_str("command")
            .is_some_and(|command| self.whitelist.allows(&command))
    }
}

impl ApprovalPolicy for StandardApprovalPolicy {
    fn should_require_approval(&self, tool_call: &ToolCall, is_chat_mode: bool) -> bool {
        if self.state.is_auto_accept() {
            return false;
        }

        if !is_chat_mode {
            return false;
        }

        if tool_call.name == BASH_TOOL {
            return !self.is_bash_command_whitelisted(tool_call);
        }

        self.config.is_approval_required(&tool_call.name)
    }
}

/// Never requires approval. For automation and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveApprovalPolicy;

impl ApprovalPolicy for PermissiveApprovalPolicy {
    fn should_require_approval(&self, _tool_call: &ToolCall, _is_chat_mode: bool) -> bool {
        false
    }
}

/// Always requires approval
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictApprovalPolicy;

impl ApprovalPolicy for StrictApprovalPolicy {
    fn should_require_approval(&self, _tool_call: &ToolCall, _is_chat_mode: bool) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AgentMode, SessionState};

    fn bash(command: &str) -> ToolCall {
        ToolCall::new(
            "call-1",
            BASH_TOOL,
            serde_json::json!({ "command": command }).to_string(),
        )
    }

    fn standard() -> (StandardApprovalPolicy, Arc<SessionState>) {
        let state = Arc::new(SessionState::new());
        let policy =
            StandardApprovalPolicy::new(&ApprovalConfig::default(), state.clone()).unwrap();
        (policy, state)
    }

    #[test]
    fn test_whitelisted_command_bypasses() {
        let (policy, _) = standard();
        assert!(!policy.should_require_approval(&bash("ls -la"), true));
        assert!(!policy.should_require_approval(&bash("git status"), true));
        assert!(!policy.should_require_approval(&bash("git log --oneline -n 5"), true));
    }

    #[test]
    fn test_non_whitelisted_command_requires_approval() {
        let (policy, _) = standard();
        assert!(policy.should_require_approval(&bash("rm file.txt"), true));
        assert!(policy.should_require_approval(&bash("git status && rm x"), true));
    }

    #[test]
    fn test_dangerous_flag_overrides_whitelist() {
        let (policy, _) = standard();
        assert!(policy.should_require_approval(&bash("ls --force"), true));
        assert!(policy.should_require_approval(&bash("echo -rf"), true));
    }

    #[test]
    fn test_unparsable_bash_arguments_require_approval() {
        let (policy, _) = standard();
        let call = ToolCall::new("call-1", BASH_TOOL, "{not json");
        assert!(policy.should_require_approval(&call, true));
    }

    #[test]
    fn test_auto_accept_and_non_chat_bypass() {
        let (policy, state) = standard();
        let write = ToolCall::new("call-2", "Write", "{}");

        assert!(policy.should_require_approval(&write, true));
        assert!(!policy.should_require_approval(&write, false));

        state.set_agent_mode(AgentMode::AutoAccept);
        assert!(!policy.should_require_approval(&write, true));
        assert!(!policy.should_require_approval(&bash("rm -rf /"), true));
    }

    #[test]
    fn test_per_tool_override() {
        let mut config = ApprovalConfig::default();
        config.tools.insert("Read".to_string(), false);
        let policy =
            StandardApprovalPolicy::new(&config, Arc::new(SessionState::new())).unwrap();

        assert!(!policy.should_require_approval(&ToolCall::new("1", "Read", "{}"), true));
        assert!(policy.should_require_approval(&ToolCall::new("2", "Write", "{}"), true));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut config = ApprovalConfig::default();
        config.bash_whitelist.patterns.push("(".to_string());
        assert!(StandardApprovalPolicy::new(&config, Arc::new(SessionState::new())).is_err());
    }

    #[test]
    fn test_permissive_and_strict() {
        let call = ToolCall::new("1", "Write", "{}");
        assert!(!PermissiveApprovalPolicy.should_require_approval(&call, true));
        assert!(StrictApprovalPolicy.should_require_approval(&call, false));
    }
}
