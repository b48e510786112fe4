//! Formatting of tool results for the model

use sdk::types::ToolExecutionResult;

/// Turns a tool result into text the model can read
pub trait ResultFormatter: Send + Sync {
    fn format_tool_result(&self, result: &ToolExecutionResult) -> String;
}

/// Plain-text formatter
///
/// Rejections are spelled out so the model can revise its plan instead of
/// retrying an opaque failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainResultFormatter;

impl ResultFormatter for PlainResultFormatter {
    fn format_tool_result(&self, result: &ToolExecutionResult) -> String {
        if result.rejected {
            return format!(
                "Tool '{}' was rejected by the user and was not executed. Do not assume it ran.",
                result.tool_name
            );
        }

        if !result.success {
            let error = result.error.as_deref().unwrap_or("unknown error");
            return format!("Tool '{}' failed: {}", result.tool_name, error);
        }

        match &result.data {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(data) => serde_json::to_string(data).unwrap_or_else(|_| data.to_string()),
            None => format!("Tool '{}' completed with no output", result.tool_name),
        }
    }
}
