use std::fmt;

use serde_json::Value;

/// Longest tool payload rendered into a progress log line.
const MAX_RENDERED_RESULT: usize = 1000;

/// Planner-agnostic step of a workflow run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The planner is about to start.
    Started { planner: String },
    /// A model round-trip is starting.
    ModelRequest { iteration: usize },
    /// Text the model produced alongside tool calls.
    Thinking { content: String },
    /// A tool is being called.
    ToolCall { name: String, args: Value },
    /// A tool returned a result.
    ToolResult { name: String, result: Value },
    /// A lookup failed and an empty or absent result was substituted.
    ToolDegraded { name: String, reason: String },
    /// A tool call failed and the error went back to the planner.
    ToolFailed { name: String, error: String },
    /// Free-form progress note from the planner.
    Note { content: String },
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { planner } => write!(f, "Planner started: {}", planner),
            Self::ModelRequest { iteration } => write!(f, "Model request #{}", iteration),
            Self::Thinking { content } => write!(f, "Model: {}", truncate_for_log(content, 2000)),
            Self::ToolCall { name, args } => write!(f, "Tool call: {} with args: {}", name, args),
            Self::ToolResult { name, result } => write!(
                f,
                "Tool result ({}): {}",
                name,
                truncate_for_log(&result.to_string(), MAX_RENDERED_RESULT)
            ),
            Self::ToolDegraded { name, reason } => write!(
                f,
                "Tool degraded ({}): returned an empty result because: {}",
                name, reason
            ),
            Self::ToolFailed { name, error } => write!(f, "Tool error ({}): {}", name, error),
            Self::Note { content } => write!(f, "{}", content),
        }
    }
}

/// Truncate a string for logging purposes, on a char boundary.
pub(crate) fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
