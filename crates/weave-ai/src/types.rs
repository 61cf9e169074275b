//! Core types for conversations with a tool-calling model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a message.
///
/// Assigned once when the message is created and never reused. Copies made
/// during compaction always receive a fresh id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new random id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Tool call request emitted by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque call id, unique within one model response
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// Structured arguments
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A unit of conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Message authored by the end user
    Human {
        id: MessageId,
        text: String,
        #[serde(default)]
        timestamp: i64,
    },
    /// Model output, possibly requesting tool calls
    Assistant {
        id: MessageId,
        #[serde(default)]
        text: String,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
        #[serde(default)]
        timestamp: i64,
    },
    /// Result of exactly one tool call
    ToolResult {
        id: MessageId,
        tool_call_id: String,
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        timestamp: i64,
    },
    /// System-inserted context such as a compaction summary
    ContextInjection {
        id: MessageId,
        content: String,
        #[serde(default)]
        timestamp: i64,
    },
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Message {
    /// Create a human message
    pub fn human(text: impl Into<String>) -> Self {
        Self::Human {
            id: MessageId::new(),
            text: text.into(),
            timestamp: now(),
        }
    }

    /// Create a plain-text assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::assistant_with_tool_calls(text, vec![])
    }

    /// Create an assistant message carrying tool call requests
    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            id: MessageId::new(),
            text: text.into(),
            tool_calls,
            timestamp: now(),
        }
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            id: MessageId::new(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error,
            timestamp: now(),
        }
    }

    /// Create a system-inserted context message
    pub fn context_injection(content: impl Into<String>) -> Self {
        Self::ContextInjection {
            id: MessageId::new(),
            content: content.into(),
            timestamp: now(),
        }
    }

    /// Get the message id
    pub fn id(&self) -> &MessageId {
        match self {
            Self::Human { id, .. }
            | Self::Assistant { id, .. }
            | Self::ToolResult { id, .. }
            | Self::ContextInjection { id, .. } => id,
        }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::Human { .. } => "human",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
            Self::ContextInjection { .. } => "context_injection",
        }
    }

    /// Get the text body
    pub fn text(&self) -> &str {
        match self {
            Self::Human { text, .. } | Self::Assistant { text, .. } => text,
            Self::ToolResult { content, .. } | Self::ContextInjection { content, .. } => content,
        }
    }

    /// Tool calls requested by an assistant message (empty for other roles)
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human { .. })
    }

    /// Human and assistant messages are the only valid window anchors.
    pub fn is_anchor(&self) -> bool {
        matches!(self, Self::Human { .. } | Self::Assistant { .. })
    }

    /// Clone this message under a freshly generated id.
    pub fn with_fresh_id(&self) -> Self {
        let mut copy = self.clone();
        match &mut copy {
            Self::Human { id, .. }
            | Self::Assistant { id, .. }
            | Self::ToolResult { id, .. }
            | Self::ContextInjection { id, .. } => *id = MessageId::new(),
        }
        copy
    }
}

/// Tool definition sent to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Create a new tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
