//! Agent event types

use serde::{Deserialize, Serialize};
use weave_ai::{Message, ToolCall};

/// Events emitted on the progress/dispatch sink.
///
/// Delivery is fire-and-forget: a send with no subscribers is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The router is about to call the model
    ReasoningStart { iteration: u32 },

    /// The model requested tool calls
    ToolCallsRequested { calls: Vec<ToolCall> },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool or task progress update, keyed by call id
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// Arguments were rejected and a corrective result was sent back
    ArgumentsRejected {
        tool_call_id: String,
        tool_name: String,
        message: String,
    },

    /// A parallel task finished; carries the ToolResult-shaped message
    TaskCompleted { message: Message },

    /// A parallel task failed and was dropped from the results
    TaskFailed { tool_call_id: String, error: String },

    /// The model produced its final answer
    FinalAnswer { output: serde_json::Value },

    /// The model asked the human for help; the loop is suspended
    Interrupted {
        tool_call_id: String,
        request: serde_json::Value,
    },

    /// The iteration bound was reached
    MaxIterationsExceeded { iterations: u32 },

    /// Context compaction started
    CompactionStart { tokens_before: u32 },

    /// Context compaction completed
    CompactionEnd {
        tokens_before: u32,
        tokens_after: u32,
    },

    /// Error occurred
    Error { message: String },
}
