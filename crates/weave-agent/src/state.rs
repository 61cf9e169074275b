//! Agent state threaded through one loop iteration

use serde::{Deserialize, Serialize};
use weave_ai::{Message, MessageId, ToolCall};

/// A tool call paired with its result, `None` while unresolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntermediateStep {
    pub call: ToolCall,
    pub result: Option<String>,
}

impl IntermediateStep {
    pub fn pending(call: ToolCall) -> Self {
        Self { call, result: None }
    }

    pub fn resolved(call: ToolCall, result: impl Into<String>) -> Self {
        Self {
            call,
            result: Some(result.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }
}

/// Snapshot of one agent run.
///
/// Passed in and returned by value; the orchestration core never persists it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// Conversation messages in insertion order
    pub messages: Vec<Message>,
    /// Tool calls of the current run, in the order they were requested
    #[serde(default)]
    pub intermediate_steps: Vec<IntermediateStep>,
    /// Structured output of the final answer, set at most once
    #[serde(default)]
    pub final_output: Option<serde_json::Value>,
    /// Number of model calls made so far
    #[serde(default)]
    pub iteration: u32,
    /// First message of the live window (set by compaction)
    #[serde(default)]
    pub window_start: Option<MessageId>,
}

impl AgentState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Start a conversation from a single human message
    pub fn from_human(text: impl Into<String>) -> Self {
        Self::new(vec![Message::human(text)])
    }

    /// Messages from the live window onward.
    ///
    /// Falls back to the full history when the window anchor is unset or no
    /// longer present.
    pub fn live_messages(&self) -> &[Message] {
        self.window_start
            .as_ref()
            .and_then(|id| self.position(id))
            .map(|idx| &self.messages[idx..])
            .unwrap_or(&self.messages)
    }

    /// Index of a message by id
    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id() == id)
    }

    pub fn find_message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    /// Id of the newest human message
    pub fn last_human_id(&self) -> Option<&MessageId> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_human())
            .map(|m| m.id())
    }

    pub fn last_step(&self) -> Option<&IntermediateStep> {
        self.intermediate_steps.last()
    }

    /// Calls that have not been resolved yet, in request order
    pub fn unresolved_calls(&self) -> Vec<ToolCall> {
        self.intermediate_steps
            .iter()
            .filter(|s| !s.is_resolved())
            .map(|s| s.call.clone())
            .collect()
    }

    pub fn has_unresolved_steps(&self) -> bool {
        self.intermediate_steps.iter().any(|s| !s.is_resolved())
    }

    /// Final output rendered as text: the `answer` field when present,
    /// otherwise the whole value.
    pub fn final_answer_text(&self) -> Option<String> {
        let output = self.final_output.as_ref()?;
        let answer = output.get("answer").unwrap_or(output);
        Some(match answer {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}
