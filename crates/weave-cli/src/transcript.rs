//! Recorded model transcripts for replay

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use weave_agent::AgentState;
use weave_ai::{Message, ModelResponse};

/// A conversation plus the model responses to replay against it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Transcript {
    /// Overrides the configured system prompt
    pub system_prompt: Option<String>,
    /// Conversation so far; the last human message is the one being answered
    pub messages: Vec<Message>,
    /// Reasoning responses, consumed in order
    pub responses: Vec<ModelResponse>,
    /// Answers to help requests, consumed in order
    pub replies: Vec<String>,
    /// Summaries handed out when compaction triggers
    pub summaries: Vec<String>,
}

impl Transcript {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read transcript {}", path.display()))?;
        let transcript: Transcript = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse transcript {}", path.display()))?;
        if transcript.responses.is_empty() {
            anyhow::bail!("transcript {} has no model responses", path.display());
        }
        Ok(transcript)
    }

    pub fn initial_state(&self) -> AgentState {
        AgentState::new(self.messages.clone())
    }
}

/// Load a saved conversation: either a full agent state or a bare message list
pub fn load_conversation(path: &Path) -> anyhow::Result<AgentState> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read conversation {}", path.display()))?;
    parse_conversation(&content)
        .with_context(|| format!("failed to parse conversation {}", path.display()))
}

fn parse_conversation(content: &str) -> serde_json::Result<AgentState> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Saved {
        State(AgentState),
        Messages(Vec<Message>),
    }

    Ok(match serde_json::from_str(content)? {
        Saved::State(state) => state,
        Saved::Messages(messages) => AgentState::new(messages),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcript() {
        let transcript: Transcript = serde_json::from_str(
            r#"{
                "messages": [{"role": "human", "id": "m1", "text": "list the files", "timestamp": 0}],
                "responses": [
                    {"type": "tool_calls", "calls": [{"id": "c1", "name": "list", "arguments": {}}]},
                    {"type": "tool_calls", "calls": [{"id": "c2", "name": "final_answer", "arguments": {"answer": "done"}}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(transcript.responses.len(), 2);
        assert!(transcript.replies.is_empty());
        assert_eq!(transcript.initial_state().messages[0].text(), "list the files");
    }

    #[test]
    fn test_parse_conversation_accepts_both_shapes() {
        let bare = r#"[{"role": "human", "id": "m1", "text": "hi", "timestamp": 0}]"#;
        assert_eq!(parse_conversation(bare).unwrap().messages.len(), 1);

        let state = r#"{"messages": [{"role": "human", "id": "m1", "text": "hi", "timestamp": 0}], "iteration": 3}"#;
        assert_eq!(parse_conversation(state).unwrap().iteration, 3);
    }
}
