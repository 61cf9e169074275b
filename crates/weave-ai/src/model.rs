//! Model-call collaborator interface

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Message, ToolCall, ToolSchema};

/// Everything the model sees for one call
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Conversation messages (possibly windowed)
    pub messages: Vec<Message>,
    /// Available tools
    pub tools: Vec<ToolSchema>,
}

/// What the model answered with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelResponse {
    /// One or more tool call requests
    ToolCalls { calls: Vec<ToolCall> },
    /// Free text with no tool call
    FinalText { text: String },
}

impl ModelResponse {
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::ToolCalls { calls }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::FinalText { text: text.into() }
    }

    /// Requested tool calls (empty for a text response)
    pub fn calls(&self) -> &[ToolCall] {
        match self {
            Self::ToolCalls { calls } => calls,
            Self::FinalText { .. } => &[],
        }
    }
}

/// The language model, treated as an opaque function from a prompt to a response
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, request: ModelRequest) -> Result<ModelResponse>;
}

/// A model that replays a fixed queue of responses.
///
/// Every request is recorded so callers can inspect exactly what was sent.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Snapshot of all requests received
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    /// Responses not consumed yet
    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn call(&self, request: ModelRequest) -> Result<ModelResponse> {
        let calls = {
            let mut requests = self.requests.lock();
            requests.push(request);
            requests.len()
        };
        let next = self.responses.lock().pop_front();
        match next {
            Some(response) => Ok(response),
            None => {
                tracing::warn!(calls, "scripted model exhausted");
                Err(Error::ScriptExhausted { calls })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new(vec![
            ModelResponse::tool_calls(vec![ToolCall::new("c1", "a", serde_json::json!({}))]),
            ModelResponse::text("done"),
        ]);

        let first = model.call(ModelRequest::default()).await.unwrap();
        assert_eq!(first.calls().len(), 1);
        let second = model.call(ModelRequest::default()).await.unwrap();
        assert!(second.calls().is_empty());

        assert_eq!(model.call_count(), 2);
        assert_eq!(model.remaining(), 0);
    }

    #[tokio::test]
    async fn test_scripted_model_exhausted() {
        let model = ScriptedModel::default();
        let err = model.call(ModelRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::ScriptExhausted { calls: 1 }));
    }

    #[test]
    fn test_response_transcript_format() {
        let json = serde_json::json!([
            {"type": "tool_calls", "calls": [{"id": "c1", "name": "run_query", "arguments": {"sql": "select 1"}}]},
            {"type": "final_text", "text": "hello"}
        ]);
        let responses: Vec<ModelResponse> = serde_json::from_value(json).unwrap();
        assert_eq!(responses[0].calls()[0].name, "run_query");
        assert!(matches!(&responses[1], ModelResponse::FinalText { text } if text == "hello"));
    }
}
