//! Tool trait and execution context

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use weave_ai::ToolSchema;

use crate::events::AgentEvent;

/// Typed object passed between dependent tasks (e.g. a chart reference)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Artifact {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            data,
        }
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text returned to the model
    pub content: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Artifacts produced for downstream tasks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    /// Optional structured details (for UI rendering)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_error: false,
            artifacts: vec![],
            details: None,
        }
    }

    /// Create an error result.
    ///
    /// Expected domain failures ("table not found") are reported this way
    /// instead of as a Rust error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            artifacts: vec![],
            details: None,
        }
    }

    /// Attach an artifact
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Add details to the result
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A sender for progress updates during execution.
///
/// A muted sender (no channel) silently drops every update.
#[derive(Clone)]
pub struct ProgressSender {
    tx: Option<broadcast::Sender<AgentEvent>>,
    tool_call_id: String,
    tool_name: String,
}

impl ProgressSender {
    /// Create a new progress sender for a specific tool invocation.
    pub fn new(
        tx: broadcast::Sender<AgentEvent>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            tx: Some(tx),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    /// Create a sender that drops every update.
    pub fn muted(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tx: None,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.tx.is_none()
    }

    /// Send a progress update.
    pub fn send(&self, content: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(AgentEvent::ToolExecutionUpdate {
                tool_call_id: self.tool_call_id.clone(),
                tool_name: self.tool_name.clone(),
                content: content.into(),
            });
        }
    }
}

/// Everything a handler gets besides its arguments
#[derive(Clone)]
pub struct ToolContext {
    /// Call id this invocation answers
    pub call_id: String,
    /// Artifacts produced by tasks this one depends on
    pub artifacts: Vec<Artifact>,
    /// Progress sink
    pub progress: ProgressSender,
    /// Cooperative cancellation signal
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Context with no artifacts, muted progress and a fresh token
    pub fn detached(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        let call_id = call_id.into();
        Self {
            progress: ProgressSender::muted(call_id.clone(), tool_name),
            call_id,
            artifacts: vec![],
            cancel: CancellationToken::new(),
        }
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Extra argument check run after schema validation.
    ///
    /// Returns a list of problems; empty means the arguments are acceptable.
    fn check_arguments(&self, _arguments: &serde_json::Value) -> Vec<String> {
        vec![]
    }

    /// Execute the tool with the given arguments
    async fn execute(&self, arguments: serde_json::Value, ctx: ToolContext) -> ToolResult;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to the schema sent to the model
pub fn to_schema(tool: &dyn Tool) -> ToolSchema {
    ToolSchema::new(tool.name(), tool.description(), tool.parameters_schema())
}

/// A tool whose arguments decode into a concrete Rust type.
///
/// Wrap it in [`Typed`] to register it; decoding failures surface as
/// validation errors before `run` is ever called.
#[async_trait]
pub trait TypedTool: Send + Sync {
    type Args: DeserializeOwned + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    async fn run(&self, args: Self::Args, ctx: ToolContext) -> ToolResult;
}

/// Adapter registering a [`TypedTool`] as a [`Tool`]
pub struct Typed<T>(pub T);

#[async_trait]
impl<T: TypedTool> Tool for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.0.parameters_schema()
    }

    fn check_arguments(&self, arguments: &serde_json::Value) -> Vec<String> {
        match serde_json::from_value::<T::Args>(arguments.clone()) {
            Ok(_) => vec![],
            Err(e) => vec![e.to_string()],
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: ToolContext) -> ToolResult {
        match serde_json::from_value::<T::Args>(arguments) {
            Ok(args) => self.0.run(args, ctx).await,
            Err(e) => ToolResult::error(format!("Invalid arguments: {}", e)),
        }
    }
}
