//! weave-agent: Orchestration core for a tool-calling assistant
//!
//! This crate provides the bounded reasoning/tool-call loop, the parallel
//! task executor that fans out independent tool invocations, and the
//! conversation compaction manager that keeps the live context bounded.

pub mod compaction;
pub mod error;
pub mod estimate;
pub mod events;
pub mod executor;
pub mod router;
pub mod state;
pub mod tool;
pub mod toolkit;

pub use compaction::{CompactionConfig, CompactionOutcome, Compactor, WindowUpdate};
pub use error::{Error, Result};
pub use estimate::{HeuristicCounter, TokenCounter};
pub use events::AgentEvent;
pub use executor::{
    ExecutorConfig, FailureCapture, ParallelExecutor, Task, TaskOutput, TaskResult, TaskStatus,
};
pub use router::{Phase, Route, Router, RouterConfig, RouterEvent, ToolOutcome, Transition};
pub use state::{AgentState, IntermediateStep};
pub use tool::{Artifact, BoxedTool, ProgressSender, Tool, ToolContext, ToolResult, Typed, TypedTool};
pub use toolkit::{ToolKind, Toolkit, ValidationError};
