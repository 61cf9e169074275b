//! Error types for weave-agent

use thiserror::Error;

/// Result type alias using weave-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during orchestration
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model collaborator
    #[error(transparent)]
    Ai(#[from] weave_ai::Error),

    /// The model answered without a tool call in a non-terminal state
    #[error("Model response contained no tool call")]
    NoToolCall,

    /// A tool call named a tool that is not registered
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Arguments failed validation when executing a tool directly
    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// A tool could not be registered
    #[error("Cannot register tool '{name}': {reason}")]
    Registration { name: String, reason: String },

    /// The parallel executor was called with an empty batch
    #[error("No tasks provided")]
    NoTasksProvided,

    /// Two tasks in one batch share a call id
    #[error("Duplicate call id in task batch: {0}")]
    DuplicateCallId(String),

    /// A single task failed (isolated, never aborts the batch)
    #[error("Task {call_id} failed: {message}")]
    TaskFailed { call_id: String, message: String },

    /// The operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// An error during compaction
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// A generic orchestration error
    #[error("{0}")]
    Other(String),
}
