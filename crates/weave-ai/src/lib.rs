//! weave-ai: Conversation model and model-call abstraction
//!
//! This crate defines the message types threaded through the orchestration
//! core and the interface of the (opaque) language model collaborator.

pub mod error;
pub mod model;
pub mod types;

pub use error::{Error, Result};
pub use model::{ModelClient, ModelRequest, ModelResponse, ScriptedModel};
pub use types::*;
