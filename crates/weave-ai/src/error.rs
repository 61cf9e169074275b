//! Error types for weave-ai

use thiserror::Error;

/// Result type alias using weave-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when calling the model collaborator
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The model backend returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// A scripted model ran out of canned responses
    #[error("Scripted model has no responses left (after {calls} calls)")]
    ScriptExhausted { calls: usize },
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let e = Error::api("invalid_request", "bad tool schema");
        assert_eq!(
            e.to_string(),
            "API error: bad tool schema (type: invalid_request)"
        );
    }

    #[test]
    fn test_script_exhausted_display() {
        let e = Error::ScriptExhausted { calls: 3 };
        assert_eq!(
            e.to_string(),
            "Scripted model has no responses left (after 3 calls)"
        );
    }
}
