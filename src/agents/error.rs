//! Error types for the orchestration layer.

use thiserror::Error;

use crate::error::{LlmError, SandboxError, StoreError};

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No concept could be produced for a job.
    #[error("Ideation failed: {0}")]
    Ideation(String),

    /// A backend reply held no usable script.
    #[error("Script generation failed: {0}")]
    GenerationFailed(String),

    /// Error parsing LLM response.
    #[error("Failed to parse LLM response: {0}")]
    ResponseParseError(String),

    /// Configuration error.
    #[error("Agent configuration error: {0}")]
    ConfigurationError(String),

    /// Error from a generation backend.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Error from the sandbox executor itself.
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Error from a knowledge store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Prompt template rendering failed.
    #[error("Prompt rendering failed: {0}")]
    Prompt(#[from] tera::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_converts() {
        let err: AgentError = LlmError::RateLimited("slow down".to_string()).into();
        assert!(matches!(err, AgentError::Llm(_)));
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: AgentError = StoreError::InvalidRecord("blank".to_string()).into();
        assert_eq!(err.to_string(), "Store error: Invalid record: blank");
    }
}
