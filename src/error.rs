//! Error types for circuit-weaver operations.
//!
//! Defines error types for the major subsystems:
//! - Generation backend interactions
//! - Sandboxed script execution
//! - Corrective and creative knowledge stores
//! - Configuration loading

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API base URL not configured. Set LITELLM_API_BASE environment variable")]
    MissingApiBase,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Backend '{0}' returned an empty completion")]
    EmptyCompletion(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors raised by the sandbox executor itself.
///
/// A script that fails, crashes or times out is not a `SandboxError`; those
/// outcomes are reported through [`crate::sandbox::Verdict`].
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Working directory already exists: {0}")]
    WorkspaceExists(PathBuf),

    #[error("Working directory is not empty: {0}")]
    WorkspaceNotEmpty(PathBuf),

    #[error("Failed to prepare working directory '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn interpreter '{interpreter}': {reason}")]
    Spawn { interpreter: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the corrective and creative knowledge stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt store entry in '{path}' at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
