//! Error types for pipeline components.

use thiserror::Error;

/// Errors produced by pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller supplied malformed arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A payload could not be serialized or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),
    /// Durable store failure with context.
    #[error("storage error: {0}")]
    Storage(String),
    /// Resource usage could not be sampled.
    #[error("resource probe failed: {0}")]
    ResourceProbe(String),
    /// No task is registered under the given name.
    #[error("unknown task: {0}")]
    UnknownTask(String),
    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// Result alias for component APIs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Application-facing result used by task bodies.
pub type AppResult<T> = Result<T, anyhow::Error>;
