//! Error types for the Fraudlens Q&A engine.
//!
//! This module defines a unified error enum that covers all error categories
//! in the application, including configuration, I/O, LLM, data-backend, and
//! agent orchestration errors.

use thiserror::Error;

/// Unified error type for the Fraudlens Q&A engine.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// We never panic — errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider errors (completion or embedding calls)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Transaction store and passage index errors
    #[error("Data error: {0}")]
    Data(String),

    /// Router, tool, and scoring errors
    #[error("Agent error: {0}")]
    Agent(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
