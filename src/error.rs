//! Error types for the memory engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "synthesizer-http")]
    Http(#[from] reqwest::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the caller should retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_) | EngineError::Database(_))
    }

    /// Stable machine-readable identifier, for a tool-calling layer in front
    /// of the engine to map onto its own protocol errors.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Validation(_) => -32602,
            EngineError::Config(_) => -32001,
            EngineError::NotFound(_) => -32002,
            EngineError::Storage(_) | EngineError::Database(_) => -32003,
            EngineError::Upstream(_) => -32004,
            #[cfg(feature = "synthesizer-http")]
            EngineError::Http(_) => -32004,
            EngineError::Serialization(_) => -32005,
            EngineError::Cancelled => -32006,
        }
    }
}
