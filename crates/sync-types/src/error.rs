//! Error types for the shared domain layer.

use thiserror::Error;

/// Unified error type for domain and configuration operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
