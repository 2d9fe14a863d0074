//! Error types for Phloem

use thiserror::Error;

/// Result type alias for Phloem operations
pub type Result<T> = std::result::Result<T, PhloemError>;

/// Main error type for Phloem
#[derive(Error, Debug)]
pub enum PhloemError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported graft version: {0}")]
    UnsupportedVersion(u8),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PhloemError {
    /// Get error code for the MCP protocol
    pub fn code(&self) -> i64 {
        match self {
            PhloemError::NotFound(_) => -32001,
            PhloemError::InvalidArgument(_) => -32602,
            PhloemError::InvalidFormat(_) => -32002,
            PhloemError::UnsupportedVersion(_) => -32003,
            _ => -32000,
        }
    }

    /// Convenience constructor for a missing memory
    pub fn memory_not_found(id: &str) -> Self {
        PhloemError::NotFound(format!("memory {}", id))
    }

    /// Convenience constructor for a missing citation
    pub fn citation_not_found(id: &str) -> Self {
        PhloemError::NotFound(format!("citation {}", id))
    }
}
