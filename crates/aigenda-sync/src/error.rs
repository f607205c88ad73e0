//! Error types for aigenda-sync

use thiserror::Error;

/// Result type alias using aigenda-sync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sync engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed at the network level
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Sync endpoint returned a non-success status
    #[error("Sync API error: {0}")]
    Api(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Local state store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid sync configuration
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
}
