//! Error types for alert storage operations

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during alert storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Opening or connecting to the database failed
    #[error("failed to open alert database: {0}")]
    Connection(String),

    /// A query or statement failed
    #[error("alert store query failed: {0}")]
    Query(String),

    /// Metadata (de)serialization failed
    #[error("alert metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Neither the configured path nor the per-user fallback is usable
    #[error("alert database path is not writable: {0}")]
    Unwritable(PathBuf),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Query(err.to_string())
    }
}
