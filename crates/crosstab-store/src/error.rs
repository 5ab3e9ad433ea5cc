//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored record could not be decoded.
    #[error("malformed record under `{key}`: {reason}")]
    MalformedRecord { key: String, reason: String },

    /// Record could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] crosstab_core::CoreError),

    /// The database schema is not one this build can use.
    #[error("schema error: {0}")]
    Schema(String),

    /// Blocking task failed or the connection lock was poisoned.
    #[error("task error: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
