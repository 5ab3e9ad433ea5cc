//! Error types for the shared-state API.

use crosstab_core::CoreError;
use crosstab_store::StoreError;
use crosstab_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while opening or driving a [`SharedState`](crate::SharedState).
#[derive(Debug, Error)]
pub enum CrossTabError {
    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CoreError),

    /// Rejected configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type for shared-state operations.
pub type Result<T> = std::result::Result<T, CrossTabError>;
