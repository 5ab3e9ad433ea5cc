//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The channel handle was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Election service failed or went away.
    #[error("election error: {0}")]
    ElectionError(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] crosstab_store::StoreError),

    /// Message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] crosstab_core::CoreError),

    /// Rejected configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The peer task has stopped.
    #[error("peer stopped")]
    PeerStopped,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
