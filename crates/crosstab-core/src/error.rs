//! Error types for the core crate.

use thiserror::Error;

/// Errors produced while encoding or decoding core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Frame or record was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tagged message had an unexpected shape.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Tagged message lacked a required field.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A state value uses a protocol tag in its `type` field and cannot be
    /// sent as an untagged update.
    #[error("state value carries reserved message tag `{0}`")]
    ReservedTag(String),

    /// Persisted record did not have the `{ "data": .. }` shape.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Channel keys must not be empty.
    #[error("channel key must not be empty")]
    EmptyChannelKey,
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
