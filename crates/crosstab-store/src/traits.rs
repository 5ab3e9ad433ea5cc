//! Store trait: the abstract interface for record persistence.
//!
//! Records are stored as raw text under the channel key, the way a browser
//! keeps them in local or session storage. Encoding lives in
//! [`Persistence`](crate::Persistence).

use async_trait::async_trait;
use crosstab_core::ChannelKey;

use crate::error::Result;

/// Async key-value storage for raw records.
///
/// # Design Notes
///
/// - `read` returns `Ok(None)` for a key that was never written.
/// - `write` replaces any previous record for the key.
/// - Durability is a property of the implementation: [`SqliteStore`]
///   survives restarts, [`MemoryStore`] lives as long as its owner.
///
/// [`SqliteStore`]: crate::SqliteStore
/// [`MemoryStore`]: crate::MemoryStore
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the raw record stored under `key`.
    async fn read(&self, key: &ChannelKey) -> Result<Option<String>>;

    /// Store `raw` under `key`.
    async fn write(&self, key: &ChannelKey, raw: &str) -> Result<()>;

    /// Delete the record under `key`. Deleting a missing key is not an error.
    async fn remove(&self, key: &ChannelKey) -> Result<()>;

    /// All keys with a record, sorted.
    async fn keys(&self) -> Result<Vec<ChannelKey>>;
}
