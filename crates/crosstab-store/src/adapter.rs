//! Persistence adapter: record encoding, hooks and change detection on top
//! of a [`Store`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crosstab_core::{ChannelKey, PersistedRecord, StateValue};

use crate::error::{Result, StoreError};
use crate::hooks::StorageHooks;
use crate::traits::Store;

/// Result of [`Persistence::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new record was written.
    Written,
    /// The encoded record equals what is already stored; nothing was written.
    Unchanged,
}

/// Reads and writes `{ "data": .. }` records through a [`Store`].
///
/// Keeps the last raw record it read or wrote per key so repeated saves of
/// the same value do not touch the store.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn Store>,
    hooks: StorageHooks,
    last_seen: Arc<Mutex<HashMap<ChannelKey, String>>>,
}

impl Persistence {
    pub fn new(store: Arc<dyn Store>, hooks: StorageHooks) -> Self {
        Self {
            store,
            hooks,
            last_seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn hooks(&self) -> &StorageHooks {
        &self.hooks
    }

    /// Load the value stored under `key`, applying `on_read`.
    ///
    /// Returns `Ok(None)` when no record exists and
    /// [`StoreError::MalformedRecord`] when the record cannot be decoded.
    pub async fn load(&self, key: &ChannelKey) -> Result<Option<StateValue>> {
        let raw = match self.store.read(key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let record = PersistedRecord::decode(&raw).map_err(|e| StoreError::MalformedRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        self.remember(key, raw);
        Ok(Some(self.hooks.apply_read(record.data)))
    }

    /// Save `value` under `key`, applying `on_save`.
    ///
    /// Skips the write when the encoded record equals the stored one.
    pub async fn save(&self, key: &ChannelKey, value: &StateValue) -> Result<SaveOutcome> {
        let data = self.hooks.apply_save(value.clone());
        let raw = PersistedRecord::new(data).encode()?;

        let cached = self.last_seen().get(key).cloned();
        let current = match cached {
            Some(raw) => Some(raw),
            None => self.store.read(key).await?,
        };

        if current.as_deref() == Some(raw.as_str()) {
            self.remember(key, raw);
            return Ok(SaveOutcome::Unchanged);
        }

        self.store.write(key, &raw).await?;
        tracing::debug!(key = %key, bytes = raw.len(), "record written");
        self.remember(key, raw);
        Ok(SaveOutcome::Written)
    }

    /// Delete the record under `key`.
    pub async fn clear(&self, key: &ChannelKey) -> Result<()> {
        self.store.remove(key).await?;
        self.last_seen().remove(key);
        Ok(())
    }

    fn remember(&self, key: &ChannelKey, raw: String) {
        self.last_seen().insert(key.clone(), raw);
    }

    fn last_seen(&self) -> MutexGuard<'_, HashMap<ChannelKey, String>> {
        self.last_seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").field("hooks", &self.hooks).finish()
    }
}
