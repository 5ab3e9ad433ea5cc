//! In-memory implementation of the Store trait.
//!
//! This is the ephemeral store: records live as long as the `MemoryStore`
//! does. Share one through an `Arc` to let a session outlive the peers that
//! write to it, the way session storage outlives a page reload.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use crosstab_core::ChannelKey;

use crate::error::Result;
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<ChannelKey, String>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, key: &ChannelKey) -> Result<Option<String>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(key).cloned())
    }

    async fn write(&self, key: &ChannelKey, raw: &str) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(key.clone(), raw.to_string());
        Ok(())
    }

    async fn remove(&self, key: &ChannelKey) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<ChannelKey>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let key = ChannelKey::new("a").unwrap();

        assert_eq!(store.read(&key).await.unwrap(), None);

        store.write(&key, "{\"data\":1}").await.unwrap();
        assert_eq!(store.read(&key).await.unwrap().as_deref(), Some("{\"data\":1}"));

        store.write(&key, "{\"data\":2}").await.unwrap();
        assert_eq!(store.read(&key).await.unwrap().as_deref(), Some("{\"data\":2}"));
        assert_eq!(store.len(), 1);

        store.remove(&key).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = MemoryStore::new();
        for name in ["b", "a", "c"] {
            store.write(&ChannelKey::new(name).unwrap(), "{}").await.unwrap();
        }
        let keys: Vec<String> = store
            .keys()
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }
}
