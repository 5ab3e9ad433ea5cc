//! SQLite implementation of the Store trait.
//!
//! This is the durable backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crosstab_core::ChannelKey;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::schema::{self, now_millis};
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and its schema if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        schema::ensure(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::ensure(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("mutex poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn read(&self, key: &ChannelKey) -> Result<Option<String>> {
        let key = key.clone();

        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT record FROM records WHERE channel_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn write(&self, key: &ChannelKey, raw: &str) -> Result<()> {
        let key = key.clone();
        let raw = raw.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO records (channel_key, record, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(channel_key) DO UPDATE SET
                    record = excluded.record,
                    updated_at = excluded.updated_at",
                params![key.as_str(), raw, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &ChannelKey) -> Result<()> {
        let key = key.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM records WHERE channel_key = ?1",
                params![key.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<ChannelKey>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT channel_key FROM records ORDER BY channel_key")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            names
                .into_iter()
                .map(|name| {
                    ChannelKey::new(name).map_err(|e| StoreError::MalformedRecord {
                        key: String::new(),
                        reason: e.to_string(),
                    })
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Persistence;
    use crate::hooks::StorageHooks;
    use serde_json::json;

    fn key(name: &str) -> ChannelKey {
        ChannelKey::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.read(&key("nothing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_replaces() {
        let store = SqliteStore::open_memory().unwrap();

        store.write(&key("a"), "{\"data\":1}").await.unwrap();
        store.write(&key("a"), "{\"data\":2}").await.unwrap();

        assert_eq!(store.read(&key("a")).await.unwrap().as_deref(), Some("{\"data\":2}"));
        assert_eq!(store.keys().await.unwrap(), vec![key("a")]);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SqliteStore::open_memory().unwrap();
        store.write(&key("a"), "{}").await.unwrap();
        store.remove(&key("a")).await.unwrap();
        store.remove(&key("a")).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crosstab.db");

        {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let persistence = Persistence::new(store, StorageHooks::default());
            persistence.save(&key("session"), &json!({ "user": "ada" })).await.unwrap();
        }

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let persistence = Persistence::new(store, StorageHooks::default());
        let loaded = persistence.load(&key("session")).await.unwrap();
        assert_eq!(loaded, Some(json!({ "user": "ada" })));
    }
}
