//! # crosstab store
//!
//! Persistence for the leader's copy of a channel value.
//!
//! ## Overview
//!
//! The [`Store`] trait is a small async key-value interface over raw text.
//! [`Persistence`] sits on top of it and owns the record format
//! (`{ "data": <value> }`) together with the optional read/save hooks.
//!
//! ## Key Types
//!
//! - [`Store`] - async trait for raw record storage
//! - [`SqliteStore`] - durable storage, survives process restarts
//! - [`MemoryStore`] - ephemeral storage, lives as long as its owner
//! - [`StorageHooks`] - `on_read` / `on_save` value transforms
//! - [`Persistence`] - record encoding + hooks + change detection
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crosstab_core::ChannelKey;
//! use crosstab_store::{Persistence, SqliteStore, StorageHooks};
//! use serde_json::json;
//!
//! async fn example() {
//!     let store = Arc::new(SqliteStore::open("crosstab.db").unwrap());
//!     let persistence = Persistence::new(store, StorageHooks::default());
//!
//!     let key = ChannelKey::new("counter").unwrap();
//!     persistence.save(&key, &json!(3)).await.unwrap();
//!     assert_eq!(persistence.load(&key).await.unwrap(), Some(json!(3)));
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Absent is not an error**: a missing record loads as `Ok(None)`
//! - **Malformed is an error**: callers decide how to fall back
//! - **Unchanged writes are skipped**: saving the record that is already
//!   stored returns [`SaveOutcome::Unchanged`]

pub mod adapter;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use adapter::{Persistence, SaveOutcome};
pub use error::{Result, StoreError};
pub use hooks::StorageHooks;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::Store;
