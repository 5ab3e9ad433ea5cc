//! # crosstab
//!
//! Shared state for the peers of a broadcast channel: every peer that opens
//! the same key sees the same value, one elected leader owns the stored copy,
//! and newcomers pick up the current value when they join.
//!
//! ## Overview
//!
//! - **Reads** are local: [`SharedState::value`] never waits
//! - **Writes** apply locally and are broadcast; the last write wins
//! - **Leadership** decides who answers newcomers and who persists
//! - **Persistence** is optional: durable (survives restarts) or session
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crosstab::SharedState;
//! use crosstab::store::{SqliteStore, StorageHooks};
//! use crosstab::sync::{MemoryElectionService, MemoryNetwork};
//! use serde_json::json;
//!
//! async fn example() -> crosstab::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let election = MemoryElectionService::new();
//!     let store = Arc::new(SqliteStore::open("crosstab.db")?);
//!
//!     let counter = SharedState::builder("counter", json!(0))
//!         .durable(store, StorageHooks::default())
//!         .open_memory(&network, &election)?;
//!
//!     counter.synced().await?;
//!     counter.dispatch(json!(1)).await?;
//!
//!     let _cleanup = counter.run_if_leader(|| async {
//!         // periodic work that only one peer should do
//!     });
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `crosstab::core` - Message codec, channel keys, peer ids
//! - `crosstab::store` - Record storage, SQLite and in-memory
//! - `crosstab::sync` - Transport, election and the protocol itself

pub mod error;
pub mod shared;

// Re-export component crates
pub use crosstab_core as core;
pub use crosstab_store as store;
pub use crosstab_sync as sync;

pub use error::{CrossTabError, Result};
pub use shared::{LeaderTask, SharedState, SharedStateBuilder};

// Re-export commonly used types
pub use crosstab_core::{ChannelKey, Message, PeerId, Role, StateValue};
pub use crosstab_sync::{PeerPhase, SyncConfig};
