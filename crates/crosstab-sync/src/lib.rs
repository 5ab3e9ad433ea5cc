//! # crosstab sync
//!
//! Leader-coordinated synchronization of one value across the peers of a
//! broadcast channel.
//!
//! ## Overview
//!
//! Every peer joins a channel and applies for leadership. Exactly one peer is
//! leader at a time. The leader owns the persisted copy of the value and
//! answers newcomers; followers ask the leader for the value when they join.
//! After that, any peer may write and every write is broadcast.
//!
//! ## Key Properties
//!
//! - **Single initialization**: a peer settles its initial value once; late
//!   replies are dropped
//! - **Last writer wins**: a received update always replaces the local value
//! - **Leader-only persistence**: only an initialized leader writes the store
//! - **Failover**: a promoted follower re-announces its value unprompted
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crosstab_core::{ChannelKey, PeerId};
//! use crosstab_sync::{MemoryElectionService, MemoryNetwork, Peer, StorageMode, SyncConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let election = MemoryElectionService::new();
//!
//!     let key = ChannelKey::new("counter").unwrap();
//!     let id = PeerId::random();
//!     let transport = Arc::new(network.open(key.clone(), id));
//!     let elector = Arc::new(election.elector(key, id));
//!
//!     let peer = Peer::spawn(json!(0), SyncConfig::default(), transport, elector, StorageMode::None)
//!         .unwrap();
//!     peer.dispatch(json!(1)).await.unwrap();
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Follower                            Leader
//!   |-------- ASK_INIT_VALUE -------->|
//!   |<------- RETURN_INIT_VALUE ------|
//!   |-------- <value> --------------->|   (state update, persisted)
//!   |<------- <value> ----------------|
//! ```
//!
//! A leader with nothing stored first broadcasts a forced ask, which any peer
//! holding a value may answer, and falls back to its own value on timeout.

pub mod config;
pub mod debounce;
pub mod election;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod state;
pub mod transport;

pub use config::{SyncConfig, DEFAULT_CHECK_LEADER_INTERVAL};
pub use debounce::Debouncer;
pub use election::memory::{ElectionPolicy, MemoryElectionService, MemoryElector};
pub use election::Elector;
pub use error::{Result, SyncError};
pub use peer::{Peer, PeerHandle, StorageMode};
pub use protocol::{Action, Protocol};
pub use state::PeerPhase;
pub use transport::memory::{MemoryNetwork, MemoryTransport, DEFAULT_CAPACITY};
pub use transport::Transport;
