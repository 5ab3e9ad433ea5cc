//! # crosstab testkit
//!
//! Testing utilities for crosstab.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a [`Cluster`] of peers sharing one in-process network and
//!   election service
//! - **Generators**: proptest strategies for values, keys and messages
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use crosstab_testkit::Cluster;
//! use serde_json::json;
//!
//! async fn example() -> crosstab::Result<()> {
//!     let cluster = Cluster::new("todos");
//!     let leader = cluster.join(json!([]))?;
//!     let follower = cluster.join(json!([]))?;
//!     leader.synced().await?;
//!     follower.synced().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use crosstab_testkit::generators::message;
//!
//! proptest! {
//!     #[test]
//!     fn wire_round_trip(msg in message()) {
//!         let frame = msg.encode().unwrap();
//!         prop_assert_eq!(crosstab::Message::decode(&frame).unwrap(), msg);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{Cluster, PollingElector, FAST_CHECK_INTERVAL};
