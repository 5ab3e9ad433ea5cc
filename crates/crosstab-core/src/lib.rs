//! # crosstab core
//!
//! Core primitives shared by every crosstab crate: channel keys, peer
//! identities, roles, the protocol message codec and the persisted record
//! format.
//!
//! ## Overview
//!
//! A *channel* is a broadcast scope identified by a [`ChannelKey`]. Every
//! *peer* on a channel holds a replica of one JSON value ([`StateValue`]) and
//! exchanges [`Message`]s with the other peers. One peer at a time is the
//! leader; it answers initial-value requests and owns the
//! [`PersistedRecord`].
//!
//! ## Wire format
//!
//! ```text
//! { "type": "ASK_INIT_VALUE", "force": bool }
//! { "type": "RETURN_INIT_VALUE", "state": <value> }
//! <value>                                            (state update, untagged)
//! ```
//!
//! ```rust
//! use crosstab_core::Message;
//! use serde_json::json;
//!
//! let frame = Message::AskInitValue { force: true }.encode().unwrap();
//! assert_eq!(Message::decode(&frame).unwrap(), Message::AskInitValue { force: true });
//!
//! let update = Message::decode("{\"count\":3}").unwrap();
//! assert_eq!(update, Message::StateUpdate(json!({ "count": 3 })));
//! ```

pub mod error;
pub mod message;
pub mod record;
pub mod types;

pub use error::{CoreError, Result};
pub use message::{Message, MessageKind, ASK_INIT_VALUE, RETURN_INIT_VALUE};
pub use record::PersistedRecord;
pub use types::{ChannelKey, PeerId, Role, StateValue};
