//! Channel transport abstraction.
//!
//! A transport is one peer's handle on a broadcast channel. Every published
//! message goes to every other subscriber of the same key. Delivery is
//! at-most-once and only ordered per sender; the protocol above tolerates
//! loss by re-asking.

use async_trait::async_trait;
use crosstab_core::{ChannelKey, Message, PeerId};

use crate::error::Result;

/// Broadcast channel handle for one peer.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// The channel this handle is subscribed to.
    fn key(&self) -> &ChannelKey;

    /// Identity of the local peer.
    fn local_peer_id(&self) -> PeerId;

    /// Broadcast a message to every other subscriber.
    ///
    /// Fails with [`SyncError::ChannelClosed`](crate::SyncError::ChannelClosed)
    /// after [`close`](Transport::close).
    async fn publish(&self, message: &Message) -> Result<()>;

    /// Receive the next message delivered to this subscriber.
    async fn recv(&self) -> Result<Message>;

    /// Leave the channel and release its resources.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An in-process broadcast network for tests and single-process use.
///
/// Frames travel as JSON text so every hop goes through the wire codec.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, RwLock};
    use tokio::sync::{mpsc, Mutex};

    use crate::error::SyncError;

    /// Default per-subscriber queue length.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Message envelope for internal routing.
    #[derive(Debug, Clone)]
    struct Envelope {
        from: PeerId,
        frame: String,
    }

    type Subscribers = HashMap<PeerId, mpsc::Sender<Envelope>>;

    /// Shared state for the memory transport network.
    #[derive(Debug)]
    pub struct MemoryNetwork {
        /// Subscriber queues per channel.
        channels: RwLock<HashMap<ChannelKey, Subscribers>>,
        capacity: usize,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Self::with_capacity(DEFAULT_CAPACITY)
        }

        /// Create a network whose subscriber queues hold `capacity` frames.
        /// Frames beyond that are dropped.
        pub fn with_capacity(capacity: usize) -> Arc<Self> {
            Arc::new(Self {
                channels: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
            })
        }

        /// Subscribe `peer_id` to `key`.
        pub fn open(self: &Arc<Self>, key: ChannelKey, peer_id: PeerId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(self.capacity);

            self.channels
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry(key.clone())
                .or_default()
                .insert(peer_id, tx);

            tracing::debug!(key = %key, peer = %peer_id.short(), "channel opened");

            MemoryTransport {
                key,
                peer_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
                closed: AtomicBool::new(false),
            }
        }

        /// Peers currently subscribed to `key`.
        pub fn subscribers(&self, key: &ChannelKey) -> Vec<PeerId> {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            let mut peers: Vec<PeerId> = channels
                .get(key)
                .map(|subs| subs.keys().copied().collect())
                .unwrap_or_default();
            peers.sort();
            peers
        }

        fn deliver(&self, key: &ChannelKey, from: PeerId, frame: String) {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            let Some(subs) = channels.get(key) else {
                return;
            };

            for (peer_id, sender) in subs.iter() {
                if *peer_id == from {
                    continue;
                }
                let envelope = Envelope {
                    from,
                    frame: frame.clone(),
                };
                if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(envelope) {
                    tracing::debug!(key = %key, peer = %peer_id.short(), "subscriber queue full, frame dropped");
                }
            }
        }

        fn leave(&self, key: &ChannelKey, peer_id: &PeerId) {
            let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
            if let Some(subs) = channels.get_mut(key) {
                subs.remove(peer_id);
                if subs.is_empty() {
                    channels.remove(key);
                }
            }
        }
    }

    /// In-memory transport implementation.
    #[derive(Debug)]
    pub struct MemoryTransport {
        key: ChannelKey,
        peer_id: PeerId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
        closed: AtomicBool,
    }

    impl MemoryTransport {
        /// Broadcast a raw frame, bypassing the encoder.
        pub fn publish_frame(&self, frame: impl Into<String>) -> Result<()> {
            if self.is_closed() {
                return Err(SyncError::ChannelClosed);
            }
            self.network.deliver(&self.key, self.peer_id, frame.into());
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        fn key(&self) -> &ChannelKey {
            &self.key
        }

        fn local_peer_id(&self) -> PeerId {
            self.peer_id
        }

        async fn publish(&self, message: &Message) -> Result<()> {
            let frame = message.encode()?;
            self.publish_frame(frame)
        }

        async fn recv(&self) -> Result<Message> {
            let mut rx = self.receiver.lock().await;
            loop {
                if self.is_closed() {
                    return Err(SyncError::ChannelClosed);
                }
                let envelope = rx.recv().await.ok_or(SyncError::ChannelClosed)?;
                match Message::decode(&envelope.frame) {
                    Ok(message) => return Ok(message),
                    Err(e) => {
                        tracing::warn!(
                            key = %self.key,
                            from = %envelope.from.short(),
                            "dropping undecodable frame: {}",
                            e
                        );
                    }
                }
            }
        }

        async fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                // Dropping our sender ends any pending recv.
                self.network.leave(&self.key, &self.peer_id);
                tracing::debug!(key = %self.key, peer = %self.peer_id.short(), "channel closed");
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Drop for MemoryTransport {
        fn drop(&mut self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.network.leave(&self.key, &self.peer_id);
            }
        }
    }
}
