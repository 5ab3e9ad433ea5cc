//! `SharedState`: one value kept in sync across the peers of a channel.

use std::future::Future;
use std::sync::Arc;

use crosstab_core::{ChannelKey, PeerId, Role, StateValue};
use crosstab_store::{Persistence, StorageHooks, Store};
use crosstab_sync::{
    Elector, MemoryElectionService, MemoryNetwork, Peer, PeerHandle, PeerPhase, StorageMode,
    SyncConfig, SyncError, Transport,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{CrossTabError, Result};

/// Builder for [`SharedState`].
#[derive(Debug)]
pub struct SharedStateBuilder {
    key: String,
    init: StateValue,
    config: SyncConfig,
    storage: StorageMode,
}

impl SharedStateBuilder {
    /// Timing configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep the value in `store` across restarts. The leader reads it on
    /// startup and writes every change.
    pub fn durable(mut self, store: Arc<dyn Store>, hooks: StorageHooks) -> Self {
        self.storage = StorageMode::Durable(Persistence::new(store, hooks));
        self
    }

    /// Mirror the value into `store` for the current session only.
    ///
    /// The record is consulted when a restarted leader finds nobody to ask.
    pub fn session(mut self, store: Arc<dyn Store>) -> Self {
        self.storage = StorageMode::Session(Persistence::new(store, StorageHooks::default()));
        self
    }

    /// Join the channel through `transport`, competing through `elector`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        self,
        transport: Arc<dyn Transport>,
        elector: Arc<dyn Elector>,
    ) -> Result<SharedState> {
        let key = self.channel_key()?;
        if transport.key() != &key {
            return Err(CrossTabError::InvalidConfig(format!(
                "transport is subscribed to {}, expected {}",
                transport.key(),
                key
            )));
        }
        self.config
            .validate()
            .map_err(|reason| CrossTabError::InvalidConfig(reason.into()))?;

        let peer = Peer::spawn(self.init, self.config, transport, elector, self.storage)?;
        tracing::debug!(key = %key, peer = %peer.peer_id().short(), "shared state opened");
        Ok(SharedState { peer })
    }

    /// Join an in-process channel with a fresh peer id.
    pub fn open_memory(
        self,
        network: &Arc<MemoryNetwork>,
        election: &Arc<MemoryElectionService>,
    ) -> Result<SharedState> {
        let key = self.channel_key()?;
        let peer_id = PeerId::random();
        let transport = Arc::new(network.open(key.clone(), peer_id));
        let elector = Arc::new(election.elector(key, peer_id));
        self.open(transport, elector)
    }

    fn channel_key(&self) -> Result<ChannelKey> {
        Ok(ChannelKey::new(self.key.clone())?)
    }
}

/// A value shared by every peer on the same channel key.
///
/// Reads are local. Writes apply locally at once and are broadcast to the
/// other peers. One peer is elected leader; it answers newcomers and owns
/// the stored copy.
///
/// Dropping the last handle leaves the channel.
#[derive(Debug)]
pub struct SharedState {
    peer: PeerHandle,
}

impl SharedState {
    /// Start building a shared state on `key` with local default `init`.
    pub fn builder(key: impl Into<String>, init: StateValue) -> SharedStateBuilder {
        SharedStateBuilder {
            key: key.into(),
            init,
            config: SyncConfig::default(),
            storage: StorageMode::None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Value
    // ─────────────────────────────────────────────────────────────────────────

    /// Current local value.
    pub fn value(&self) -> StateValue {
        self.peer.value()
    }

    /// Replace the value and broadcast it.
    ///
    /// Resolves once the value is applied locally. An object whose `type`
    /// is `ASK_INIT_VALUE` or `RETURN_INIT_VALUE` cannot be told apart from a
    /// protocol message on the wire; it is refused with
    /// [`CrossTabError::Codec`] and the local value is left alone. After the
    /// peer has stopped this does nothing and fails with
    /// [`SyncError::PeerStopped`].
    pub async fn dispatch(&self, value: StateValue) -> Result<()> {
        self.peer.dispatch(value).await.map_err(|e| match e {
            SyncError::Codec(e) => CrossTabError::Codec(e),
            e => CrossTabError::Sync(e),
        })
    }

    /// Watch the local value.
    pub fn subscribe(&self) -> watch::Receiver<StateValue> {
        self.peer.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.peer.role()
    }

    pub fn phase(&self) -> PeerPhase {
        self.peer.phase()
    }

    pub fn phase_updates(&self) -> watch::Receiver<PeerPhase> {
        self.peer.phase_updates()
    }

    /// Whether the initial value has been settled.
    pub fn is_synced(&self) -> bool {
        self.peer.phase().is_synced()
    }

    /// Wait until the initial value has been settled.
    pub async fn synced(&self) -> Result<PeerPhase> {
        Ok(self.peer.wait_for_phase(PeerPhase::is_synced).await?)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.peer_id()
    }

    pub fn key(&self) -> &ChannelKey {
        self.peer.key()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `effect` whenever this peer is leader.
    ///
    /// A new future is started each time the role becomes leader. A running
    /// one is cancelled when leadership is lost or the peer stops. Dropping
    /// the returned [`LeaderTask`] stops the whole thing.
    pub fn run_if_leader<F, Fut>(&self, mut effect: F) -> LeaderTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut phase = self.peer.phase_updates();
        let key = self.key().clone();
        let handle = tokio::spawn(async move {
            loop {
                if !wait_for_role(&mut phase, true).await {
                    return;
                }
                tracing::debug!(key = %key, "leader effect started");
                let run = effect();
                tokio::select! {
                    _ = run => {
                        if !wait_for_role(&mut phase, false).await {
                            return;
                        }
                    }
                    lost = wait_for_role(&mut phase, false) => {
                        tracing::debug!(key = %key, "leader effect cancelled");
                        if !lost {
                            return;
                        }
                    }
                }
            }
        });
        LeaderTask { handle }
    }

    /// Leave the channel. Pending debounced updates are dropped.
    pub async fn shutdown(&self) {
        self.peer.shutdown().await;
    }
}

/// Wait until the leader role is (or is not) held. Returns `false` once the
/// peer is gone.
async fn wait_for_role(phase: &mut watch::Receiver<PeerPhase>, leader: bool) -> bool {
    phase
        .wait_for(|p| p.role().is_leader() == leader)
        .await
        .is_ok()
}

/// Handle to a [`SharedState::run_if_leader`] registration.
///
/// Aborts the effect when dropped.
#[derive(Debug)]
pub struct LeaderTask {
    handle: JoinHandle<()>,
}

impl LeaderTask {
    /// Stop running the effect.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for LeaderTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
