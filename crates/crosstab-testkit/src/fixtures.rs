//! Test fixtures and helpers.
//!
//! Common setup code for multi-peer scenarios.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crosstab::{SharedState, SharedStateBuilder};
use crosstab_core::{ChannelKey, PeerId, StateValue};
use crosstab_store::{StorageHooks, Store};
use crosstab_sync::{
    ElectionPolicy, Elector, MemoryElectionService, MemoryNetwork, MemoryTransport, SyncConfig,
};
use tokio::sync::watch;

/// Leader check interval used by [`Cluster`] peers.
pub const FAST_CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Peers of one channel on a shared in-process network and election.
pub struct Cluster {
    key: ChannelKey,
    network: Arc<MemoryNetwork>,
    election: Arc<MemoryElectionService>,
    config: SyncConfig,
}

impl Cluster {
    /// A cluster where the first applicant becomes leader.
    ///
    /// # Panics
    ///
    /// Panics if `key` is empty.
    pub fn new(key: &str) -> Self {
        Self::with_policy(key, ElectionPolicy::FirstApplicant)
    }

    /// A cluster whose leader seat is filled by [`Cluster::elect`].
    pub fn manual(key: &str) -> Self {
        Self::with_policy(key, ElectionPolicy::Manual)
    }

    pub fn with_policy(key: &str, policy: ElectionPolicy) -> Self {
        Self {
            key: ChannelKey::new(key).expect("cluster key must not be empty"),
            network: MemoryNetwork::new(),
            election: MemoryElectionService::with_policy(policy),
            config: SyncConfig::default().with_check_leader_interval(FAST_CHECK_INTERVAL),
        }
    }

    /// Config used for every peer joined afterwards.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    pub fn election(&self) -> &Arc<MemoryElectionService> {
        &self.election
    }

    /// A builder preset with this cluster's key and config.
    pub fn builder(&self, init: StateValue) -> SharedStateBuilder {
        SharedState::builder(self.key.as_str(), init).config(self.config.clone())
    }

    /// Join a peer without storage.
    pub fn join(&self, init: StateValue) -> crosstab::Result<SharedState> {
        self.builder(init).open_memory(&self.network, &self.election)
    }

    /// Join a peer whose leader copy lives in `store`.
    pub fn join_durable(
        &self,
        init: StateValue,
        store: Arc<dyn Store>,
        hooks: StorageHooks,
    ) -> crosstab::Result<SharedState> {
        self.builder(init)
            .durable(store, hooks)
            .open_memory(&self.network, &self.election)
    }

    /// Join a peer that mirrors its leader copy into a session `store`.
    pub fn join_session(
        &self,
        init: StateValue,
        store: Arc<dyn Store>,
    ) -> crosstab::Result<SharedState> {
        self.builder(init)
            .session(store)
            .open_memory(&self.network, &self.election)
    }

    /// Join a peer whose elector offers no push notifications, so the
    /// leader must be found by polling.
    pub fn join_polling(&self, init: StateValue) -> crosstab::Result<SharedState> {
        let peer_id = PeerId::random();
        let transport = Arc::new(self.network.open(self.key.clone(), peer_id));
        let elector = PollingElector::new(self.election.elector(self.key.clone(), peer_id));
        self.builder(init).open(transport, Arc::new(elector))
    }

    /// A raw subscriber that takes no part in the protocol.
    pub fn observer(&self) -> MemoryTransport {
        self.network.open(self.key.clone(), PeerId::random())
    }

    /// Current leader according to the election service.
    pub fn leader(&self) -> Option<PeerId> {
        self.election.leader(&self.key)
    }

    /// Put `peer` in the empty leader seat.
    pub fn elect(&self, peer: &SharedState) -> bool {
        self.election.elect(&self.key, peer.peer_id())
    }

    /// Let in-flight messages and timers run out.
    pub async fn settle(&self) {
        tokio::time::sleep(self.config.check_leader_interval * 10).await;
    }
}

/// Wraps an elector and hides its push notifications.
pub struct PollingElector<E> {
    inner: E,
}

impl<E: Elector> PollingElector<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<E: Elector> Elector for PollingElector<E> {
    fn local_peer_id(&self) -> PeerId {
        self.inner.local_peer_id()
    }

    async fn apply(&self) -> crosstab_sync::Result<()> {
        self.inner.apply().await
    }

    async fn await_leadership(&self) -> crosstab_sync::Result<()> {
        self.inner.await_leadership().await
    }

    fn has_leader(&self) -> bool {
        self.inner.has_leader()
    }

    fn is_leader(&self) -> bool {
        self.inner.is_leader()
    }

    fn leader_updates(&self) -> Option<watch::Receiver<Option<PeerId>>> {
        None
    }

    async fn resign(&self) {
        self.inner.resign().await
    }
}
