//! Peer task: runs one [`Protocol`] against a transport, elector and store.

use std::sync::Arc;
use std::time::Duration;

use crosstab_core::{ChannelKey, Message, PeerId, Role, StateValue};
use crosstab_store::{Persistence, SaveOutcome};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::election::Elector;
use crate::error::{Result, SyncError};
use crate::protocol::{Action, Protocol};
use crate::state::PeerPhase;
use crate::transport::Transport;

/// Where the leader keeps its copy of the value.
#[derive(Clone, Default)]
pub enum StorageMode {
    /// Nothing is stored.
    #[default]
    None,
    /// Read at leader init and written on every leader change.
    Durable(Persistence),
    /// Written like `Durable`, but only consulted when a leader's force ask
    /// goes unanswered.
    Session(Persistence),
}

impl StorageMode {
    fn persistence(&self) -> Option<&Persistence> {
        match self {
            StorageMode::Durable(p) | StorageMode::Session(p) => Some(p),
            StorageMode::None => None,
        }
    }
}

impl std::fmt::Debug for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::None => f.write_str("None"),
            StorageMode::Durable(_) => f.write_str("Durable"),
            StorageMode::Session(_) => f.write_str("Session"),
        }
    }
}

enum Command {
    Dispatch {
        value: StateValue,
        ack: oneshot::Sender<()>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy)]
enum ElectionEvent {
    /// Some peer holds the seat.
    LeaderKnown,
    /// This peer holds the seat.
    LeadershipAcquired,
}

/// Handle to a running peer task.
///
/// Dropping the handle tears the peer down.
#[derive(Debug)]
pub struct PeerHandle {
    key: ChannelKey,
    peer_id: PeerId,
    commands: mpsc::UnboundedSender<Command>,
    value: watch::Receiver<StateValue>,
    phase: watch::Receiver<PeerPhase>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Current local value.
    pub fn value(&self) -> StateValue {
        self.value.borrow().clone()
    }

    /// Watch the local value.
    pub fn subscribe(&self) -> watch::Receiver<StateValue> {
        self.value.clone()
    }

    pub fn phase(&self) -> PeerPhase {
        *self.phase.borrow()
    }

    /// Watch the phase (and with it the role).
    pub fn phase_updates(&self) -> watch::Receiver<PeerPhase> {
        self.phase.clone()
    }

    pub fn role(&self) -> Role {
        self.phase().role()
    }

    /// Whether the peer task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished() && !self.phase().is_closed()
    }

    /// Set the value locally and broadcast it.
    ///
    /// Resolves once the value has been applied. Nothing is applied when the
    /// value cannot travel as a state update ([`SyncError::Codec`]) or the
    /// peer has stopped ([`SyncError::PeerStopped`]).
    pub async fn dispatch(&self, value: StateValue) -> Result<()> {
        Message::check_update(&value)?;
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Dispatch { value, ack }).is_err() {
            tracing::debug!(key = %self.key, "dispatch ignored, peer stopped");
            return Err(SyncError::PeerStopped);
        }
        done.await.map_err(|_| SyncError::PeerStopped)
    }

    /// Tear the peer down and wait until it has left the channel.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
    }

    /// Wait until the phase satisfies `predicate`.
    ///
    /// Fails with [`SyncError::PeerStopped`] if the peer stops first.
    pub async fn wait_for_phase(&self, predicate: impl FnMut(&PeerPhase) -> bool) -> Result<PeerPhase> {
        let mut phase = self.phase.clone();
        let reached = phase.wait_for(predicate).await.map(|p| *p);
        reached.map_err(|_| SyncError::PeerStopped)
    }
}

/// One peer of a channel.
///
/// Owns the protocol state; every input is handled to completion before the
/// next one is taken.
pub struct Peer {
    key: ChannelKey,
    peer_id: PeerId,
    config: SyncConfig,
    protocol: Protocol,
    transport: Arc<dyn Transport>,
    elector: Arc<dyn Elector>,
    storage: StorageMode,
    debouncer: Debouncer,
    init_deadline: Option<Instant>,
    value_tx: watch::Sender<StateValue>,
    phase_tx: watch::Sender<PeerPhase>,
    watchers: Vec<JoinHandle<()>>,
}

impl Peer {
    /// Start a peer on the current tokio runtime.
    pub fn spawn(
        init: StateValue,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        elector: Arc<dyn Elector>,
        storage: StorageMode,
    ) -> Result<PeerHandle> {
        config
            .validate()
            .map_err(|reason| SyncError::InvalidConfig(reason.to_string()))?;

        let key = transport.key().clone();
        let peer_id = transport.local_peer_id();
        if elector.local_peer_id() != peer_id {
            return Err(SyncError::ElectionError(format!(
                "elector peer {} does not match transport peer {}",
                elector.local_peer_id().short(),
                peer_id.short()
            )));
        }

        let (value_tx, value) = watch::channel(init.clone());
        let (phase_tx, phase) = watch::channel(PeerPhase::Uninitialized);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let peer = Peer {
            key: key.clone(),
            peer_id,
            debouncer: Debouncer::new(config.debounce),
            config,
            protocol: Protocol::new(init),
            transport,
            elector,
            storage,
            init_deadline: None,
            value_tx,
            phase_tx,
            watchers: Vec::new(),
        };

        let span = tracing::info_span!("peer", key = %key, peer = %peer_id.short());
        let task = tokio::spawn(peer.run(command_rx).instrument(span));

        Ok(PeerHandle {
            key,
            peer_id,
            commands,
            value,
            phase,
            task,
        })
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.protocol.start();
        self.publish_state();

        if let Err(e) = self.elector.apply().await {
            tracing::error!("could not apply for leadership: {}", e);
            self.teardown().await;
            return;
        }

        let (events_tx, mut events) = mpsc::unbounded_channel();
        self.spawn_watchers(events_tx);
        tracing::debug!("joined channel");

        loop {
            let init_deadline = self.init_deadline;
            let debounce_deadline = self.debouncer.deadline();

            let outcome = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dispatch { value, ack }) => {
                        let outcome = self.handle_dispatch(value).await;
                        let _ = ack.send(());
                        outcome
                    }
                    Some(Command::Shutdown { ack }) => {
                        self.teardown().await;
                        let _ = ack.send(());
                        return;
                    }
                    None => break,
                },
                Some(event) = events.recv() => self.handle_election_event(event).await,
                message = self.transport.recv() => match message {
                    Ok(message) => self.handle_message(message).await,
                    Err(e) => Err(e),
                },
                _ = sleep_until(init_deadline.unwrap_or_else(Instant::now)), if init_deadline.is_some() => {
                    self.handle_init_timeout().await
                }
                _ = sleep_until(debounce_deadline.unwrap_or_else(Instant::now)), if debounce_deadline.is_some() => {
                    self.flush_debounced().await
                }
            };

            if let Err(e) = outcome {
                tracing::error!("transport failure, leaving channel: {}", e);
                break;
            }
        }

        self.teardown().await;
    }

    fn spawn_watchers(&mut self, events: mpsc::UnboundedSender<ElectionEvent>) {
        let elector = Arc::clone(&self.elector);
        let leadership = events.clone();
        let watch_leadership = async move {
            match elector.await_leadership().await {
                Ok(()) => {
                    let _ = leadership.send(ElectionEvent::LeadershipAcquired);
                }
                Err(e) => tracing::debug!("stopped waiting for leadership: {}", e),
            }
        };
        self.watchers
            .push(tokio::spawn(watch_leadership.in_current_span()));

        let elector = Arc::clone(&self.elector);
        let interval = self.config.check_leader_interval;
        let watch_leader = async move {
            wait_for_leader(elector.as_ref(), interval).await;
            let _ = events.send(ElectionEvent::LeaderKnown);
        };
        self.watchers.push(tokio::spawn(watch_leader.in_current_span()));
    }

    async fn handle_election_event(&mut self, event: ElectionEvent) -> Result<()> {
        match event {
            ElectionEvent::LeaderKnown => {
                if !self.protocol.awaits_leader_signal() {
                    return Ok(());
                }
                if self.elector.is_leader() {
                    self.become_leader().await
                } else {
                    tracing::debug!("leader known, asking for init value");
                    let actions = self.protocol.on_follower_known();
                    self.apply(actions).await
                }
            }
            ElectionEvent::LeadershipAcquired => self.become_leader().await,
        }
    }

    async fn become_leader(&mut self) -> Result<()> {
        let before = self.protocol.phase();
        let stored = if self.protocol.wants_stored_record() {
            self.load_durable().await
        } else {
            None
        };
        let actions = self.protocol.on_leadership(stored);
        let after = self.protocol.phase();
        if before != after {
            match after {
                PeerPhase::LeaderInit => tracing::info!("became leader, asking peers for a value"),
                PeerPhase::Synced(Role::Leader) if before.is_synced() => {
                    tracing::info!("promoted to leader")
                }
                PeerPhase::Synced(Role::Leader) => tracing::info!("leader synced from stored record"),
                _ => {}
            }
        }
        self.apply(actions).await
    }

    async fn handle_message(&mut self, message: Message) -> Result<()> {
        tracing::debug!(kind = %message.kind(), phase = %self.protocol.phase(), "message received");
        let was_synced = self.protocol.phase().is_synced();
        let actions = self.protocol.on_message(message);
        if !was_synced && self.protocol.phase().is_synced() {
            tracing::info!(role = %self.protocol.role(), "synced from peer");
        }
        self.apply(actions).await
    }

    async fn handle_init_timeout(&mut self) -> Result<()> {
        self.init_deadline = None;
        if self.protocol.phase() != PeerPhase::LeaderInit {
            return Ok(());
        }
        let fallback = self.load_session().await;
        tracing::info!(
            from_session = fallback.is_some(),
            "no peer answered, leader keeps its own value"
        );
        let actions = self.protocol.on_init_timeout(fallback);
        self.apply(actions).await
    }

    async fn handle_dispatch(&mut self, value: StateValue) -> Result<()> {
        let actions = self.protocol.dispatch(value);
        self.apply(actions).await
    }

    async fn flush_debounced(&mut self) -> Result<()> {
        match self.debouncer.take_due(Instant::now()) {
            Some(value) => self.publish(&Message::StateUpdate(value)).await,
            None => Ok(()),
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) -> Result<()> {
        let mut outcome = Ok(());
        for action in actions {
            let step = match action {
                Action::Publish(message) => self.publish(&message).await,
                Action::Broadcast(value) => match self.debouncer.push(value, Instant::now()) {
                    Some(value) => self.publish(&Message::StateUpdate(value)).await,
                    None => Ok(()),
                },
                Action::Persist(value) => {
                    self.persist(&value).await;
                    Ok(())
                }
                Action::ArmInitTimer => {
                    self.init_deadline = Some(Instant::now() + self.config.init_timeout());
                    Ok(())
                }
            };
            if step.is_err() {
                outcome = step;
                break;
            }
        }
        self.publish_state();
        outcome
    }

    async fn publish(&self, message: &Message) -> Result<()> {
        match self.transport.publish(message).await {
            Ok(()) => {
                tracing::debug!(kind = %message.kind(), "message sent");
                Ok(())
            }
            Err(SyncError::Codec(e)) => {
                tracing::warn!("dropping {} broadcast: {}", message.kind(), e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, value: &StateValue) {
        let Some(persistence) = self.storage.persistence() else {
            return;
        };
        debug_assert_eq!(self.protocol.phase(), PeerPhase::Synced(Role::Leader));
        match persistence.save(&self.key, value).await {
            Ok(SaveOutcome::Written) => tracing::debug!("value persisted"),
            Ok(SaveOutcome::Unchanged) => {}
            Err(e) => tracing::warn!("could not persist value: {}", e),
        }
    }

    async fn load_durable(&self) -> Option<StateValue> {
        match &self.storage {
            StorageMode::Durable(persistence) => self.load(persistence).await,
            _ => None,
        }
    }

    async fn load_session(&self) -> Option<StateValue> {
        match &self.storage {
            StorageMode::Session(persistence) => self.load(persistence).await,
            _ => None,
        }
    }

    async fn load(&self, persistence: &Persistence) -> Option<StateValue> {
        match persistence.load(&self.key).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                tracing::debug!("no stored record");
                None
            }
            Err(e) => {
                tracing::warn!("ignoring stored record: {}", e);
                None
            }
        }
    }

    fn publish_state(&self) {
        let value = self.protocol.value();
        self.value_tx.send_if_modified(|current| {
            if current != value {
                *current = value.clone();
                true
            } else {
                false
            }
        });
        let phase = self.protocol.phase();
        self.phase_tx.send_if_modified(|current| {
            if *current != phase {
                *current = phase;
                true
            } else {
                false
            }
        });
    }

    async fn teardown(&mut self) {
        if self.protocol.phase().is_closed() {
            return;
        }
        if let Some(dropped) = self.debouncer.cancel() {
            tracing::debug!(value = %dropped, "pending update dropped");
        }
        self.init_deadline = None;
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        // Report Closed before giving up the seat so two peers never both
        // show the leader role.
        self.protocol.close();
        self.publish_state();
        self.transport.close().await;
        self.elector.resign().await;
        tracing::debug!("left channel");
    }
}

/// Resolve once the elector reports any leader.
///
/// Uses push notifications when the elector offers them and polls every
/// `interval` otherwise.
async fn wait_for_leader(elector: &dyn Elector, interval: Duration) {
    if let Some(mut updates) = elector.leader_updates() {
        if updates.wait_for(Option::is_some).await.is_ok() {
            return;
        }
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if elector.has_leader() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::memory::MemoryElectionService;
    use crate::transport::memory::MemoryNetwork;
    use crosstab_store::{MemoryStore, StorageHooks, Store};
    use serde_json::json;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn key() -> ChannelKey {
        ChannelKey::new("peer-test").unwrap()
    }

    fn config() -> SyncConfig {
        SyncConfig::default().with_check_leader_interval(Duration::from_millis(20))
    }

    fn spawn(
        network: &Arc<MemoryNetwork>,
        election: &Arc<MemoryElectionService>,
        init: StateValue,
        storage: StorageMode,
    ) -> PeerHandle {
        let peer_id = PeerId::random();
        let transport = Arc::new(network.open(key(), peer_id));
        let elector = Arc::new(election.elector(key(), peer_id));
        Peer::spawn(init, config(), transport, elector, storage).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_leader_keeps_local_value() {
        init_tracing();
        let network = MemoryNetwork::new();
        let election = MemoryElectionService::new();

        let peer = spawn(&network, &election, json!(1), StorageMode::None);
        let phase = peer.wait_for_phase(|p| p.is_synced()).await.unwrap();

        assert_eq!(phase, PeerPhase::Synced(Role::Leader));
        assert_eq!(peer.value(), json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_syncs_from_leader() {
        let network = MemoryNetwork::new();
        let election = MemoryElectionService::new();

        let leader = spawn(&network, &election, json!("a"), StorageMode::None);
        leader.wait_for_phase(|p| p.is_synced()).await.unwrap();

        let follower = spawn(&network, &election, json!("b"), StorageMode::None);
        let phase = follower.wait_for_phase(|p| p.is_synced()).await.unwrap();

        assert_eq!(phase.role(), Role::Follower);
        assert_eq!(follower.value(), json!("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_reaches_other_peer() {
        let network = MemoryNetwork::new();
        let election = MemoryElectionService::new();

        let leader = spawn(&network, &election, json!(0), StorageMode::None);
        leader.wait_for_phase(|p| p.is_synced()).await.unwrap();
        let follower = spawn(&network, &election, json!(0), StorageMode::None);
        follower.wait_for_phase(|p| p.is_synced()).await.unwrap();

        follower.dispatch(json!(42)).await.unwrap();
        assert_eq!(follower.value(), json!(42));

        let mut values = leader.subscribe();
        values.wait_for(|v| *v == json!(42)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_tag_dispatch_rejected() {
        let network = MemoryNetwork::new();
        let election = MemoryElectionService::new();

        let peer = spawn(&network, &election, json!(0), StorageMode::None);
        peer.wait_for_phase(|p| p.is_synced()).await.unwrap();

        let err = peer
            .dispatch(json!({"type": "ASK_INIT_VALUE"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Codec(crosstab_core::CoreError::ReservedTag(_))
        ));
        assert_eq!(peer.value(), json!(0));
        assert!(peer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_writes_durable_store() {
        let network = MemoryNetwork::new();
        let election = MemoryElectionService::new();
        let store = Arc::new(MemoryStore::new());
        let persistence = Persistence::new(store.clone(), StorageHooks::default());

        let leader = spawn(
            &network,
            &election,
            json!(0),
            StorageMode::Durable(persistence),
        );
        leader.wait_for_phase(|p| p.is_synced()).await.unwrap();
        leader.dispatch(json!({"n": 1})).await.unwrap();

        let raw = store.read(&key()).await.unwrap();
        assert_eq!(raw.as_deref(), Some(r#"{"data":{"n":1}}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_and_ignores_dispatch() {
        init_tracing();
        let network = MemoryNetwork::new();
        let election = MemoryElectionService::new();

        let peer = spawn(&network, &election, json!(0), StorageMode::None);
        peer.wait_for_phase(|p| p.is_synced()).await.unwrap();

        assert!(peer.is_running());
        peer.shutdown().await;
        assert_eq!(peer.phase(), PeerPhase::Closed);
        assert!(!peer.is_running());
        assert!(matches!(
            peer.dispatch(json!(1)).await,
            Err(SyncError::PeerStopped)
        ));
        assert_eq!(peer.value(), json!(0));
        assert!(network.subscribers(&key()).is_empty());
        assert_eq!(election.leader(&key()), None);
    }

    #[tokio::test]
    async fn test_mismatched_identities_rejected() {
        let network = MemoryNetwork::new();
        let election = MemoryElectionService::new();
        let transport = Arc::new(network.open(key(), PeerId::random()));
        let elector = Arc::new(election.elector(key(), PeerId::random()));

        let result = Peer::spawn(json!(0), config(), transport, elector, StorageMode::None);
        assert!(matches!(result, Err(SyncError::ElectionError(_))));
    }
}
