//! Election service contract.
//!
//! The protocol consumes leader election as an external capability. An
//! [`Elector`] is one peer's view of the election for one channel: a
//! one-shot "you are now leader" notification plus a level-triggered
//! "some leader is known" signal. The two are observed independently.

use async_trait::async_trait;
use crosstab_core::PeerId;
use tokio::sync::watch;

use crate::error::Result;

/// One peer's handle on the election for its channel.
///
/// Implementations must guarantee that at most one peer per channel reports
/// `is_leader() == true` at any instant, and that a departed leader is
/// replaced by a remaining applicant within bounded time.
#[async_trait]
pub trait Elector: Send + Sync {
    /// Identity of the local peer.
    fn local_peer_id(&self) -> PeerId;

    /// Ask to become leader. Returns once the request is registered.
    async fn apply(&self) -> Result<()>;

    /// Resolve once this peer holds leadership.
    async fn await_leadership(&self) -> Result<()>;

    /// Whether any peer currently holds leadership.
    fn has_leader(&self) -> bool;

    /// Whether the local peer holds leadership.
    fn is_leader(&self) -> bool;

    /// Push notifications of the current leader, if the implementation has
    /// them. `None` makes callers poll [`has_leader`](Elector::has_leader).
    fn leader_updates(&self) -> Option<watch::Receiver<Option<PeerId>>> {
        None
    }

    /// Leave the election. If this peer was leader the seat is re-filled.
    async fn resign(&self);
}

/// An in-process election service for tests and single-process use.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};

    use crosstab_core::ChannelKey;

    use crate::error::SyncError;

    /// How an empty leader seat gets filled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ElectionPolicy {
        /// The earliest remaining applicant takes the seat immediately.
        #[default]
        FirstApplicant,
        /// The seat stays empty until [`MemoryElectionService::elect`].
        Manual,
    }

    /// Election state for one channel.
    #[derive(Debug, Default)]
    struct Seat {
        leader: Option<PeerId>,
        /// Applicants in application order.
        applicants: Vec<PeerId>,
        members: HashMap<PeerId, watch::Sender<Option<PeerId>>>,
    }

    impl Seat {
        fn fill(&mut self, policy: ElectionPolicy) {
            if self.leader.is_none() && policy == ElectionPolicy::FirstApplicant {
                self.leader = self.applicants.first().copied();
            }
        }

        fn announce(&self) {
            for sender in self.members.values() {
                sender.send_replace(self.leader);
            }
        }
    }

    /// Shared election state for every channel in the process.
    #[derive(Debug)]
    pub struct MemoryElectionService {
        policy: ElectionPolicy,
        seats: Mutex<HashMap<ChannelKey, Seat>>,
    }

    impl MemoryElectionService {
        /// Create a service that promotes the first applicant.
        pub fn new() -> Arc<Self> {
            Self::with_policy(ElectionPolicy::FirstApplicant)
        }

        pub fn with_policy(policy: ElectionPolicy) -> Arc<Self> {
            Arc::new(Self {
                policy,
                seats: Mutex::new(HashMap::new()),
            })
        }

        pub fn policy(&self) -> ElectionPolicy {
            self.policy
        }

        /// Join the election for `key` as `peer_id`.
        pub fn elector(self: &Arc<Self>, key: ChannelKey, peer_id: PeerId) -> MemoryElector {
            let status = {
                let mut seats = self.seats();
                let seat = seats.entry(key.clone()).or_default();
                let (tx, rx) = watch::channel(seat.leader);
                seat.members.insert(peer_id, tx);
                rx
            };

            MemoryElector {
                key,
                peer_id,
                service: Arc::clone(self),
                status,
                left: AtomicBool::new(false),
            }
        }

        /// Current leader of `key`.
        pub fn leader(&self, key: &ChannelKey) -> Option<PeerId> {
            self.seats().get(key).and_then(|seat| seat.leader)
        }

        /// Peers taking part in the election for `key`.
        pub fn members(&self, key: &ChannelKey) -> Vec<PeerId> {
            let mut members: Vec<PeerId> = self
                .seats()
                .get(key)
                .map(|seat| seat.members.keys().copied().collect())
                .unwrap_or_default();
            members.sort();
            members
        }

        /// Put `peer_id` in an empty seat. Fails if the seat is taken or the
        /// peer has not applied.
        pub fn elect(&self, key: &ChannelKey, peer_id: PeerId) -> bool {
            let mut seats = self.seats();
            let Some(seat) = seats.get_mut(key) else {
                return false;
            };
            if seat.leader.is_some() || !seat.applicants.contains(&peer_id) {
                return false;
            }
            seat.leader = Some(peer_id);
            seat.announce();
            tracing::info!(key = %key, peer = %peer_id.short(), "leader elected");
            true
        }

        fn apply(&self, key: &ChannelKey, peer_id: PeerId) {
            let mut seats = self.seats();
            let seat = seats.entry(key.clone()).or_default();
            if !seat.applicants.contains(&peer_id) {
                seat.applicants.push(peer_id);
            }
            if seat.leader.is_none() {
                seat.fill(self.policy);
                if let Some(leader) = seat.leader {
                    tracing::info!(key = %key, peer = %leader.short(), "leader elected");
                    seat.announce();
                }
            }
        }

        fn leave(&self, key: &ChannelKey, peer_id: &PeerId) {
            let mut seats = self.seats();
            let Some(seat) = seats.get_mut(key) else {
                return;
            };

            seat.applicants.retain(|p| p != peer_id);
            seat.members.remove(peer_id);

            if seat.leader == Some(*peer_id) {
                seat.leader = None;
                seat.fill(self.policy);
                if let Some(next) = seat.leader {
                    tracing::info!(key = %key, peer = %next.short(), "leader replaced");
                }
                seat.announce();
            }

            if seat.members.is_empty() {
                seats.remove(key);
            }
        }

        fn seats(&self) -> MutexGuard<'_, HashMap<ChannelKey, Seat>> {
            self.seats.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    /// In-memory elector implementation.
    #[derive(Debug)]
    pub struct MemoryElector {
        key: ChannelKey,
        peer_id: PeerId,
        service: Arc<MemoryElectionService>,
        status: watch::Receiver<Option<PeerId>>,
        left: AtomicBool,
    }

    impl MemoryElector {
        pub fn key(&self) -> &ChannelKey {
            &self.key
        }
    }

    #[async_trait]
    impl Elector for MemoryElector {
        fn local_peer_id(&self) -> PeerId {
            self.peer_id
        }

        async fn apply(&self) -> Result<()> {
            if self.left.load(Ordering::SeqCst) {
                return Err(SyncError::ElectionError("elector has resigned".into()));
            }
            self.service.apply(&self.key, self.peer_id);
            Ok(())
        }

        async fn await_leadership(&self) -> Result<()> {
            let me = Some(self.peer_id);
            let mut status = self.status.clone();
            status
                .wait_for(|leader| *leader == me)
                .await
                .map(|_| ())
                .map_err(|_| SyncError::ElectionError("left the election".into()))
        }

        fn has_leader(&self) -> bool {
            !self.left.load(Ordering::SeqCst) && self.status.borrow().is_some()
        }

        fn is_leader(&self) -> bool {
            !self.left.load(Ordering::SeqCst) && *self.status.borrow() == Some(self.peer_id)
        }

        fn leader_updates(&self) -> Option<watch::Receiver<Option<PeerId>>> {
            Some(self.status.clone())
        }

        async fn resign(&self) {
            if !self.left.swap(true, Ordering::SeqCst) {
                self.service.leave(&self.key, &self.peer_id);
            }
        }
    }

    impl Drop for MemoryElector {
        fn drop(&mut self) {
            if !self.left.swap(true, Ordering::SeqCst) {
                self.service.leave(&self.key, &self.peer_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{ElectionPolicy, MemoryElectionService};
    use super::*;
    use crosstab_core::ChannelKey;
    use std::time::Duration;

    fn key() -> ChannelKey {
        ChannelKey::new("election").unwrap()
    }

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 16])
    }

    #[tokio::test]
    async fn test_first_applicant_wins() {
        let service = MemoryElectionService::new();
        assert_eq!(service.policy(), ElectionPolicy::FirstApplicant);
        let a = service.elector(key(), peer(1));
        let b = service.elector(key(), peer(2));
        assert_eq!(a.key(), &key());

        assert!(!a.has_leader());
        a.apply().await.unwrap();
        b.apply().await.unwrap();

        assert!(a.is_leader());
        assert!(!b.is_leader());
        assert!(b.has_leader());
        assert_eq!(service.leader(&key()), Some(peer(1)));
        a.await_leadership().await.unwrap();
    }

    #[tokio::test]
    async fn test_departure_promotes_next() {
        let service = MemoryElectionService::new();
        let a = service.elector(key(), peer(1));
        let b = service.elector(key(), peer(2));
        let c = service.elector(key(), peer(3));
        for e in [&a, &b, &c] {
            e.apply().await.unwrap();
        }

        let waiting = tokio::spawn(async move {
            b.await_leadership().await.unwrap();
            b
        });

        a.resign().await;
        assert!(!a.is_leader());

        let b = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(b.is_leader());
        assert!(!c.is_leader());
    }

    #[tokio::test]
    async fn test_drop_counts_as_departure() {
        let service = MemoryElectionService::new();
        let a = service.elector(key(), peer(1));
        let b = service.elector(key(), peer(2));
        a.apply().await.unwrap();
        b.apply().await.unwrap();

        drop(a);
        assert!(b.is_leader());
        assert_eq!(service.members(&key()), vec![peer(2)]);
    }

    #[tokio::test]
    async fn test_manual_policy() {
        let service = MemoryElectionService::with_policy(ElectionPolicy::Manual);
        assert_eq!(service.policy(), ElectionPolicy::Manual);
        let a = service.elector(key(), peer(1));
        let b = service.elector(key(), peer(2));
        a.apply().await.unwrap();

        assert!(!a.has_leader());
        assert!(!service.elect(&key(), peer(2)), "b has not applied");

        b.apply().await.unwrap();
        assert!(service.elect(&key(), peer(2)));
        assert!(!service.elect(&key(), peer(1)), "seat already taken");
        assert!(b.is_leader());
        assert!(a.has_leader());

        drop(b);
        assert!(!a.has_leader());
    }

    #[tokio::test]
    async fn test_leader_updates_push() {
        let service = MemoryElectionService::new();
        let a = service.elector(key(), peer(1));
        let mut updates = a.leader_updates().unwrap();
        assert_eq!(*updates.borrow(), None);

        let b = service.elector(key(), peer(2));
        b.apply().await.unwrap();

        updates.changed().await.unwrap();
        assert_eq!(*updates.borrow(), Some(peer(2)));
    }

    #[tokio::test]
    async fn test_resigned_elector_cannot_apply() {
        let service = MemoryElectionService::new();
        let a = service.elector(key(), peer(1));
        a.resign().await;
        assert!(a.apply().await.is_err());
        assert!(a.await_leadership().await.is_err());
    }
}
