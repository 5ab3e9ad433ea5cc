//! Synchronization state machine.
//!
//! [`Protocol`] owns a peer's value and phase and turns each input (election
//! outcome, inbound message, timer, local dispatch) into a list of
//! [`Action`]s. It performs no IO; the [`Peer`](crate::Peer) task executes
//! the actions against the transport, store and timers.

use crosstab_core::{Message, Role, StateValue};

use crate::state::PeerPhase;

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Broadcast a protocol message now.
    Publish(Message),
    /// Broadcast `STATE_UPDATE(value)`, subject to debouncing.
    Broadcast(StateValue),
    /// Write the value to the configured store.
    Persist(StateValue),
    /// Start the leader-init timeout.
    ArmInitTimer,
}

/// Per-peer synchronization state.
#[derive(Debug, Clone)]
pub struct Protocol {
    value: StateValue,
    phase: PeerPhase,
    /// Set once the value came from somewhere other than the local default.
    holds_value: bool,
}

impl Protocol {
    pub fn new(init: StateValue) -> Self {
        Self {
            value: init,
            phase: PeerPhase::Uninitialized,
            holds_value: false,
        }
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    pub fn role(&self) -> Role {
        self.phase.role()
    }

    /// Whether this peer can vouch for its value when force-asked.
    pub fn holds_value(&self) -> bool {
        self.holds_value || self.phase.is_synced()
    }

    /// Whether a leader-known signal still changes anything.
    pub fn awaits_leader_signal(&self) -> bool {
        matches!(
            self.phase,
            PeerPhase::AwaitingLeader | PeerPhase::Synced(Role::Unknown)
        )
    }

    /// Whether the next leadership notification runs leader init, which is
    /// the only path that consults the durable record.
    pub fn wants_stored_record(&self) -> bool {
        matches!(
            self.phase,
            PeerPhase::AwaitingLeader | PeerPhase::FollowerInit
        )
    }

    /// Channel opened and leadership requested.
    pub fn start(&mut self) {
        if self.phase == PeerPhase::Uninitialized {
            self.phase = PeerPhase::AwaitingLeader;
        }
    }

    /// A leader exists and it is not this peer.
    pub fn on_follower_known(&mut self) -> Vec<Action> {
        match self.phase {
            PeerPhase::AwaitingLeader => {
                self.phase = PeerPhase::FollowerInit;
                vec![Action::Publish(Message::AskInitValue { force: false })]
            }
            PeerPhase::Synced(Role::Unknown) => {
                self.phase = PeerPhase::Synced(Role::Follower);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// This peer holds leadership.
    ///
    /// `stored` is the decoded durable record, when one was found. It is only
    /// used if this call runs leader init. Leader init always ends with a
    /// `RETURN_INIT_VALUE` broadcast, so followers whose ask went to a leader
    /// that has since left still get an answer.
    pub fn on_leadership(&mut self, stored: Option<StateValue>) -> Vec<Action> {
        match self.phase {
            PeerPhase::AwaitingLeader | PeerPhase::FollowerInit => match stored {
                Some(value) => {
                    self.adopt(value);
                    self.phase = PeerPhase::Synced(Role::Leader);
                    vec![self.answer()]
                }
                None => {
                    self.phase = PeerPhase::LeaderInit;
                    vec![
                        Action::Publish(Message::AskInitValue { force: true }),
                        Action::ArmInitTimer,
                    ]
                }
            },
            // Promotion after the previous leader left.
            PeerPhase::Synced(Role::Follower) | PeerPhase::Synced(Role::Unknown) => {
                self.phase = PeerPhase::Synced(Role::Leader);
                vec![self.answer(), Action::Persist(self.value.clone())]
            }
            PeerPhase::Uninitialized
            | PeerPhase::LeaderInit
            | PeerPhase::Synced(Role::Leader)
            | PeerPhase::Closed => Vec::new(),
        }
    }

    /// Nobody answered the force ask in time.
    ///
    /// `fallback` is the session record, if any; otherwise the local value
    /// is kept.
    pub fn on_init_timeout(&mut self, fallback: Option<StateValue>) -> Vec<Action> {
        if self.phase != PeerPhase::LeaderInit {
            return Vec::new();
        }
        if let Some(value) = fallback {
            self.value = value;
        }
        self.finish_leader_init()
    }

    /// Handle an inbound message.
    pub fn on_message(&mut self, message: Message) -> Vec<Action> {
        match message {
            Message::StateUpdate(value) => self.on_state_update(value),
            Message::AskInitValue { force } => self.on_ask(force),
            Message::ReturnInitValue { state } => self.on_return(state),
        }
    }

    fn on_state_update(&mut self, value: StateValue) -> Vec<Action> {
        if matches!(self.phase, PeerPhase::Uninitialized | PeerPhase::Closed) {
            return Vec::new();
        }
        self.value = value;
        self.holds_value = true;
        self.persist_if_leader()
    }

    fn on_ask(&mut self, force: bool) -> Vec<Action> {
        match self.phase {
            PeerPhase::Synced(Role::Leader) => vec![self.answer()],
            // Might turn out to be the leader. Leader init ends with a
            // broadcast answer, which covers this ask too.
            PeerPhase::LeaderInit | PeerPhase::AwaitingLeader | PeerPhase::Synced(Role::Unknown)
                if !force =>
            {
                Vec::new()
            }
            PeerPhase::AwaitingLeader | PeerPhase::FollowerInit | PeerPhase::Synced(_)
                if force && self.holds_value() =>
            {
                vec![self.answer()]
            }
            _ => Vec::new(),
        }
    }

    fn on_return(&mut self, state: StateValue) -> Vec<Action> {
        match self.phase {
            PeerPhase::AwaitingLeader => {
                self.adopt(state);
                self.phase = PeerPhase::Synced(Role::Unknown);
                Vec::new()
            }
            PeerPhase::FollowerInit => {
                self.adopt(state);
                self.phase = PeerPhase::Synced(Role::Follower);
                Vec::new()
            }
            PeerPhase::LeaderInit => {
                self.adopt(state);
                self.finish_leader_init()
            }
            // Already initialized, or not running: late replies are dropped.
            PeerPhase::Uninitialized | PeerPhase::Synced(_) | PeerPhase::Closed => Vec::new(),
        }
    }

    /// Local write.
    pub fn dispatch(&mut self, value: StateValue) -> Vec<Action> {
        if self.phase.is_closed() {
            return Vec::new();
        }
        self.value = value.clone();
        self.holds_value = true;
        let mut actions = vec![Action::Broadcast(value)];
        actions.extend(self.persist_if_leader());
        actions
    }

    pub fn close(&mut self) {
        self.phase = PeerPhase::Closed;
    }

    fn adopt(&mut self, value: StateValue) {
        self.value = value;
        self.holds_value = true;
    }

    fn answer(&self) -> Action {
        Action::Publish(Message::ReturnInitValue {
            state: self.value.clone(),
        })
    }

    fn persist_if_leader(&self) -> Vec<Action> {
        if self.phase == PeerPhase::Synced(Role::Leader) {
            vec![Action::Persist(self.value.clone())]
        } else {
            Vec::new()
        }
    }

    fn finish_leader_init(&mut self) -> Vec<Action> {
        self.phase = PeerPhase::Synced(Role::Leader);
        self.holds_value = true;
        vec![Action::Persist(self.value.clone()), self.answer()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(init: StateValue) -> Protocol {
        let mut protocol = Protocol::new(init);
        protocol.start();
        protocol
    }

    fn follower(init: StateValue, synced_to: StateValue) -> Protocol {
        let mut protocol = started(init);
        protocol.on_follower_known();
        protocol.on_message(Message::ReturnInitValue { state: synced_to });
        protocol
    }

    #[test]
    fn test_follower_asks_and_syncs() {
        let mut protocol = started(json!(0));
        assert_eq!(protocol.phase(), PeerPhase::AwaitingLeader);

        let actions = protocol.on_follower_known();
        assert_eq!(
            actions,
            vec![Action::Publish(Message::AskInitValue { force: false })]
        );
        assert_eq!(protocol.role(), Role::Follower);

        let actions = protocol.on_message(Message::ReturnInitValue { state: json!(5) });
        assert!(actions.is_empty());
        assert_eq!(protocol.value(), &json!(5));
        assert_eq!(protocol.phase(), PeerPhase::Synced(Role::Follower));
    }

    #[test]
    fn test_late_return_discarded() {
        let mut protocol = follower(json!(0), json!(5));
        protocol.on_message(Message::ReturnInitValue { state: json!(9) });
        assert_eq!(protocol.value(), &json!(5));
    }

    #[test]
    fn test_return_before_election_outcome() {
        let mut protocol = started(json!(0));
        protocol.on_message(Message::ReturnInitValue { state: json!(7) });
        assert_eq!(protocol.phase(), PeerPhase::Synced(Role::Unknown));

        assert!(protocol.on_follower_known().is_empty());
        assert_eq!(protocol.phase(), PeerPhase::Synced(Role::Follower));
        assert_eq!(protocol.value(), &json!(7));
    }

    #[test]
    fn test_leader_adopts_stored_record() {
        let mut protocol = started(json!(0));
        assert!(protocol.wants_stored_record());

        let actions = protocol.on_leadership(Some(json!({"n": 3})));
        assert_eq!(
            actions,
            vec![Action::Publish(Message::ReturnInitValue { state: json!({"n": 3}) })]
        );
        assert_eq!(protocol.phase(), PeerPhase::Synced(Role::Leader));
        assert_eq!(protocol.value(), &json!({"n": 3}));
    }

    #[test]
    fn test_leader_without_record_force_asks() {
        let mut protocol = started(json!(0));
        let actions = protocol.on_leadership(None);
        assert_eq!(
            actions,
            vec![
                Action::Publish(Message::AskInitValue { force: true }),
                Action::ArmInitTimer,
            ]
        );
        assert_eq!(protocol.phase(), PeerPhase::LeaderInit);

        let actions = protocol.on_message(Message::ReturnInitValue { state: json!(5) });
        assert_eq!(
            actions,
            vec![
                Action::Persist(json!(5)),
                Action::Publish(Message::ReturnInitValue { state: json!(5) }),
            ]
        );
        assert_eq!(protocol.phase(), PeerPhase::Synced(Role::Leader));

        // The timer firing afterwards changes nothing.
        assert!(protocol.on_init_timeout(Some(json!(1))).is_empty());
        assert_eq!(protocol.value(), &json!(5));
    }

    #[test]
    fn test_init_timeout_fallbacks() {
        let mut protocol = started(json!("local"));
        protocol.on_leadership(None);
        let actions = protocol.on_init_timeout(None);
        assert_eq!(
            actions,
            vec![
                Action::Persist(json!("local")),
                Action::Publish(Message::ReturnInitValue { state: json!("local") }),
            ]
        );

        let mut protocol = started(json!("local"));
        protocol.on_leadership(None);
        protocol.on_init_timeout(Some(json!("session")));
        assert_eq!(protocol.value(), &json!("session"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut protocol = started(json!(0));
        protocol.on_leadership(Some(json!(1)));
        assert!(protocol.on_leadership(Some(json!(2))).is_empty());
        assert!(protocol.on_leadership(None).is_empty());
        assert!(protocol.on_message(Message::ReturnInitValue { state: json!(3) }).is_empty());
        assert_eq!(protocol.value(), &json!(1));
    }

    #[test]
    fn test_leader_defers_ask_until_initialized() {
        let mut protocol = started(json!(0));
        protocol.on_leadership(None);

        assert!(protocol
            .on_message(Message::AskInitValue { force: false })
            .is_empty());

        let actions = protocol.on_init_timeout(None);
        assert_eq!(
            actions,
            vec![
                Action::Persist(json!(0)),
                Action::Publish(Message::ReturnInitValue { state: json!(0) }),
            ]
        );
    }

    #[test]
    fn test_follower_promoted_during_init_answers_everyone() {
        // Asked the old leader, which left before answering.
        let mut protocol = started(json!("f1"));
        protocol.on_follower_known();
        assert!(protocol.wants_stored_record());

        let actions = protocol.on_leadership(None);
        assert_eq!(
            actions,
            vec![
                Action::Publish(Message::AskInitValue { force: true }),
                Action::ArmInitTimer,
            ]
        );
        assert_eq!(protocol.phase(), PeerPhase::LeaderInit);

        // Nobody holds a value, and nobody asked this peer directly. The
        // answer still goes out for followers stranded by the old leader.
        let actions = protocol.on_init_timeout(None);
        assert_eq!(
            actions,
            vec![
                Action::Persist(json!("f1")),
                Action::Publish(Message::ReturnInitValue { state: json!("f1") }),
            ]
        );
        assert_eq!(protocol.phase(), PeerPhase::Synced(Role::Leader));
    }

    #[test]
    fn test_ask_before_election_outcome() {
        // Answered if this peer turns out to be leader.
        let mut protocol = started(json!(0));
        assert!(protocol
            .on_message(Message::AskInitValue { force: false })
            .is_empty());
        let actions = protocol.on_leadership(Some(json!(3)));
        assert_eq!(
            actions,
            vec![Action::Publish(Message::ReturnInitValue { state: json!(3) })]
        );

        // Forgotten if another peer is.
        let mut protocol = started(json!(0));
        protocol.on_message(Message::AskInitValue { force: false });
        protocol.on_follower_known();
        protocol.on_message(Message::ReturnInitValue { state: json!(5) });
        assert_eq!(
            protocol.on_leadership(None),
            vec![
                Action::Publish(Message::ReturnInitValue { state: json!(5) }),
                Action::Persist(json!(5)),
            ]
        );
    }

    #[test]
    fn test_synced_leader_answers_ask() {
        let mut protocol = started(json!(0));
        protocol.on_leadership(Some(json!(4)));
        let actions = protocol.on_message(Message::AskInitValue { force: false });
        assert_eq!(
            actions,
            vec![Action::Publish(Message::ReturnInitValue { state: json!(4) })]
        );
    }

    #[test]
    fn test_force_ask_answered_only_when_holding_value() {
        let force = Message::AskInitValue { force: true };

        // Fresh follower still waiting on its own ask.
        let mut fresh = started(json!(0));
        fresh.on_follower_known();
        assert!(fresh.on_message(force.clone()).is_empty());

        // Follower that has dispatched.
        fresh.dispatch(json!(2));
        assert_eq!(
            fresh.on_message(force.clone()),
            vec![Action::Publish(Message::ReturnInitValue { state: json!(2) })]
        );

        // Synced follower ignores plain asks but answers forced ones.
        let mut synced = follower(json!(0), json!(5));
        assert!(synced
            .on_message(Message::AskInitValue { force: false })
            .is_empty());
        assert_eq!(
            synced.on_message(force),
            vec![Action::Publish(Message::ReturnInitValue { state: json!(5) })]
        );
    }

    #[test]
    fn test_state_update_adopted_and_persisted_by_leader() {
        let mut follower = follower(json!(0), json!(1));
        assert!(follower.on_message(Message::StateUpdate(json!(2))).is_empty());
        assert_eq!(follower.value(), &json!(2));

        let mut leader = started(json!(0));
        leader.on_leadership(Some(json!(1)));
        assert_eq!(
            leader.on_message(Message::StateUpdate(json!(2))),
            vec![Action::Persist(json!(2))]
        );
    }

    #[test]
    fn test_state_update_does_not_initialize() {
        let mut protocol = started(json!(0));
        protocol.on_follower_known();
        protocol.on_message(Message::StateUpdate(json!(8)));
        assert_eq!(protocol.phase(), PeerPhase::FollowerInit);

        // The init reply still wins.
        protocol.on_message(Message::ReturnInitValue { state: json!(5) });
        assert_eq!(protocol.value(), &json!(5));
    }

    #[test]
    fn test_dispatch() {
        let mut protocol = follower(json!(0), json!(1));
        assert_eq!(protocol.dispatch(json!(2)), vec![Action::Broadcast(json!(2))]);

        let mut leader = started(json!(0));
        leader.on_leadership(Some(json!(1)));
        assert_eq!(
            leader.dispatch(json!(2)),
            vec![Action::Broadcast(json!(2)), Action::Persist(json!(2))]
        );
    }

    #[test]
    fn test_leader_in_init_does_not_persist_dispatch() {
        let mut protocol = started(json!(0));
        protocol.on_leadership(None);
        assert_eq!(protocol.dispatch(json!(3)), vec![Action::Broadcast(json!(3))]);
    }

    #[test]
    fn test_promotion_announces_value() {
        let mut protocol = follower(json!(0), json!(6));
        assert!(!protocol.wants_stored_record());

        let actions = protocol.on_leadership(None);
        assert_eq!(
            actions,
            vec![
                Action::Publish(Message::ReturnInitValue { state: json!(6) }),
                Action::Persist(json!(6)),
            ]
        );
        assert_eq!(protocol.phase(), PeerPhase::Synced(Role::Leader));
    }

    #[test]
    fn test_closed_is_inert() {
        let mut protocol = follower(json!(0), json!(1));
        protocol.close();
        assert!(protocol.dispatch(json!(2)).is_empty());
        assert!(protocol.on_message(Message::StateUpdate(json!(3))).is_empty());
        assert!(protocol.on_leadership(None).is_empty());
        assert_eq!(protocol.value(), &json!(1));
        assert_eq!(protocol.role(), Role::Unknown);
    }
}
