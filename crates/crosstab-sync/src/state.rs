//! Per-peer synchronization phase.

use std::fmt;

use crosstab_core::Role;

/// Where a peer is in the synchronization handshake.
///
/// Leadership and initialization live in one value so a leader role can only
/// appear in [`LeaderInit`](PeerPhase::LeaderInit) or `Synced(Role::Leader)`.
///
/// ```text
/// Uninitialized -> AwaitingLeader -> LeaderInit   -> Synced(Leader)
///                                 -> FollowerInit -> Synced(Follower)
///                                 -> Synced(Unknown) (reply arrived first)
/// any -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerPhase {
    /// Not started.
    #[default]
    Uninitialized,
    /// Channel open, election outcome not yet observed.
    AwaitingLeader,
    /// This peer is leader and is waiting for replies to its force ask.
    LeaderInit,
    /// Another peer is leader; waiting for its init value.
    FollowerInit,
    /// Initial value settled. The role may still be unknown if a reply
    /// arrived before the election outcome.
    Synced(Role),
    /// Torn down.
    Closed,
}

impl PeerPhase {
    /// Role implied by this phase.
    pub fn role(&self) -> Role {
        match self {
            PeerPhase::LeaderInit => Role::Leader,
            PeerPhase::FollowerInit => Role::Follower,
            PeerPhase::Synced(role) => *role,
            PeerPhase::Uninitialized | PeerPhase::AwaitingLeader | PeerPhase::Closed => {
                Role::Unknown
            }
        }
    }

    /// Whether the initial value has been settled.
    pub fn is_synced(&self) -> bool {
        matches!(self, PeerPhase::Synced(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PeerPhase::Closed)
    }
}

impl fmt::Display for PeerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerPhase::Uninitialized => f.write_str("uninitialized"),
            PeerPhase::AwaitingLeader => f.write_str("awaiting-leader"),
            PeerPhase::LeaderInit => f.write_str("leader-init"),
            PeerPhase::FollowerInit => f.write_str("follower-init"),
            PeerPhase::Synced(role) => write!(f, "synced({})", role),
            PeerPhase::Closed => f.write_str("closed"),
        }
    }
}
