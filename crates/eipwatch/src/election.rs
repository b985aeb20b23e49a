//! Priority election.
//!
//! Lower priority values are more eligible. The local instance is the best
//! candidate unless some alive peer advertises a strictly lower priority, so
//! peers sharing the local priority do not demote it.

use crate::detector::FailureDetector;
use crate::peer::{Member, PeerMap};
use crate::types::Role;
use std::time::Instant;

/// Role for `self_priority` given the priorities of every alive peer
pub fn elect(self_priority: u8, alive_priorities: impl IntoIterator<Item = u8>) -> Role {
    if alive_priorities.into_iter().all(|p| self_priority <= p) {
        Role::Master
    } else {
        Role::Backup
    }
}

/// Outcome of one evaluation pass over the peer set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Role the local instance should hold
    pub target: Role,

    /// Peers that went silent during this pass, to be remediated
    pub newly_dead: Vec<Member>,

    /// Number of alive peers that took part in the election
    pub alive: usize,
}

/// Run the failure detector over every peer and elect a role
///
/// The caller holds the registry lock for the whole pass. Peers that are alive
/// but never advertised a priority take no part in the election.
pub fn evaluate(
    now: Instant,
    self_priority: u8,
    peers: &PeerMap,
    detector: &FailureDetector,
) -> Evaluation {
    let mut newly_dead = Vec::new();
    let mut alive = Vec::with_capacity(peers.len());

    for peer in peers.values() {
        if detector.is_newly_dead(now, peer) {
            newly_dead.push(Member {
                addr: peer.addr(),
                nic_id: peer.nic_id(),
            });
            continue;
        }

        if peer.is_dead() {
            continue;
        }

        if let Some(priority) = peer.priority() {
            alive.push(priority);
        }
    }

    Evaluation {
        target: elect(self_priority, alive.iter().copied()),
        newly_dead,
        alive: alive.len(),
    }
}
