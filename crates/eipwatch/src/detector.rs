//! Peer liveness derived from heartbeat silence.

use crate::peer::Peer;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Edge-triggered failure detector
#[derive(Debug, Clone, Copy)]
pub struct FailureDetector {
    dead_after: Duration,
}

impl FailureDetector {
    /// Declare peers dead after `interval * dead_ratio` of silence
    pub fn new(interval: Duration, dead_ratio: u32) -> Self {
        Self {
            dead_after: interval.saturating_mul(dead_ratio),
        }
    }

    pub fn dead_after(&self) -> Duration {
        self.dead_after
    }

    /// Whether a peer last seen at `last_seen` is dead at `now`
    ///
    /// A peer that was never heard from is dead.
    pub fn is_dead(&self, now: Instant, last_seen: Option<Instant>) -> bool {
        match last_seen {
            Some(seen) => now.saturating_duration_since(seen) > self.dead_after,
            None => true,
        }
    }

    /// Record the peer's liveness at `now`
    ///
    /// Returns true only on the alive to dead transition; later calls while
    /// the peer stays silent return false. The reverse transition is logged.
    pub fn is_newly_dead(&self, now: Instant, peer: &Peer) -> bool {
        let dead = self.is_dead(now, peer.last_seen());
        let was_dead = peer.mark_dead(dead);

        match (was_dead, dead) {
            (false, true) => {
                warn!(peer = %peer.addr(), nic = %peer.nic_id(), "Considering peer dead");
                true
            }
            (true, false) => {
                info!(peer = %peer.addr(), nic = %peer.nic_id(), "Peer is alive");
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Member, PeerRegistry};
    use crate::types::NicId;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn test_dead_threshold() {
        let detector = FailureDetector::new(Duration::from_secs(1), 3);
        assert_eq!(detector.dead_after(), Duration::from_secs(3));

        let seen = Instant::now();
        assert!(!detector.is_dead(seen + Duration::from_secs(3), Some(seen)));
        assert!(detector.is_dead(seen + Duration::from_millis(3001), Some(seen)));
        assert!(detector.is_dead(seen, None));
    }

    #[test]
    fn test_clock_before_last_seen_is_alive() {
        let detector = FailureDetector::new(Duration::from_secs(1), 3);
        let now = Instant::now();
        assert!(!detector.is_dead(now, Some(now + Duration::from_secs(10))));
    }

    #[tokio::test]
    async fn test_newly_dead_fires_once_per_transition() {
        let detector = FailureDetector::new(Duration::from_millis(100), 3);
        let registry = PeerRegistry::new(Ipv4Addr::UNSPECIFIED);
        let addr = Ipv4Addr::new(127, 0, 0, 2);
        registry
            .insert(Member {
                addr: SocketAddrV4::new(addr, 12345),
                nic_id: NicId::from_u128(2),
            })
            .await
            .unwrap();

        let start = Instant::now();
        registry.upsert(addr, 20, NicId::from_u128(2), start).await;

        let peers = registry.read().await;
        let peer = &peers[&addr];

        // Fresh heartbeat revives the peer without reporting it dead
        assert!(!detector.is_newly_dead(start, peer));
        assert!(!peer.is_dead());

        let late = start + Duration::from_millis(301);
        assert!(detector.is_newly_dead(late, peer));
        assert!(!detector.is_newly_dead(late + Duration::from_millis(100), peer));
        assert!(!detector.is_newly_dead(late + Duration::from_secs(5), peer));
        assert!(peer.is_dead());
    }

    #[tokio::test]
    async fn test_never_seen_peer_is_not_newly_dead() {
        let detector = FailureDetector::new(Duration::from_millis(100), 3);
        let registry = PeerRegistry::new(Ipv4Addr::UNSPECIFIED);
        let addr = Ipv4Addr::new(127, 0, 0, 3);
        registry
            .insert(Member {
                addr: SocketAddrV4::new(addr, 12345),
                nic_id: NicId::nil(),
            })
            .await
            .unwrap();

        let peers = registry.read().await;
        assert!(!detector.is_newly_dead(Instant::now(), &peers[&addr]));
    }
}
