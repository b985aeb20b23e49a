//! Peers and the registry holding them.
//!
//! The registry is keyed by peer IPv4 address; heartbeats are sent from an
//! ephemeral port, so only the IP identifies a sender. All access goes through
//! a single reader-writer lock: advertise and evaluate passes read, inbound
//! heartbeats and membership refreshes write.

use crate::transport::PeerSocket;
use crate::types::NicId;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

/// Peers keyed by IPv4 address
pub type PeerMap = HashMap<Ipv4Addr, Peer>;

/// A remote group member being watched
pub struct Peer {
    nic_id: NicId,
    priority: Option<u8>,
    last_seen: Option<Instant>,
    dead: AtomicBool,
    socket: PeerSocket,
}

impl Peer {
    /// Create a peer and its send socket
    ///
    /// A new peer starts out dead until its first heartbeat arrives, so that a
    /// peer which never spoke is never the target of remediation.
    pub fn new(addr: SocketAddrV4, nic_id: NicId, local: Ipv4Addr) -> io::Result<Self> {
        Ok(Self {
            nic_id,
            priority: None,
            last_seen: None,
            dead: AtomicBool::new(true),
            socket: PeerSocket::connect(local, addr)?,
        })
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.socket.remote()
    }

    pub fn nic_id(&self) -> NicId {
        self.nic_id
    }

    /// Last advertised priority, if any heartbeat was received
    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Record liveness, returning the previous value of the dead flag
    ///
    /// Only the evaluate pass flips this flag, under the registry read lock.
    pub(crate) fn mark_dead(&self, dead: bool) -> bool {
        self.dead.swap(dead, Ordering::AcqRel)
    }

    /// Write one heartbeat to the peer
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    /// Plain-data copy of the peer state
    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            addr: self.addr(),
            nic_id: self.nic_id,
            priority: self.priority,
            last_seen: self.last_seen,
            dead: self.is_dead(),
        }
    }
}

/// Copy of a peer's state taken under the registry lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub addr: SocketAddrV4,
    pub nic_id: NicId,
    pub priority: Option<u8>,
    pub last_seen: Option<Instant>,
    pub dead: bool,
}

/// An expected peer, as resolved from the directory or the static list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub addr: SocketAddrV4,
    pub nic_id: NicId,
}

/// Result of folding a heartbeat into the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The peer was known and updated
    Updated { previous_priority: Option<u8> },
    /// The sender is not part of the peer set; nothing changed
    Unknown,
}

/// Membership changes applied by a refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: Vec<Ipv4Addr>,
    pub removed: Vec<Ipv4Addr>,
}

/// Concurrent registry of peers
pub struct PeerRegistry {
    peers: RwLock<PeerMap>,
    local: Ipv4Addr,
}

impl PeerRegistry {
    /// Create an empty registry whose send sockets bind to `local`
    pub fn new(local: Ipv4Addr) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            local,
        }
    }

    /// Add a peer unless its address is already registered
    ///
    /// Returns whether a peer was added.
    pub async fn insert(&self, member: Member) -> io::Result<bool> {
        let mut peers = self.peers.write().await;
        let key = *member.addr.ip();
        if peers.contains_key(&key) {
            return Ok(false);
        }

        let peer = Peer::new(member.addr, member.nic_id, self.local)?;
        peers.insert(key, peer);
        Ok(true)
    }

    /// Look up a peer by address
    pub async fn lookup(&self, addr: Ipv4Addr) -> Option<PeerSnapshot> {
        self.peers.read().await.get(&addr).map(Peer::snapshot)
    }

    /// Fold a heartbeat into the matching peer
    ///
    /// Heartbeats from addresses outside the peer set are dropped: the set is
    /// authoritative from configuration, never learned from traffic.
    pub async fn upsert(
        &self,
        addr: Ipv4Addr,
        priority: u8,
        nic_id: NicId,
        now: Instant,
    ) -> UpsertOutcome {
        let mut peers = self.peers.write().await;

        match peers.get_mut(&addr) {
            Some(peer) => {
                let previous_priority = peer.priority.replace(priority);
                peer.nic_id = nic_id;
                peer.last_seen = Some(now);
                UpsertOutcome::Updated { previous_priority }
            }
            None => {
                warn!(peer = %addr, "Peer not found in configuration, dropping heartbeat");
                UpsertOutcome::Unknown
            }
        }
    }

    /// Reconcile the peer set against the authoritative member list
    ///
    /// Members absent locally are added, local peers absent from `members`
    /// are removed, and surviving peers keep their state. The whole diff runs
    /// under one write lock acquisition.
    pub async fn refresh(&self, members: &[Member]) -> RefreshReport {
        let mut peers = self.peers.write().await;
        let mut report = RefreshReport::default();

        let expected: HashSet<Ipv4Addr> = members.iter().map(|m| *m.addr.ip()).collect();

        peers.retain(|addr, _| {
            if expected.contains(addr) {
                true
            } else {
                info!(peer = %addr, "Removing peer");
                report.removed.push(*addr);
                false
            }
        });

        for member in members {
            let key = *member.addr.ip();
            if peers.contains_key(&key) {
                continue;
            }

            match Peer::new(member.addr, member.nic_id, self.local) {
                Ok(peer) => {
                    info!(peer = %member.addr, nic = %member.nic_id, "Found new peer");
                    peers.insert(key, peer);
                    report.added.push(key);
                }
                Err(e) => {
                    warn!(peer = %member.addr, error = %e, "Could not open socket to new peer");
                }
            }
        }

        report
    }

    /// Hold the read lock for a consistent view of every peer
    pub async fn read(&self) -> RwLockReadGuard<'_, PeerMap> {
        self.peers.read().await
    }

    /// Copies of every peer, ordered by address
    pub async fn snapshots(&self) -> Vec<PeerSnapshot> {
        let mut all: Vec<PeerSnapshot> = self.peers.read().await.values().map(Peer::snapshot).collect();
        all.sort_by_key(|p| p.addr);
        all
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
