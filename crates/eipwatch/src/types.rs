//! eipwatch data types and structures.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

/// Opaque cloud-provider handle of a network interface (128-bit UUID).
pub type NicId = uuid::Uuid;

/// Default UDP port for heartbeats
pub const DEFAULT_PORT: u16 = 12345;

/// Protocol version tag carried in the first two bytes of every heartbeat
pub const PROTOCOL_VERSION: [u8; 2] = [0x02, 0x01];

/// Size of an encoded heartbeat
pub const PAYLOAD_LENGTH: usize = 24;

/// Slack added to timing windows to absorb scheduling jitter
pub const SKEW: Duration = Duration::from_millis(100);

/// Default advertisement interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted advertisement interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default number of silent intervals before a peer is declared dead
pub const DEFAULT_DEAD_RATIO: u32 = 3;

/// Default host priority (lowest wins)
pub const DEFAULT_PRIORITY: u8 = 10;

/// Default period of the peer refresh / attachment reconciliation pass
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Role of the local instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Not holding the watched address
    #[default]
    Backup,
    /// Holding the watched address
    Master,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Backup => write!(f, "BACKUP"),
            Role::Master => write!(f, "MASTER"),
        }
    }
}

/// Where the set of peers comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSource {
    /// Fixed list of peer addresses; NICs are resolved once at startup
    Static(Vec<SocketAddrV4>),
    /// Every running instance of the named group, refreshed on reconcile
    Group(String),
}

impl Default for PeerSource {
    fn default() -> Self {
        PeerSource::Static(Vec::new())
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address the heartbeat listener binds to
    pub listen: SocketAddr,

    /// The elastic IP being watched (IPv4 only)
    pub address: IpAddr,

    /// Host priority (1-255, lower is more eligible)
    pub priority: u8,

    /// Advertisement interval
    pub interval: Duration,

    /// Silent intervals before a peer is declared dead
    pub dead_ratio: u32,

    /// Peer set definition
    pub peers: PeerSource,

    /// Port heartbeats are sent to for group members
    pub peer_port: u16,

    /// Period of the peer refresh / attachment reconciliation pass
    pub reconcile_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            priority: DEFAULT_PRIORITY,
            interval: DEFAULT_INTERVAL,
            dead_ratio: DEFAULT_DEAD_RATIO,
            peers: PeerSource::default(),
            peer_port: DEFAULT_PORT,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.watched_ipv4().is_none() {
            return Err(format!("IPv6 addresses are unsupported: {}", self.address));
        }

        if self.priority == 0 {
            return Err("Priority must be between 1 and 255".to_string());
        }

        if self.dead_ratio == 0 {
            return Err("Dead ratio must be at least 1".to_string());
        }

        if self.interval.is_zero() {
            return Err("Advertisement interval must be positive".to_string());
        }

        if self.interval > MAX_INTERVAL {
            return Err(format!(
                "Advertisement interval must be at most {}s",
                MAX_INTERVAL.as_secs()
            ));
        }

        let hold_off = self
            .interval
            .checked_mul(self.dead_ratio)
            .and_then(|dead| dead.checked_add(SKEW));
        if hold_off.and_then(|d| Instant::now().checked_add(d)).is_none() {
            return Err("Advertisement interval times dead ratio is too large".to_string());
        }

        if self.reconcile_interval.is_zero() {
            return Err("Reconcile interval must be positive".to_string());
        }

        if let PeerSource::Group(name) = &self.peers {
            if name.trim().is_empty() {
                return Err("Peer group name is empty".to_string());
            }
        }

        Ok(())
    }

    /// The watched address, if it is IPv4
    pub fn watched_ipv4(&self) -> Option<Ipv4Addr> {
        match self.address {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        }
    }

    /// Silence after which a peer is declared dead: `interval * dead_ratio`
    pub fn dead_interval(&self) -> Duration {
        self.interval.saturating_mul(self.dead_ratio)
    }

    /// Deadline before which no election decision is made
    ///
    /// init_hold_off = start + interval * dead_ratio + skew
    pub fn init_hold_off(&self, started: Instant) -> Instant {
        let hold_off = self.dead_interval().saturating_add(SKEW);
        started.checked_add(hold_off).unwrap_or(started + MAX_INTERVAL)
    }

    /// Local address per-peer send sockets bind to
    pub fn local_ipv4(&self) -> Ipv4Addr {
        match self.listen {
            SocketAddr::V4(addr) => *addr.ip(),
            SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Heartbeats successfully written to peers
    pub adverts_sent: u64,

    /// Heartbeats that failed to send
    pub advert_failures: u64,

    /// Heartbeats folded into the registry
    pub heartbeats_received: u64,

    /// Datagrams rejected by the codec
    pub invalid_datagrams: u64,

    /// Heartbeats from addresses outside the peer set
    pub unknown_peer_heartbeats: u64,

    /// Heartbeats watching a different address
    pub foreign_address_heartbeats: u64,

    /// Number of transitions to Master
    pub master_transitions: u64,

    /// Number of transitions to Backup
    pub backup_transitions: u64,

    /// Detach calls issued against newly dead peers
    pub remediations: u64,
}
