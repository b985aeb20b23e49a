//! Failover engine.
//!
//! Owns the peer registry, the failure detector and the encoded heartbeat,
//! and runs four concurrent activities over them:
//! - receive: folds inbound heartbeats into the registry
//! - advertise: sends the heartbeat to every peer each interval
//! - evaluate: elects a role, attaches or detaches the watched address, and
//!   strips the address from peers that just went silent
//! - reconcile: refreshes group membership and repairs attachment drift

use crate::detector::FailureDetector;
use crate::directory::{Directory, SelfInfo};
use crate::election;
use crate::packet::{self, Payload};
use crate::peer::{Member, PeerRegistry, UpsertOutcome};
use crate::transport::{self, BroadcastReport, HeartbeatListener, RECV_BUFFER_SIZE};
use crate::types::{EngineConfig, EngineStats, NicId, PeerSource, Role, SKEW};
use bytes::BytesMut;
use common::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Errors from live priority adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PriorityError {
    #[error("priority is already the most eligible value")]
    AtMostEligible,

    #[error("priority is already the least eligible value")]
    AtLeastEligible,
}

/// Who the local instance is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub instance_id: String,
    pub zone: String,
    pub nic_id: NicId,
}

/// Failover engine watching one elastic IP
pub struct Engine {
    config: EngineConfig,
    address: Ipv4Addr,
    identity: Identity,
    directory: Arc<dyn Directory>,
    registry: PeerRegistry,
    detector: FailureDetector,
    advert: RwLock<BytesMut>,
    role: RwLock<Role>,
    /// Serializes every attach or detach of our own address with the role
    /// it is derived from
    transition: Mutex<()>,
    last_send: RwLock<Option<Instant>>,
    init_hold_off: Instant,
    stats: RwLock<EngineStats>,
}

impl Engine {
    /// Resolve identity and peers, and build the engine
    ///
    /// Fails on an invalid configuration, when the local instance cannot be
    /// resolved, or when a static peer's NIC cannot be resolved. A failure to
    /// list group members is logged and left to the next reconcile pass.
    pub async fn new(
        config: EngineConfig,
        directory: Arc<dyn Directory>,
        instance_id: &str,
    ) -> Result<Self> {
        config.validate().map_err(Error::config)?;
        let address = config
            .watched_ipv4()
            .ok_or_else(|| Error::config("watched address must be IPv4"))?;

        let SelfInfo { zone, nic_id } = directory.resolve_self(instance_id).await?;
        info!(instance = instance_id, %zone, nic = %nic_id, "Resolved local instance");

        let identity = Identity {
            instance_id: instance_id.to_string(),
            zone,
            nic_id,
        };

        let advert = Payload::new(config.priority, address, nic_id).encode();
        let registry = PeerRegistry::new(config.local_ipv4());

        match &config.peers {
            PeerSource::Static(addrs) => {
                for addr in addrs {
                    let nic_id = directory.resolve_peer_nic(*addr.ip()).await?;
                    info!(peer = %addr, nic = %nic_id, "Resolved static peer");
                    registry.insert(Member { addr: *addr, nic_id }).await?;
                }
            }
            PeerSource::Group(group) => {
                match group_members(directory.as_ref(), group, nic_id, config.peer_port).await {
                    Ok(members) => {
                        registry.refresh(&members).await;
                    }
                    Err(e) => {
                        warn!(%group, error = %e, "Could not list peer group, retrying on reconcile");
                    }
                }
            }
        }

        let init_hold_off = config.init_hold_off(Instant::now());
        let detector = FailureDetector::new(config.interval, config.dead_ratio);

        let peers = registry.len().await;
        info!(
            %address,
            priority = config.priority,
            peers,
            hold_off_ms = detector.dead_after().saturating_add(SKEW).as_millis() as u64,
            "Engine ready"
        );

        Ok(Self {
            config,
            address,
            identity,
            directory,
            registry,
            detector,
            advert: RwLock::new(advert),
            role: RwLock::new(Role::Backup),
            transition: Mutex::new(()),
            last_send: RwLock::new(None),
            init_hold_off,
            stats: RwLock::new(EngineStats::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The watched elastic IP
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Deadline before which no election decision is made
    pub fn init_hold_off(&self) -> Instant {
        self.init_hold_off
    }

    /// Current priority, as carried by the outgoing heartbeat
    pub async fn priority(&self) -> u8 {
        packet::priority_of(&self.advert.read().await)
    }

    pub async fn role(&self) -> Role {
        *self.role.read().await
    }

    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    pub async fn last_send(&self) -> Option<Instant> {
        *self.last_send.read().await
    }

    /// Make the local instance more eligible by one step
    pub async fn lower_priority(&self) -> std::result::Result<u8, PriorityError> {
        let mut advert = self.advert.write().await;
        let current = packet::priority_of(&advert);
        if current <= 1 {
            return Err(PriorityError::AtMostEligible);
        }

        let priority = current - 1;
        packet::set_priority(&mut advert, priority);
        info!(priority, "Lowered priority");
        Ok(priority)
    }

    /// Make the local instance less eligible by one step
    pub async fn raise_priority(&self) -> std::result::Result<u8, PriorityError> {
        let mut advert = self.advert.write().await;
        let current = packet::priority_of(&advert);
        if current == u8::MAX {
            return Err(PriorityError::AtLeastEligible);
        }

        let priority = current + 1;
        packet::set_priority(&mut advert, priority);
        info!(priority, "Raised priority");
        Ok(priority)
    }

    /// Attach the watched address to the local NIC
    pub async fn associate(&self) -> Result<()> {
        info!(address = %self.address, nic = %self.identity.nic_id, "Associating address");
        self.directory
            .attach_address(self.identity.nic_id, self.address)
            .await
    }

    /// Detach the watched address from the local NIC
    pub async fn disassociate(&self) -> Result<()> {
        info!(address = %self.address, nic = %self.identity.nic_id, "Disassociating address");
        self.directory
            .detach_address(self.identity.nic_id, self.address)
            .await
    }

    /// Send the current heartbeat to every peer
    pub async fn advertise(&self) -> BroadcastReport {
        let report = {
            let advert = self.advert.read().await;
            let peers = self.registry.read().await;
            transport::broadcast(peers.values(), &advert)
        };

        *self.last_send.write().await = Some(Instant::now());

        let mut stats = self.stats.write().await;
        stats.adverts_sent += report.sent as u64;
        stats.advert_failures += report.failed as u64;

        report
    }

    /// Handle one inbound datagram received at `now`
    ///
    /// Nothing here is fatal: rejected datagrams are logged and counted.
    pub async fn handle_datagram(&self, data: &[u8], src: SocketAddr, now: Instant) {
        if packet::is_info_probe(data) {
            self.log_info().await;
            return;
        }

        let payload = match Payload::decode(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %src, error = %e, "Dropping invalid heartbeat");
                self.stats.write().await.invalid_datagrams += 1;
                return;
            }
        };

        if payload.address != self.address {
            warn!(
                peer = %src,
                watched = %payload.address,
                ours = %self.address,
                "Peer watches a different address, dropping heartbeat"
            );
            self.stats.write().await.foreign_address_heartbeats += 1;
            return;
        }

        let Some(ip) = source_ipv4(src) else {
            warn!(peer = %src, "Heartbeat from a non-IPv4 source, dropping");
            self.stats.write().await.invalid_datagrams += 1;
            return;
        };

        match self
            .registry
            .upsert(ip, payload.priority, payload.nic_id, now)
            .await
        {
            UpsertOutcome::Unknown => {
                self.stats.write().await.unknown_peer_heartbeats += 1;
            }
            UpsertOutcome::Updated { previous_priority } => {
                self.stats.write().await.heartbeats_received += 1;
                debug!(peer = %ip, priority = payload.priority, "Heartbeat");

                let ours = self.priority().await;
                if payload.priority == ours && previous_priority != Some(ours) {
                    warn!(
                        peer = %ip,
                        priority = ours,
                        "Peer advertises our priority, both may claim the address"
                    );
                }
            }
        }
    }

    /// Run one evaluation pass now
    pub async fn check_state(&self) {
        self.check_state_at(Instant::now()).await
    }

    /// Run one evaluation pass as of `now`
    ///
    /// Elects a role, applies it, then detaches the address from every peer
    /// that went silent since the previous pass and reconciles our own
    /// attachment. Nothing happens before the init hold-off deadline.
    pub async fn check_state_at(&self, now: Instant) {
        if now < self.init_hold_off {
            debug!("Within init hold-off, not electing");
            return;
        }

        let priority = self.priority().await;
        let evaluation = {
            let peers = self.registry.read().await;
            election::evaluate(now, priority, &peers, &self.detector)
        };

        self.transition_to(evaluation.target).await;

        if evaluation.newly_dead.is_empty() {
            return;
        }

        for peer in &evaluation.newly_dead {
            warn!(peer = %peer.addr, nic = %peer.nic_id, "Detaching address from dead peer");
            if let Err(e) = self
                .directory
                .detach_address(peer.nic_id, self.address)
                .await
            {
                warn!(peer = %peer.addr, nic = %peer.nic_id, error = %e, "Could not detach address from dead peer");
            }
            self.stats.write().await.remediations += 1;
        }

        if let Err(e) = self.reconcile_attachment().await {
            error!(error = %e, "Could not reconcile address attachment");
        }
    }

    /// Apply a role, attaching or detaching the watched address on change
    ///
    /// A failed call is logged and the role is recorded anyway; the reconcile
    /// pass repairs the attachment.
    async fn transition_to(&self, target: Role) {
        let _transition = self.transition.lock().await;
        if self.role().await == target {
            return;
        }

        let priority = self.priority().await;
        info!(role = %target, priority, "Switching role");
        let result = match target {
            Role::Master => {
                self.directory
                    .attach_address(self.identity.nic_id, self.address)
                    .await
            }
            Role::Backup => {
                self.directory
                    .detach_address(self.identity.nic_id, self.address)
                    .await
            }
        };

        if let Err(e) = result {
            error!(role = %target, address = %self.address, error = %e, "Could not apply role to address");
        }

        *self.role.write().await = target;

        let mut stats = self.stats.write().await;
        match target {
            Role::Master => stats.master_transitions += 1,
            Role::Backup => stats.backup_transitions += 1,
        }
    }

    /// Refresh group membership, then repair attachment drift
    pub async fn reconcile(&self) {
        self.refresh_peers().await;

        if Instant::now() < self.init_hold_off {
            debug!("Within init hold-off, not reconciling attachment");
            return;
        }

        if let Err(e) = self.reconcile_attachment().await {
            error!(error = %e, "Could not reconcile address attachment");
        }
    }

    /// Reload the peer set from the group; static peer sets are left alone
    pub async fn refresh_peers(&self) {
        let PeerSource::Group(group) = &self.config.peers else {
            return;
        };

        match group_members(
            self.directory.as_ref(),
            group,
            self.identity.nic_id,
            self.config.peer_port,
        )
        .await
        {
            Ok(members) => {
                let report = self.registry.refresh(&members).await;
                if !report.added.is_empty() || !report.removed.is_empty() {
                    info!(added = ?report.added, removed = ?report.removed, "Refreshed peers");
                }
            }
            Err(e) => {
                warn!(%group, error = %e, "Could not refresh peers");
            }
        }
    }

    /// Make the observed attachment match the current role
    pub async fn reconcile_attachment(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let role = self.role().await;
        let attached = self
            .directory
            .is_attached(self.identity.nic_id, self.address)
            .await?;

        match (role, attached) {
            (Role::Backup, true) => {
                warn!(address = %self.address, "Address attached while backup, detaching");
                self.directory
                    .detach_address(self.identity.nic_id, self.address)
                    .await
            }
            (Role::Master, false) => {
                warn!(address = %self.address, "Address missing while master, attaching");
                self.directory
                    .attach_address(self.identity.nic_id, self.address)
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Log identity, role, statistics and every peer
    pub async fn log_info(&self) {
        let now = Instant::now();
        let last_send = self.last_send().await;
        let priority = self.priority().await;
        let role = self.role().await;
        let stats = self.stats().await;

        info!(
            instance = %self.identity.instance_id,
            zone = %self.identity.zone,
            nic = %self.identity.nic_id,
            address = %self.address,
            priority,
            role = %role,
            last_send_ms_ago = ?last_send.map(|t| now.saturating_duration_since(t).as_millis() as u64),
            stats = ?stats,
            "Engine state"
        );

        for peer in self.registry.snapshots().await {
            info!(
                peer = %peer.addr,
                nic = %peer.nic_id,
                priority = ?peer.priority,
                dead = peer.dead,
                last_seen_ms_ago = ?peer.last_seen.map(|t| now.saturating_duration_since(t).as_millis() as u64),
                "Peer state"
            );
        }
    }

    /// Bind the heartbeat listener and run until a fatal socket error
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = HeartbeatListener::bind(self.config.listen)?;
        info!(listen = %self.config.listen, "Listening for heartbeats");
        self.serve(listener).await
    }

    /// Run every activity over an already bound listener
    ///
    /// Returns only on a receive error. Dropping the future stops every
    /// periodic task.
    pub async fn serve(self: Arc<Self>, listener: HeartbeatListener) -> Result<()> {
        let mut tasks = JoinSet::new();

        let engine = Arc::clone(&self);
        tasks.spawn(async move { engine.advertise_loop().await });

        let engine = Arc::clone(&self);
        tasks.spawn(async move { engine.evaluate_loop().await });

        let engine = Arc::clone(&self);
        tasks.spawn(async move { engine.reconcile_loop().await });

        let result = self.receive_loop(&listener).await;
        tasks.shutdown().await;
        result
    }

    /// Release the address if we hold it
    ///
    /// As backup the attachment is checked too, since a claim interrupted by
    /// cancellation may still have landed. Best effort: failures are logged.
    pub async fn shutdown(&self) {
        info!("Shutting down");

        let _transition = self.transition.lock().await;
        let mut role = self.role.write().await;
        let holding = match *role {
            Role::Master => true,
            Role::Backup => match self
                .directory
                .is_attached(self.identity.nic_id, self.address)
                .await
            {
                Ok(attached) => attached,
                Err(e) => {
                    warn!(address = %self.address, error = %e, "Could not check address attachment");
                    false
                }
            },
        };

        if holding {
            info!(address = %self.address, "Releasing address");
            if let Err(e) = self
                .directory
                .detach_address(self.identity.nic_id, self.address)
                .await
            {
                error!(address = %self.address, error = %e, "Could not release address");
            }
        }
        *role = Role::Backup;
    }

    async fn receive_loop(&self, listener: &HeartbeatListener) -> Result<()> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, src) = listener.recv_from(&mut buf).await?;
            self.handle_datagram(&buf[..len], src, Instant::now()).await;
        }
    }

    async fn advertise_loop(&self) {
        loop {
            let started = Instant::now();
            self.advertise().await;
            pace("advertise", started, self.config.interval).await;
        }
    }

    async fn evaluate_loop(&self) {
        // Keep evaluation off the advertise tick
        sleep(SKEW).await;
        loop {
            let started = Instant::now();
            self.check_state().await;
            pace("evaluate", started, self.config.interval).await;
        }
    }

    async fn reconcile_loop(&self) {
        let period = self.config.reconcile_interval;
        sleep(period).await;
        loop {
            let started = Instant::now();
            self.reconcile().await;
            pace("reconcile", started, period).await;
        }
    }
}

/// Sleep out the rest of `period`, warning when the pass overran it
async fn pace(task: &'static str, started: Instant, period: Duration) {
    let elapsed = started.elapsed();
    match period.checked_sub(elapsed) {
        Some(remaining) => sleep(remaining).await,
        None => warn!(
            task,
            elapsed_ms = elapsed.as_millis() as u64,
            period_ms = period.as_millis() as u64,
            "Pass took longer than its period, cannot keep up"
        ),
    }
}

/// Group members other than ourselves, as peers on `port`
async fn group_members(
    directory: &dyn Directory,
    group: &str,
    self_nic: NicId,
    port: u16,
) -> Result<Vec<Member>> {
    let members = directory.list_group_members(group).await?;
    Ok(members
        .into_iter()
        .filter(|m| m.nic_id != self_nic)
        .map(|m| Member {
            addr: SocketAddrV4::new(m.address, port),
            nic_id: m.nic_id,
        })
        .collect())
}

fn source_ipv4(src: SocketAddr) -> Option<Ipv4Addr> {
    match src.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}
