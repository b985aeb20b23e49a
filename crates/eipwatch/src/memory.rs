//! In-process directory.
//!
//! Keeps instances and address attachments in memory. Used to run engines
//! against each other on a single host, and in tests.

use crate::directory::{Directory, GroupMember, SelfInfo};
use crate::types::NicId;
use async_trait::async_trait;
use common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct Instance {
    zone: String,
    group: Option<String>,
    address: Ipv4Addr,
    nic_id: NicId,
    running: bool,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<String, Instance>,
    attachments: HashMap<NicId, HashSet<Ipv4Addr>>,
}

/// Directory backed by in-memory maps
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: Mutex<State>,
    failing: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running instance
    pub async fn add_instance(
        &self,
        instance_id: &str,
        group: Option<&str>,
        address: Ipv4Addr,
        nic_id: NicId,
    ) {
        self.state.lock().await.instances.insert(
            instance_id.to_string(),
            Instance {
                zone: "local".to_string(),
                group: group.map(str::to_string),
                address,
                nic_id,
                running: true,
            },
        );
    }

    /// Mark an instance as stopped; stopped instances leave their group
    pub async fn stop_instance(&self, instance_id: &str) {
        if let Some(instance) = self.state.lock().await.instances.get_mut(instance_id) {
            instance.running = false;
        }
    }

    /// Make every mutating call fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// NICs currently holding `address`
    pub async fn holders(&self, address: Ipv4Addr) -> Vec<NicId> {
        let state = self.state.lock().await;
        let mut holders: Vec<NicId> = state
            .attachments
            .iter()
            .filter(|(_, addrs)| addrs.contains(&address))
            .map(|(nic, _)| *nic)
            .collect();
        holders.sort();
        holders
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(Error::directory("injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn resolve_self(&self, instance_id: &str) -> Result<SelfInfo> {
        let state = self.state.lock().await;
        let instance = state
            .instances
            .get(instance_id)
            .ok_or_else(|| Error::directory(format!("instance {instance_id} not found")))?;

        Ok(SelfInfo {
            zone: instance.zone.clone(),
            nic_id: instance.nic_id,
        })
    }

    async fn resolve_peer_nic(&self, address: Ipv4Addr) -> Result<NicId> {
        let state = self.state.lock().await;
        state
            .instances
            .values()
            .find(|i| i.address == address)
            .map(|i| i.nic_id)
            .ok_or_else(|| Error::directory(format!("no instance with address {address}")))
    }

    async fn list_group_members(&self, group: &str) -> Result<Vec<GroupMember>> {
        let state = self.state.lock().await;
        let mut members: Vec<GroupMember> = state
            .instances
            .iter()
            .filter(|(_, i)| i.running && i.group.as_deref() == Some(group))
            .map(|(id, i)| GroupMember {
                instance_id: id.clone(),
                address: i.address,
                nic_id: i.nic_id,
            })
            .collect();
        members.sort_by_key(|m| m.address);
        Ok(members)
    }

    async fn attach_address(&self, nic_id: NicId, address: Ipv4Addr) -> Result<()> {
        self.check_failing()?;
        debug!(nic = %nic_id, %address, "Attaching address");
        self.state
            .lock()
            .await
            .attachments
            .entry(nic_id)
            .or_default()
            .insert(address);
        Ok(())
    }

    async fn detach_address(&self, nic_id: NicId, address: Ipv4Addr) -> Result<()> {
        self.check_failing()?;
        let mut state = self.state.lock().await;
        let removed = state
            .attachments
            .get_mut(&nic_id)
            .is_some_and(|addrs| addrs.remove(&address));

        if !removed {
            return Err(Error::directory(format!(
                "address {address} is not attached to NIC {nic_id}"
            )));
        }

        debug!(nic = %nic_id, %address, "Detached address");
        Ok(())
    }

    async fn is_attached(&self, nic_id: NicId, address: Ipv4Addr) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .attachments
            .get(&nic_id)
            .is_some_and(|addrs| addrs.contains(&address)))
    }
}
