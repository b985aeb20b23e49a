//! Cloud collaborators consumed by the engine.
//!
//! The engine never talks to a provider directly. Instance and NIC lookups,
//! group membership and address attachment go through [`Directory`]; instance
//! identity discovery goes through [`InstanceMetadata`].

use crate::types::NicId;
use async_trait::async_trait;
use common::Result;
use std::net::Ipv4Addr;
use tracing::info;

/// Identity of the local instance as known to the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfInfo {
    /// Zone (or equivalent placement context) of the instance
    pub zone: String,

    /// NIC the watched address is attached to
    pub nic_id: NicId,
}

/// A running instance of a peer group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub instance_id: String,
    pub address: Ipv4Addr,
    pub nic_id: NicId,
}

/// Compute API operations needed by the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up the zone and default NIC of an instance
    async fn resolve_self(&self, instance_id: &str) -> Result<SelfInfo>;

    /// Find the NIC owning a peer address
    async fn resolve_peer_nic(&self, address: Ipv4Addr) -> Result<NicId>;

    /// List the running instances of a group
    async fn list_group_members(&self, group: &str) -> Result<Vec<GroupMember>>;

    /// Attach `address` as a secondary address of `nic_id`
    async fn attach_address(&self, nic_id: NicId, address: Ipv4Addr) -> Result<()>;

    /// Remove `address` from the secondary addresses of `nic_id`
    async fn detach_address(&self, nic_id: NicId, address: Ipv4Addr) -> Result<()>;

    /// Whether `address` is currently attached to `nic_id`
    async fn is_attached(&self, nic_id: NicId, address: Ipv4Addr) -> Result<bool>;
}

/// Source of the local instance identifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    async fn instance_id(&self) -> Result<String>;
}

/// Use the configured instance id, or discover it through `metadata`
pub async fn resolve_instance_id(
    configured: Option<String>,
    metadata: &dyn InstanceMetadata,
) -> Result<String> {
    match configured.filter(|id| !id.trim().is_empty()) {
        Some(id) => Ok(id),
        None => {
            let id = metadata.instance_id().await?;
            info!(instance = %id, "Discovered instance id from metadata");
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;

    #[tokio::test]
    async fn test_configured_instance_id_skips_metadata() {
        let metadata = MockInstanceMetadata::new();

        let id = resolve_instance_id(Some("vm-1".to_string()), &metadata)
            .await
            .unwrap();
        assert_eq!(id, "vm-1");
    }

    #[tokio::test]
    async fn test_blank_instance_id_uses_metadata() {
        let mut metadata = MockInstanceMetadata::new();
        metadata
            .expect_instance_id()
            .times(1)
            .returning(|| Ok("vm-2".to_string()));

        let id = resolve_instance_id(Some("  ".to_string()), &metadata)
            .await
            .unwrap();
        assert_eq!(id, "vm-2");
    }

    #[tokio::test]
    async fn test_metadata_failure_propagates() {
        let mut metadata = MockInstanceMetadata::new();
        metadata
            .expect_instance_id()
            .returning(|| Err(Error::metadata("no default gateway")));

        let err = resolve_instance_id(None, &metadata).await.unwrap_err();
        assert!(matches!(err, Error::Metadata(_)));
    }
}
