//! Elastic IP failover engine
//!
//! Keeps one floating address attached to exactly one healthy member of a
//! peer group, using a small UDP heartbeat and the compute API to move the
//! address between instances.
//!
//! # Features
//!
//! - Fixed 24-byte heartbeat with a duplicated priority byte
//! - Lowest priority wins; priority adjustable at runtime
//! - Edge-triggered failure detection with split-brain remediation
//! - Static peer lists or cloud peer groups refreshed on reconcile
//! - Periodic reconciliation of the address attachment
//!
//! # Example
//!
//! ```no_run
//! use eipwatch::memory::InMemoryDirectory;
//! use eipwatch::{Engine, EngineConfig, PeerSource};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig {
//!     address: "192.0.2.10".parse()?,
//!     priority: 10,
//!     peers: PeerSource::Static(vec!["10.0.0.2:12345".parse()?]),
//!     ..Default::default()
//! };
//!
//! let directory = Arc::new(InMemoryDirectory::new());
//! let engine = Arc::new(Engine::new(config, directory, "instance-1").await?);
//!
//! engine.run().await?;
//! # Ok(())
//! # }
//! ```

mod detector;
mod election;
mod engine;
mod packet;
mod peer;
mod transport;
mod types;

pub mod directory;
pub mod memory;

pub use detector::FailureDetector;
pub use directory::{Directory, GroupMember, InstanceMetadata, SelfInfo, resolve_instance_id};
pub use election::{Evaluation, elect, evaluate};
pub use engine::{Engine, Identity, PriorityError};
pub use packet::{DecodeError, Payload};
pub use peer::{Member, PeerRegistry, PeerSnapshot, RefreshReport, UpsertOutcome};
pub use transport::{BroadcastReport, HeartbeatListener};
pub use types::{
    DEFAULT_DEAD_RATIO, DEFAULT_INTERVAL, DEFAULT_PORT, DEFAULT_PRIORITY,
    DEFAULT_RECONCILE_INTERVAL, EngineConfig, EngineStats, MAX_INTERVAL, NicId, PAYLOAD_LENGTH,
    PROTOCOL_VERSION, PeerSource, Role, SKEW,
};
