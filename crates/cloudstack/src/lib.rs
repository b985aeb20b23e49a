//! Compute API collaborators for eipwatch
//!
//! - [`CloudStackClient`]: signed CloudStack-style API client implementing
//!   [`eipwatch::Directory`]
//! - [`MetadataServer`]: instance id discovery through the metadata server on
//!   the default gateway, implementing [`eipwatch::InstanceMetadata`]

mod client;
mod metadata;
mod signing;
mod types;

#[cfg(test)]
mod test_server;

pub use client::{ClientConfig, CloudStackClient, DEFAULT_ENDPOINT};
pub use metadata::{INSTANCE_ID_PATH, MetadataServer, ROUTE_TABLE, default_gateway};
pub use signing::{query_string, signature, signed_query};
pub use types::{
    ApiError, AsyncJob, AsyncJobResult, JOB_FAILED, JOB_PENDING, JOB_SUCCEEDED,
    ListVirtualMachines, Nic, SecondaryIp, SecurityGroup, VirtualMachine,
};
