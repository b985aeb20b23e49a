//! Compute API response types.

use eipwatch::NicId;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};

/// Async job status: still running
pub const JOB_PENDING: u8 = 0;

/// Async job status: completed
pub const JOB_SUCCEEDED: u8 = 1;

/// Async job status: failed
pub const JOB_FAILED: u8 = 2;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListVirtualMachines {
    #[serde(default)]
    pub count: u32,

    #[serde(default, rename = "virtualmachine")]
    pub virtual_machines: Vec<VirtualMachine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualMachine {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub state: String,

    #[serde(default, rename = "zonename")]
    pub zone_name: String,

    #[serde(default, rename = "nic")]
    pub nics: Vec<Nic>,

    #[serde(default, rename = "securitygroup")]
    pub security_groups: Vec<SecurityGroup>,
}

impl VirtualMachine {
    pub fn default_nic(&self) -> Option<&Nic> {
        self.nics.iter().find(|nic| nic.is_default)
    }

    pub fn in_security_group(&self, name: &str) -> bool {
        self.security_groups.iter().any(|sg| sg.name == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Nic {
    pub id: NicId,

    #[serde(default, rename = "ipaddress")]
    pub ip_address: Option<IpAddr>,

    #[serde(default, rename = "isdefault")]
    pub is_default: bool,

    #[serde(default, rename = "secondaryip")]
    pub secondary_ips: Vec<SecondaryIp>,
}

impl Nic {
    /// Primary address, if IPv4
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.ip_address {
            Some(IpAddr::V4(addr)) => Some(addr),
            _ => None,
        }
    }

    /// Id of the secondary address association for `address`
    pub fn secondary_ip_id(&self, address: Ipv4Addr) -> Option<&str> {
        self.secondary_ips
            .iter()
            .find(|ip| ip.ip_address == Some(IpAddr::V4(address)))
            .map(|ip| ip.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryIp {
    pub id: String,

    #[serde(default, rename = "ipaddress")]
    pub ip_address: Option<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroup {
    #[serde(default)]
    pub id: String,

    pub name: String,
}

/// Reply to a command that runs as an async job
#[derive(Debug, Clone, Deserialize)]
pub struct AsyncJob {
    #[serde(rename = "jobid")]
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsyncJobResult {
    #[serde(rename = "jobstatus")]
    pub job_status: u8,

    #[serde(default, rename = "jobresult")]
    pub job_result: Option<serde_json::Value>,
}

impl AsyncJobResult {
    /// Error text carried by a failed job
    pub fn error_text(&self) -> String {
        self.job_result
            .as_ref()
            .and_then(|r| r.get("errortext"))
            .and_then(|t| t.as_str())
            .unwrap_or("unknown error")
            .to_string()
    }
}

/// Error body returned in place of a command response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "errorcode")]
    pub error_code: u32,

    #[serde(default, rename = "errortext")]
    pub error_text: String,
}
