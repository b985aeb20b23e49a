//! Signed compute API client.

use crate::signing;
use crate::types::{
    ApiError, AsyncJob, AsyncJobResult, JOB_FAILED, JOB_PENDING, JOB_SUCCEEDED,
    ListVirtualMachines, Nic, VirtualMachine,
};
use async_trait::async_trait;
use common::{Error, Result};
use eipwatch::{Directory, GroupMember, NicId, SelfInfo};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Default compute API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.exoscale.ch/compute";

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub key: String,
    pub secret: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Delay between async job polls
    pub poll_interval: Duration,

    /// Polls before an async job is reported as stuck
    pub max_polls: u32,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            secret: secret.into(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            max_polls: 30,
        }
    }
}

/// CloudStack-style compute API client
pub struct CloudStackClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl CloudStackClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::directory(format!("could not build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    /// Issue a signed GET for `command` and unwrap its response object
    pub async fn request<T: DeserializeOwned>(
        &self,
        command: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut all: BTreeMap<String, String> = params
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        all.insert("command".to_string(), command.to_string());
        all.insert("apikey".to_string(), self.config.key.clone());
        all.insert("response".to_string(), "json".to_string());

        let query = signing::signed_query(&all, &self.config.secret)?;
        let url = format!("{}?{query}", self.config.endpoint.trim_end_matches('/'));

        debug!(command, "Calling compute API");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::directory(format!("{command}: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::directory(format!("{command}: {e}")))?;

        parse_response(command, status, &body)
    }

    /// Virtual machines matching `params`
    pub async fn list_virtual_machines(
        &self,
        params: &[(&str, String)],
    ) -> Result<Vec<VirtualMachine>> {
        let mut params = params.to_vec();
        params.push(("listall", "true".to_string()));

        let list: ListVirtualMachines = self.request("listVirtualMachines", &params).await?;
        Ok(list.virtual_machines)
    }

    pub async fn virtual_machine(&self, id: &str) -> Result<VirtualMachine> {
        self.list_virtual_machines(&[("id", id.to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::directory(format!("virtual machine {id} not found")))
    }

    /// Poll an async job until it completes
    pub async fn wait_for_job(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
        for attempt in 1..=self.config.max_polls {
            let job: AsyncJobResult = self
                .request("queryAsyncJobResult", &[("jobid", job_id.to_string())])
                .await?;

            match job.job_status {
                JOB_SUCCEEDED => return Ok(job.job_result),
                JOB_FAILED => {
                    return Err(Error::directory(format!(
                        "job {job_id} failed: {}",
                        job.error_text()
                    )));
                }
                JOB_PENDING => {
                    debug!(job = job_id, attempt, "Job pending");
                    sleep(self.config.poll_interval).await;
                }
                other => {
                    return Err(Error::directory(format!(
                        "job {job_id} has unknown status {other}"
                    )));
                }
            }
        }

        Err(Error::directory(format!(
            "job {job_id} still pending after {} polls",
            self.config.max_polls
        )))
    }

    /// Find the NIC with `nic_id` across every virtual machine
    async fn find_nic(&self, nic_id: NicId) -> Result<Nic> {
        self.list_virtual_machines(&[])
            .await?
            .into_iter()
            .flat_map(|vm| vm.nics)
            .find(|nic| nic.id == nic_id)
            .ok_or_else(|| Error::directory(format!("NIC {nic_id} not found")))
    }
}

#[async_trait]
impl Directory for CloudStackClient {
    async fn resolve_self(&self, instance_id: &str) -> Result<SelfInfo> {
        let vm = self.virtual_machine(instance_id).await?;
        let nic = vm.default_nic().ok_or_else(|| {
            Error::directory(format!("cannot find default NIC of virtual machine {instance_id}"))
        })?;

        Ok(SelfInfo {
            zone: vm.zone_name.clone(),
            nic_id: nic.id,
        })
    }

    async fn resolve_peer_nic(&self, address: Ipv4Addr) -> Result<NicId> {
        self.list_virtual_machines(&[])
            .await?
            .iter()
            .filter_map(VirtualMachine::default_nic)
            .find(|nic| nic.ipv4() == Some(address))
            .map(|nic| nic.id)
            .ok_or_else(|| Error::directory(format!("cannot find NIC for peer {address}")))
    }

    async fn list_group_members(&self, group: &str) -> Result<Vec<GroupMember>> {
        let vms = self
            .list_virtual_machines(&[("state", "Running".to_string())])
            .await?;

        Ok(vms
            .iter()
            .filter(|vm| vm.in_security_group(group))
            .filter_map(|vm| {
                let nic = vm.default_nic()?;
                Some(GroupMember {
                    instance_id: vm.id.clone(),
                    address: nic.ipv4()?,
                    nic_id: nic.id,
                })
            })
            .collect())
    }

    async fn attach_address(&self, nic_id: NicId, address: Ipv4Addr) -> Result<()> {
        let job: AsyncJob = self
            .request(
                "addIpToNic",
                &[("nicid", nic_id.to_string()), ("ipaddress", address.to_string())],
            )
            .await?;
        self.wait_for_job(&job.job_id).await?;

        info!(%address, nic = %nic_id, "Claimed address");
        Ok(())
    }

    async fn detach_address(&self, nic_id: NicId, address: Ipv4Addr) -> Result<()> {
        let nic = self.find_nic(nic_id).await?;
        let association = nic.secondary_ip_id(address).ok_or_else(|| {
            Error::directory(format!("address {address} is not attached to NIC {nic_id}"))
        })?;

        let job: AsyncJob = self
            .request("removeIpFromNic", &[("id", association.to_string())])
            .await?;
        self.wait_for_job(&job.job_id).await?;

        info!(%address, nic = %nic_id, "Released address");
        Ok(())
    }

    async fn is_attached(&self, nic_id: NicId, address: Ipv4Addr) -> Result<bool> {
        let nic = self.find_nic(nic_id).await?;
        Ok(nic.secondary_ip_id(address).is_some())
    }
}

/// Unwrap the single `<command>response` object of a reply
pub(crate) fn parse_response<T: DeserializeOwned>(command: &str, status: u16, body: &str) -> Result<T> {
    let envelope: HashMap<String, serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| Error::directory(format!("{command}: unexpected reply (HTTP {status}): {e}")))?;

    let inner = envelope
        .into_values()
        .next()
        .ok_or_else(|| Error::directory(format!("{command}: empty reply (HTTP {status})")))?;

    if inner.get("errorcode").is_some() {
        let error: ApiError = serde_json::from_value(inner)?;
        return Err(Error::directory(format!(
            "{command}: {} (error {})",
            error.error_text, error.error_code
        )));
    }

    if !(200..300).contains(&status) {
        return Err(Error::directory(format!("{command}: HTTP {status}")));
    }

    Ok(serde_json::from_value(inner)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server;

    const EIP: Ipv4Addr = Ipv4Addr::new(159, 100, 241, 5);
    const NIC: &str = "1128bd56-b4d9-4ac6-a7b9-c715b187ce11";

    fn vm(id: &str, nic: &str, ip: &str, group: &str, secondary: &[(&str, &str)]) -> serde_json::Value {
        let secondary: Vec<serde_json::Value> = secondary
            .iter()
            .map(|(id, ip)| serde_json::json!({"id": id, "ipaddress": ip}))
            .collect();

        serde_json::json!({
            "id": id,
            "state": "Running",
            "zonename": "ch-gva-2",
            "nic": [{"id": nic, "ipaddress": ip, "isdefault": true, "secondaryip": secondary}],
            "securitygroup": [{"name": group}]
        })
    }

    fn listing(vms: Vec<serde_json::Value>) -> (u16, String) {
        let body = serde_json::json!({
            "listvirtualmachinesresponse": {"count": vms.len(), "virtualmachine": vms}
        });
        (200, body.to_string())
    }

    fn job(status: u8) -> (u16, String) {
        let body = serde_json::json!({
            "queryasyncjobresultresponse": {"jobid": "job-1", "jobstatus": status, "jobresult": {}}
        });
        (200, body.to_string())
    }

    fn client(addr: std::net::SocketAddr) -> CloudStackClient {
        let mut config = ClientConfig::new(format!("http://{addr}/compute"), "key", "secret");
        config.poll_interval = Duration::from_millis(10);
        config.max_polls = 3;
        CloudStackClient::new(config).unwrap()
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"listvirtualmachinesresponse": {"uuidList": [], "errorcode": 431, "cserrorcode": 9999, "errortext": "Unable to execute API command"}}"#;
        let err = parse_response::<ListVirtualMachines>("listVirtualMachines", 431, body).unwrap_err();

        assert!(matches!(err, Error::Directory(_)));
        assert!(err.to_string().contains("Unable to execute API command"));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_response::<ListVirtualMachines>("listVirtualMachines", 502, "<html>").unwrap_err();
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[tokio::test]
    async fn test_resolve_self() {
        let (addr, log) = test_server::serve(vec![listing(vec![vm(
            "vm-1", NIC, "185.19.28.10", "ha", &[],
        )])])
        .await;

        let info = client(addr).resolve_self("vm-1").await.unwrap();
        assert_eq!(info.zone, "ch-gva-2");
        assert_eq!(info.nic_id.to_string(), NIC);

        let requests = log.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("GET /compute?apikey=key&command=listVirtualMachines&id=vm-1"));
        assert!(requests[0].contains("&signature="));
    }

    #[tokio::test]
    async fn test_group_members_filter_by_security_group() {
        let (addr, log) = test_server::serve(vec![listing(vec![
            vm("vm-1", NIC, "185.19.28.10", "ha", &[]),
            vm("vm-2", "22222222-b4d9-4ac6-a7b9-c715b187ce11", "185.19.28.11", "ha", &[]),
            vm("vm-3", "33333333-b4d9-4ac6-a7b9-c715b187ce11", "185.19.28.12", "web", &[]),
        ])])
        .await;

        let members = client(addr).list_group_members("ha").await.unwrap();
        let ids: Vec<&str> = members.iter().map(|m| m.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["vm-1", "vm-2"]);
        assert_eq!(members[1].address, Ipv4Addr::new(185, 19, 28, 11));

        assert!(log.lock().unwrap()[0].contains("state=Running"));
    }

    #[tokio::test]
    async fn test_attach_polls_job() {
        let accepted = serde_json::json!({"addiptovmnicresponse": {"id": "ip-1", "jobid": "job-1"}});
        let (addr, log) = test_server::serve(vec![
            (200, accepted.to_string()),
            job(JOB_PENDING),
            job(JOB_SUCCEEDED),
        ])
        .await;

        client(addr)
            .attach_address(NIC.parse().unwrap(), EIP)
            .await
            .unwrap();

        let requests = log.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].contains("command=addIpToNic"));
        assert!(requests[0].contains(&format!("ipaddress={EIP}")));
        assert!(requests[2].contains("command=queryAsyncJobResult&jobid=job-1"));
    }

    #[tokio::test]
    async fn test_failed_job_is_an_error() {
        let accepted = serde_json::json!({"addiptovmnicresponse": {"jobid": "job-1"}});
        let (addr, _) = test_server::serve(vec![(200, accepted.to_string()), job(JOB_FAILED)]).await;

        let err = client(addr)
            .attach_address(NIC.parse().unwrap(), EIP)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("job job-1 failed"));
    }

    #[tokio::test]
    async fn test_detach_uses_secondary_ip_association() {
        let removed = serde_json::json!({"removeipfromnicresponse": {"jobid": "job-1"}});
        let (addr, log) = test_server::serve(vec![
            listing(vec![vm("vm-1", NIC, "185.19.28.10", "ha", &[("assoc-9", "159.100.241.5")])]),
            (200, removed.to_string()),
            job(JOB_SUCCEEDED),
        ])
        .await;

        client(addr)
            .detach_address(NIC.parse().unwrap(), EIP)
            .await
            .unwrap();

        let requests = log.lock().unwrap().clone();
        assert!(requests[1].contains("command=removeIpFromNic&id=assoc-9"));
    }

    #[tokio::test]
    async fn test_detach_without_association_fails() {
        let (addr, log) = test_server::serve(vec![listing(vec![vm(
            "vm-1", NIC, "185.19.28.10", "ha", &[],
        )])])
        .await;

        let nic: NicId = NIC.parse().unwrap();
        let err = client(addr).detach_address(nic, EIP).await.unwrap_err();
        assert!(err.to_string().contains("is not attached"));
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
