//! Instance metadata discovery.
//!
//! The metadata server answers on the default gateway of the instance.

use async_trait::async_trait;
use common::{Error, Result};
use eipwatch::InstanceMetadata;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Kernel routing table
pub const ROUTE_TABLE: &str = "/proc/net/route";

/// Metadata path holding the instance id
pub const INSTANCE_ID_PATH: &str = "latest/instance-id";

/// Gateway of the default route in a `/proc/net/route` listing
///
/// Addresses are hex-encoded in host (little-endian) byte order.
pub fn default_gateway(route_table: &str) -> Option<Ipv4Addr> {
    route_table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (destination, gateway) = (fields.get(1)?, fields.get(2)?);
        if *destination != "00000000" {
            return None;
        }

        let raw = u32::from_str_radix(gateway, 16).ok()?;
        Some(Ipv4Addr::from(raw.to_le_bytes()))
    })
}

/// Client of the instance metadata server
pub struct MetadataServer {
    http: reqwest::Client,
    route_table: PathBuf,
    server: Option<String>,
}

impl MetadataServer {
    /// Discover the server through the default route
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::metadata(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            http,
            route_table: PathBuf::from(ROUTE_TABLE),
            server: None,
        })
    }

    /// Use a fixed `host[:port]` instead of the default gateway
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Read the default route from another routing table file
    pub fn with_route_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_table = path.into();
        self
    }

    async fn server(&self) -> Result<String> {
        if let Some(server) = &self.server {
            return Ok(server.clone());
        }

        let table = tokio::fs::read_to_string(&self.route_table).await?;
        default_gateway(&table)
            .map(|gw| gw.to_string())
            .ok_or_else(|| Error::metadata("could not find metadata server: no default route"))
    }

    /// Fetch a metadata document
    pub async fn fetch(&self, path: &str) -> Result<String> {
        let url = format!("http://{}/{path}", self.server().await?);
        debug!(%url, "Fetching metadata");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::metadata(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::metadata(format!("{url}: HTTP {}", response.status())));
        }

        response
            .text()
            .await
            .map_err(|e| Error::metadata(format!("{url}: {e}")))
    }
}

#[async_trait]
impl InstanceMetadata for MetadataServer {
    async fn instance_id(&self) -> Result<String> {
        let id = self.fetch(INSTANCE_ID_PATH).await?.trim().to_string();
        if id.is_empty() {
            return Err(Error::metadata("metadata server returned an empty instance id"));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server;

    const ROUTES: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
";

    #[test]
    fn test_default_gateway() {
        assert_eq!(default_gateway(ROUTES), Some(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn test_no_default_route() {
        let table = "Iface\tDestination\tGateway\neth0\t0001A8C0\t00000000\n";
        assert_eq!(default_gateway(table), None);
        assert_eq!(default_gateway(""), None);
    }

    #[tokio::test]
    async fn test_instance_id_is_trimmed() {
        let (addr, log) =
            test_server::serve(vec![(200, "8a1f1c3e-1b2c-4d5e-9f00-112233445566\n".to_string())]).await;

        let metadata = MetadataServer::new(Duration::from_secs(5))
            .unwrap()
            .with_server(addr.to_string());

        assert_eq!(
            metadata.instance_id().await.unwrap(),
            "8a1f1c3e-1b2c-4d5e-9f00-112233445566"
        );
        assert_eq!(log.lock().unwrap()[0], "GET /latest/instance-id HTTP/1.1");
    }

    #[tokio::test]
    async fn test_missing_route_table() {
        let metadata = MetadataServer::new(Duration::from_secs(1))
            .unwrap()
            .with_route_table("/nonexistent/route");

        assert!(matches!(metadata.instance_id().await, Err(Error::Io(_))));
    }
}
