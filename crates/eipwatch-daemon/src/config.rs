//! Configuration file loading and validation

use cloudstack::DEFAULT_ENDPOINT;
use eipwatch::{
    DEFAULT_DEAD_RATIO, DEFAULT_INTERVAL, DEFAULT_PORT, DEFAULT_PRIORITY,
    DEFAULT_RECONCILE_INTERVAL, MAX_INTERVAL,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Placeholder printed in place of the API secret
pub const MASKED: &str = "********";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.watch.validate()?;
        self.api.validate()?;
        Ok(())
    }
}

/// Failover settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WatchSettings {
    /// Elastic IP to watch over
    #[validate(custom = "validate_ipv4")]
    pub address: Option<IpAddr>,

    /// Host priority, lowest wins
    #[validate(range(min = 1, max = 255))]
    pub priority: u8,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub interval: Duration,

    #[validate(range(min = 1))]
    pub dead_ratio: u32,

    /// Heartbeat listen address
    pub listen: SocketAddr,

    /// Static peers, `ip` or `ip:port`
    pub peers: Vec<String>,

    /// Security group whose running instances are the peers
    pub peer_group: Option<String>,

    /// Heartbeat port of group members
    #[validate(range(min = 1))]
    pub peer_port: u16,

    /// Own instance id; discovered through the metadata server when unset
    pub instance_id: Option<String>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_reconcile_interval")]
    pub reconcile_interval: Duration,
}

/// Compute API settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApiSettings {
    #[validate(custom = "validate_endpoint")]
    pub endpoint: String,

    pub key: Option<String>,

    pub secret: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
    /// `syslog` (default), `stderr` or `stdout`
    pub destination: Option<String>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            address: None,
            priority: DEFAULT_PRIORITY,
            interval: DEFAULT_INTERVAL,
            dead_ratio: DEFAULT_DEAD_RATIO,
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            peers: Vec::new(),
            peer_group: None,
            peer_port: DEFAULT_PORT,
            instance_id: None,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            key: None,
            secret: None,
        }
    }
}

// Custom validators

fn validate_ipv4(address: &IpAddr) -> Result<(), ValidationError> {
    if address.is_ipv6() {
        return Err(ValidationError::new("ipv6_unsupported"));
    }
    Ok(())
}

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    validate_reconcile_interval(interval)?;
    if *interval > MAX_INTERVAL {
        return Err(ValidationError::new("interval_above_one_hour"));
    }
    Ok(())
}

fn validate_reconcile_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_secs(1) {
        return Err(ValidationError::new("interval_below_one_second"));
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    let trimmed = endpoint.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ValidationError::new("endpoint_not_http"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths, or defaults if none exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/eipwatch/eipwatch.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./eipwatch.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/eipwatch/eipwatch.yaml"))
    }

    /// Copy of the configuration safe to print
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.api.secret.is_some() {
            config.api.secret = Some(MASKED.to_string());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.watch.listen.port(), 12345);
        assert_eq!(config.api.endpoint, "https://api.exoscale.ch/compute");
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r#"
watch:
  address: 159.100.241.5
  priority: 20
  interval: 2s
  dead_ratio: 5
  listen: 10.0.0.1:4000
  peers:
    - 10.0.0.2
    - 10.0.0.3:4000
  reconcile_interval: 10m

api:
  key: EXOkey
  secret: s3cr3t

logging:
  level: debug
  format: json
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.watch.address, Some("159.100.241.5".parse().unwrap()));
        assert_eq!(config.watch.priority, 20);
        assert_eq!(config.watch.interval, Duration::from_secs(2));
        assert_eq!(config.watch.peers.len(), 2);
        assert_eq!(config.watch.reconcile_interval, Duration::from_secs(600));
        assert_eq!(config.api.key.as_deref(), Some("EXOkey"));
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
watch:
  peer_group: ha-pair
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.watch.peer_group.as_deref(), Some("ha-pair"));
        assert_eq!(config.watch.priority, 10);
        assert_eq!(config.watch.dead_ratio, 3);
        assert_eq!(config.watch.interval, Duration::from_secs(1));
        assert_eq!(config.watch.reconcile_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_priority() {
        let yaml = r#"
watch:
  priority: 0
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_interval_too_small() {
        let yaml = r#"
watch:
  interval: 500ms
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_interval_too_large() {
        let yaml = r#"
watch:
  interval: 2h
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));

        let yaml = r#"
watch:
  reconcile_interval: 2h
"#;
        assert!(Config::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_invalid_dead_ratio() {
        let yaml = r#"
watch:
  dead_ratio: 0
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_ipv6_address_rejected() {
        let yaml = r#"
watch:
  address: "2001:db8::10"
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let yaml = r#"
api:
  endpoint: ftp://api.example.com
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load_from_file("/nonexistent/eipwatch.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_redacted_masks_secret() {
        let mut config = Config::default();
        config.api.secret = Some("s3cr3t".to_string());

        let printed = serde_yaml::to_string(&config.redacted()).unwrap();
        assert!(!printed.contains("s3cr3t"));
        assert!(printed.contains(MASKED));
    }
}
