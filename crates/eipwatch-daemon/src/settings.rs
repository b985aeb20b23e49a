//! Effective settings: configuration file overlaid with the command line

use crate::cli::{Cli, Mode};
use crate::config::{Config, ConfigError};
use cloudstack::ClientConfig;
use common::logging::{LogDestination, LogFormat};
use eipwatch::{EngineConfig, PeerSource};
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use validator::Validate;

/// Everything the daemon needs to start
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub dry_run: bool,
    pub config: Config,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_destination: LogDestination,
}

impl Settings {
    /// Load the configuration file, apply command line overrides and validate
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let config = match &cli.config {
            Some(path) => Config::load_from_file(path)?,
            None => Config::load()?,
        };
        Self::resolve(cli, config)
    }

    /// Overlay `cli` onto `config` and validate the result
    pub fn resolve(cli: &Cli, mut config: Config) -> Result<Self, ConfigError> {
        let mode = cli.mode().ok_or_else(|| {
            ConfigError::Invalid("exactly one of -W, -A or -D is required".to_string())
        })?;

        apply_overrides(cli, &mut config);
        config.validate()?;

        let watch = &config.watch;
        if watch.address.is_none() {
            return Err(ConfigError::Invalid("an elastic IP address is required".to_string()));
        }

        if mode == Mode::Watch {
            match (watch.peers.is_empty(), &watch.peer_group) {
                (true, None) => {
                    return Err(ConfigError::Invalid(
                        "watch mode needs either peers or a peer group".to_string(),
                    ));
                }
                (false, Some(_)) => {
                    return Err(ConfigError::Invalid(
                        "peers and a peer group are mutually exclusive".to_string(),
                    ));
                }
                (true, Some(group)) if group.trim().is_empty() => {
                    return Err(ConfigError::Invalid("peer group name is empty".to_string()));
                }
                _ => {}
            }

            for peer in &watch.peers {
                parse_peer(peer, watch.listen.port()).map_err(ConfigError::Invalid)?;
            }
        }

        if blank(&config.api.key) || blank(&config.api.secret) {
            return Err(ConfigError::Invalid("API key and secret are required".to_string()));
        }

        let log_format = match &config.logging.format {
            Some(format) => format.parse().map_err(ConfigError::Invalid)?,
            None => LogFormat::default(),
        };

        let log_level = cli
            .log_level()
            .map(str::to_string)
            .or_else(|| config.logging.level.clone())
            .unwrap_or_else(|| "warn".to_string());

        let log_destination = match (&config.logging.destination, cli.stdout) {
            (_, true) => LogDestination::Stdout,
            (Some(destination), false) => destination.parse().map_err(ConfigError::Invalid)?,
            (None, false) => LogDestination::default(),
        };

        let settings = Self {
            mode,
            dry_run: cli.dry_run,
            config,
            log_level,
            log_format,
            log_destination,
        };
        settings
            .engine_config()?
            .validate()
            .map_err(ConfigError::Invalid)?;

        Ok(settings)
    }

    /// Engine configuration; one-shot modes carry no peers
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let watch = &self.config.watch;
        let address = watch
            .address
            .ok_or_else(|| ConfigError::Invalid("an elastic IP address is required".to_string()))?;

        let peers = match (self.mode, &watch.peer_group) {
            (Mode::Watch, Some(group)) => PeerSource::Group(group.trim().to_string()),
            (Mode::Watch, None) => PeerSource::Static(
                watch
                    .peers
                    .iter()
                    .map(|peer| parse_peer(peer, watch.listen.port()))
                    .collect::<Result<_, _>>()
                    .map_err(ConfigError::Invalid)?,
            ),
            _ => PeerSource::Static(Vec::new()),
        };

        Ok(EngineConfig {
            listen: watch.listen,
            address,
            priority: watch.priority,
            interval: watch.interval,
            dead_ratio: watch.dead_ratio,
            peers,
            peer_port: watch.peer_port,
            reconcile_interval: watch.reconcile_interval,
        })
    }

    /// API client configuration
    pub fn client_config(&self) -> ClientConfig {
        let api = &self.config.api;
        ClientConfig::new(
            api.endpoint.trim(),
            api.key.as_deref().unwrap_or_default().trim(),
            api.secret.as_deref().unwrap_or_default().trim(),
        )
    }

    /// Configuration as YAML with the secret masked
    pub fn to_printable_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(&self.config.redacted())?)
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn apply_overrides(cli: &Cli, config: &mut Config) {
    let watch = &mut config.watch;
    if let Some(address) = cli.address {
        watch.address = Some(address);
    }
    if let Some(listen) = cli.listen {
        watch.listen = listen;
    }
    if let Some(seconds) = cli.interval {
        watch.interval = Duration::from_secs(seconds);
    }
    if let Some(priority) = cli.priority {
        watch.priority = priority;
    }
    if let Some(ratio) = cli.dead_ratio {
        watch.dead_ratio = ratio;
    }
    if !cli.peers.is_empty() {
        watch.peers = cli.peers.iter().map(|p| p.trim().to_string()).collect();
    }
    if let Some(group) = &cli.peer_group {
        watch.peer_group = Some(group.clone());
    }
    if let Some(port) = cli.peer_port {
        watch.peer_port = port;
    }
    if let Some(id) = &cli.instance_id {
        watch.instance_id = Some(id.clone());
    }
    if let Some(seconds) = cli.reconcile_interval {
        watch.reconcile_interval = Duration::from_secs(seconds);
    }

    let api = &mut config.api;
    if let Some(endpoint) = &cli.api_endpoint {
        api.endpoint = endpoint.clone();
    }
    if let Some(key) = &cli.api_key {
        api.key = Some(key.clone());
    }
    if let Some(secret) = &cli.api_secret {
        api.secret = Some(secret.clone());
    }
}

/// Parse `ip` or `ip:port`; IPv6 peers are rejected
pub fn parse_peer(value: &str, default_port: u16) -> Result<SocketAddrV4, String> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return match addr {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(_) => Err(format!("IPv6 peers are unsupported: {value}")),
        };
    }

    match value.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(SocketAddrV4::new(ip, default_port)),
        Ok(IpAddr::V6(_)) => Err(format!("IPv6 peers are unsupported: {value}")),
        Err(_) => Err(format!("invalid peer address: {value:?}")),
    }
}
