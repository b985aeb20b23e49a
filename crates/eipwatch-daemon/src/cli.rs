//! Command line interface

use clap::{ArgAction, Parser};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Keep an elastic IP attached to one healthy instance of a group
#[derive(Parser, Debug, Default)]
#[command(name = "eipwatch", version, about)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Watch over the address and fail over between peers
    #[arg(short = 'W', long)]
    pub watch: bool,

    /// Associate the address with this instance and exit
    #[arg(short = 'A', long)]
    pub associate: bool,

    /// Disassociate the address from this instance and exit
    #[arg(short = 'D', long)]
    pub disassociate: bool,

    /// Validate and print the configuration, then exit
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to stdout instead of syslog
    #[arg(short = 'O', long)]
    pub stdout: bool,

    /// Elastic IP to watch over
    #[arg(short = 'a', long, env = "IF_ADDRESS", value_name = "IP")]
    pub address: Option<IpAddr>,

    /// Heartbeat listen address, `ip:port` or `:port`
    #[arg(short = 'l', long, env = "IF_BIND_TO", value_parser = parse_listen)]
    pub listen: Option<SocketAddr>,

    /// Advertisement interval in seconds
    #[arg(short = 't', long, env = "IF_ADVERTISEMENT_INTERVAL", value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Host priority, lowest wins
    #[arg(short = 'P', long, env = "IF_HOST_PRIORITY")]
    pub priority: Option<u8>,

    /// Missed intervals before a peer is considered dead
    #[arg(short = 'r', long, env = "IF_DEAD_RATIO")]
    pub dead_ratio: Option<u32>,

    /// Static peer, `ip` or `ip:port`; repeatable or comma separated
    #[arg(short = 'p', long = "peer", env = "IF_EXOSCALE_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Security group whose running instances are the peers
    #[arg(short = 'G', long, env = "IF_EXOSCALE_PEER_GROUP", value_name = "GROUP")]
    pub peer_group: Option<String>,

    /// Heartbeat port of group members
    #[arg(long, value_name = "PORT")]
    pub peer_port: Option<u16>,

    /// Own instance id, discovered through the metadata server when unset
    #[arg(short = 'i', long, env = "IF_EXOSCALE_INSTANCE_ID", value_name = "ID")]
    pub instance_id: Option<String>,

    /// Reconcile interval in seconds
    #[arg(long, value_name = "SECONDS")]
    pub reconcile_interval: Option<u64>,

    #[arg(long, env = "IF_EXOSCALE_API_KEY", value_name = "KEY")]
    pub api_key: Option<String>,

    #[arg(long, env = "IF_EXOSCALE_API_SECRET", value_name = "SECRET", hide_env_values = true)]
    pub api_secret: Option<String>,

    #[arg(long, env = "IF_EXOSCALE_API_ENDPOINT", value_name = "URL")]
    pub api_endpoint: Option<String>,
}

/// Operating mode selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Watch,
    Associate,
    Disassociate,
}

impl Cli {
    /// The single requested mode, if exactly one was given
    pub fn mode(&self) -> Option<Mode> {
        match (self.watch, self.associate, self.disassociate) {
            (true, false, false) => Some(Mode::Watch),
            (false, true, false) => Some(Mode::Associate),
            (false, false, true) => Some(Mode::Disassociate),
            _ => None,
        }
    }

    /// Log level implied by the verbosity flags
    pub fn log_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("info"),
            _ => Some("debug"),
        }
    }
}

fn parse_listen(value: &str) -> Result<SocketAddr, String> {
    let candidate = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };

    candidate
        .parse()
        .map_err(|e| format!("invalid listen address {value:?}: {e}"))
}
