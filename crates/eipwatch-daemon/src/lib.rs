//! eipwatch daemon
//!
//! Command line, configuration file and process lifecycle around the
//! [`eipwatch`] engine, with [`cloudstack`] as the compute API.
//!
//! # Modes
//!
//! - `-W`: watch over the address, failing over between peers
//! - `-A`: associate the address with this instance and exit
//! - `-D`: disassociate the address from this instance and exit
//!
//! # Signals
//!
//! In watch mode SIGUSR1 lowers the priority value (more eligible), SIGUSR2
//! raises it, and SIGTERM or SIGINT release the address and exit.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod settings;

pub use cli::{Cli, Mode};
pub use config::{Config, ConfigError};
pub use settings::Settings;
