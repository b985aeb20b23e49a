//! Logging utilities for eipwatch components.

use syslog_tracing::{Facility, Options, Syslog};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format of log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?} (expected text or json)")),
        }
    }
}

/// Where log events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogDestination {
    /// The local syslog daemon, facility `daemon`.
    #[default]
    Syslog,
    Stderr,
    Stdout,
}

impl std::str::FromStr for LogDestination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "syslog" => Ok(LogDestination::Syslog),
            "stderr" => Ok(LogDestination::Stderr),
            "stdout" => Ok(LogDestination::Stdout),
            other => Err(format!(
                "unknown log destination {other:?} (expected syslog, stderr or stdout)"
            )),
        }
    }
}

/// Initialize tracing.
///
/// The RUST_LOG environment variable takes precedence over `level`. Falls
/// back to stderr when the syslog connection cannot be opened.
pub fn init(level: &str, format: LogFormat, destination: LogDestination) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut syslog_unavailable = false;
    let writer = match destination {
        LogDestination::Syslog => {
            match Syslog::new(c"eipwatch", Options::LOG_PID, Facility::Daemon) {
                Some(syslog) => BoxMakeWriter::new(syslog),
                None => {
                    syslog_unavailable = true;
                    BoxMakeWriter::new(std::io::stderr)
                }
            }
        }
        LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
    };
    let ansi = destination != LogDestination::Syslog;

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(ansi).with_writer(writer))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .init(),
    }

    if syslog_unavailable {
        tracing::warn!("Syslog is unavailable, logging to stderr");
    }
}
