//! Common error types for eipwatch components.

use std::fmt;

/// A specialized Result type for eipwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for eipwatch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new directory (cloud API) error.
    pub fn directory(msg: impl fmt::Display) -> Self {
        Error::Directory(msg.to_string())
    }

    /// Create a new instance metadata error.
    pub fn metadata(msg: impl fmt::Display) -> Self {
        Error::Metadata(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_build_matching_variants() {
        assert!(matches!(Error::directory("boom"), Error::Directory(m) if m == "boom"));
        assert!(matches!(Error::config(42), Error::Config(m) if m == "42"));
        assert_eq!(
            Error::metadata("no gateway").to_string(),
            "Metadata error: no gateway"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
