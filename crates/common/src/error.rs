//! Common error types for lb-sync components.

use std::fmt;

/// A specialized Result type for lb-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for lb-sync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("IPVS error: {0}")]
    IPVS(String),

    #[error("VRRP error: {0}")]
    VRRP(String),

    #[error("Neighbor table error: {0}")]
    Neighbor(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new IPVS error.
    pub fn ipvs(msg: impl fmt::Display) -> Self {
        Error::IPVS(msg.to_string())
    }

    /// Create a new VRRP error.
    pub fn vrrp(msg: impl fmt::Display) -> Self {
        Error::VRRP(msg.to_string())
    }

    /// Create a new neighbor table error.
    pub fn neighbor(msg: impl fmt::Display) -> Self {
        Error::Neighbor(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
