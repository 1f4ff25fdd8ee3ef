//! PXE server errors

use provisioning_store::StoreError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur while resolving or serving a boot request.
///
/// Every variant is scoped to a single request except `Configuration` and
/// `BindFailed`, which only surface at startup.
#[derive(Debug, Error)]
pub enum PxeError {
    /// Malformed MAC address
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    /// Malformed IPv4 address or hex-encoded address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No host, profile or image matched the request
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inventory, profile or image store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Override rejected before touching the registry
    #[error("Override rejected: {0}")]
    OverrideRejected(String),

    /// Template missing, malformed, or failed to render
    #[error("Template {key} failed for {identity}: {source}")]
    Template {
        key: String,
        identity: String,
        #[source]
        source: minijinja::Error,
    },

    /// No usable IPv4 address for a DHCP reply
    #[error("No usable address: {0}")]
    NoAddress(String),

    /// DHCP packet could not be decoded or encoded
    #[error("DHCP error: {0}")]
    Dhcp(String),

    /// TFTP packet or transfer failure
    #[error("TFTP error: {0}")]
    Tftp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind a listener
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PxeError {
    /// Whether the error is a client-facing miss (HTTP 404, TFTP file not found)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PxeError::NotFound(_) | PxeError::InvalidMac(_) | PxeError::InvalidAddress(_)
        )
    }
}

/// Result type for PXE operations
pub type Result<T> = std::result::Result<T, PxeError>;
