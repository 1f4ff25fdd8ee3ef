//! Provisioning store errors

use thiserror::Error;

/// Errors that can occur when reading from a provisioning collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing document is not valid YAML for the expected records
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Store is unreachable (connection refused, timed out, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A record violates a store-level constraint
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
