//! Collaborator traits
//!
//! The PXE core consumes inventory, profiles and image metadata through these
//! narrow traits. Concrete stores implement them, and tests use
//! `MockStore` behind the `test-util` feature.

use crate::error::StoreError;
use crate::models::{HostRecord, ImageMetadata, ProvisioningProfile};

/// Host inventory collaborator
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait InventoryStore: Send + Sync {
    /// List every host record with its interfaces
    async fn list_hosts(&self) -> Result<Vec<HostRecord>, StoreError>;
}

/// Persisted provisioning profile collaborator
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    /// List every persisted provisioning profile
    async fn list_profiles(&self) -> Result<Vec<ProvisioningProfile>, StoreError>;
}

/// Image metadata collaborator
#[async_trait::async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Look up an image by its exact name
    async fn lookup_image(&self, name: &str) -> Result<Option<ImageMetadata>, StoreError>;

    /// List every known image
    async fn list_images(&self) -> Result<Vec<ImageMetadata>, StoreError>;
}
