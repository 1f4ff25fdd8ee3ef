//! YAML file-backed store
//!
//! Reads a single YAML document holding hosts, profiles and images. The file
//! is re-read on every call so edits show up once the PXE caches expire.
//!
//! ```yaml
//! hosts:
//!   - management_address: 10.0.0.5
//!     interfaces:
//!       - mac_address: aa:bb:cc:dd:ee:ff
//! profiles:
//!   - management_address: 10.0.0.5
//!     image_name: ubuntu-24.04
//! images:
//!   - name: ubuntu-24.04
//!     mechanism: cloud_init
//!     distro_family: debian
//! ```

use crate::error::StoreError;
use crate::models::{HostRecord, ImageMetadata, ProvisioningProfile};
use crate::store_trait::{ImageCatalog, InventoryStore, ProfileStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk document layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default)]
    pub profiles: Vec<ProvisioningProfile>,
    #[serde(default)]
    pub images: Vec<ImageMetadata>,
}

/// Store reading hosts, profiles and images from one YAML file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreDocument, StoreError> {
        debug!(path = %self.path.display(), "Reading provisioning store");
        let raw = tokio::fs::read_to_string(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[async_trait::async_trait]
impl InventoryStore for FileStore {
    async fn list_hosts(&self) -> Result<Vec<HostRecord>, StoreError> {
        Ok(self.load().await?.hosts)
    }
}

#[async_trait::async_trait]
impl ProfileStore for FileStore {
    async fn list_profiles(&self) -> Result<Vec<ProvisioningProfile>, StoreError> {
        Ok(self.load().await?.profiles)
    }
}

#[async_trait::async_trait]
impl ImageCatalog for FileStore {
    async fn lookup_image(&self, name: &str) -> Result<Option<ImageMetadata>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        Ok(self
            .load()
            .await?
            .images
            .into_iter()
            .find(|image| image.name == name))
    }

    async fn list_images(&self) -> Result<Vec<ImageMetadata>, StoreError> {
        Ok(self.load().await?.images)
    }
}
