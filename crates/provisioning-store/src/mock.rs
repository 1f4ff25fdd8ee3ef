//! Mock provisioning store for unit testing
//!
//! In-memory implementation of every collaborator trait. Tests seed it with
//! `add_*` helpers and can make it fail on demand to simulate an unreachable
//! backing store.

use crate::error::StoreError;
use crate::models::{HostRecord, ImageMetadata, ProvisioningProfile};
use crate::store_trait::{ImageCatalog, InventoryStore, ProfileStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock store for testing
///
/// Clones share the same state, so a test can keep one handle for setup while
/// the code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    hosts: Arc<Mutex<Vec<HostRecord>>>,
    profiles: Arc<Mutex<Vec<ProvisioningProfile>>>,
    images: Arc<Mutex<Vec<ImageMetadata>>>,
    unavailable: Arc<AtomicBool>,
    host_listings: Arc<AtomicUsize>,
    profile_listings: Arc<AtomicUsize>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host to the mock store (for test setup)
    pub fn add_host(&self, host: HostRecord) {
        locked(&self.hosts).push(host);
    }

    /// Add a persisted profile to the mock store (for test setup)
    pub fn add_profile(&self, profile: ProvisioningProfile) {
        locked(&self.profiles).push(profile);
    }

    /// Add an image to the mock store (for test setup)
    pub fn add_image(&self, image: ImageMetadata) {
        locked(&self.images).push(image);
    }

    /// Remove every profile (for test setup)
    pub fn clear_profiles(&self) {
        locked(&self.profiles).clear();
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `list_hosts` calls served so far
    pub fn host_listings(&self) -> usize {
        self.host_listings.load(Ordering::SeqCst)
    }

    /// Number of `list_profiles` calls served so far
    pub fn profile_listings(&self) -> usize {
        self.profile_listings.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InventoryStore for MockStore {
    async fn list_hosts(&self) -> Result<Vec<HostRecord>, StoreError> {
        self.host_listings.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(locked(&self.hosts).clone())
    }
}

#[async_trait::async_trait]
impl ProfileStore for MockStore {
    async fn list_profiles(&self) -> Result<Vec<ProvisioningProfile>, StoreError> {
        self.profile_listings.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(locked(&self.profiles).clone())
    }
}

#[async_trait::async_trait]
impl ImageCatalog for MockStore {
    async fn lookup_image(&self, name: &str) -> Result<Option<ImageMetadata>, StoreError> {
        self.check_available()?;
        Ok(locked(&self.images)
            .iter()
            .find(|image| image.name == name)
            .cloned())
    }

    async fn list_images(&self) -> Result<Vec<ImageMetadata>, StoreError> {
        self.check_available()?;
        Ok(locked(&self.images).clone())
    }
}
