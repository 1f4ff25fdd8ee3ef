//! Read-through snapshot caches over the inventory and profile stores.
//!
//! Each cache holds one immutable snapshot behind its own [`RwLock`]. Readers
//! check freshness under the shared lock. A stale reader takes the exclusive
//! lock, re-checks, and only then pulls the full record set from the store.
//! A failed rebuild returns the error and leaves the previous snapshot in
//! place. Lookups always hand out clones.

use crate::error::Result;
use crate::identity::{host_slug, normalize_mac};
use provisioning_store::{HostRecord, InventoryStore, ProfileStore, ProvisioningProfile};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default host snapshot lifetime
pub const HOST_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default profile snapshot lifetime
pub const PROFILE_CACHE_TTL: Duration = Duration::from_secs(15);

struct Snapshot<S> {
    index: Arc<S>,
    expires_at: Instant,
}

impl<S> Snapshot<S> {
    fn fresh(&self) -> Option<Arc<S>> {
        (Instant::now() < self.expires_at).then(|| Arc::clone(&self.index))
    }
}

/// A time-bounded snapshot, rebuilt wholesale when it expires.
pub struct SnapshotCache<S> {
    ttl: Duration,
    state: RwLock<Option<Snapshot<S>>>,
}

impl<S> SnapshotCache<S> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(None),
        }
    }

    /// Current snapshot, rebuilding it with `build` if absent or expired.
    pub async fn get_or_refresh<F, Fut>(&self, build: F) -> Result<Arc<S>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        if let Some(index) = self.state.read().await.as_ref().and_then(Snapshot::fresh) {
            return Ok(index);
        }

        let mut state = self.state.write().await;
        // Another caller may have rebuilt while we waited for the write lock
        if let Some(index) = state.as_ref().and_then(Snapshot::fresh) {
            return Ok(index);
        }

        let built = match build().await {
            Ok(built) => built,
            Err(e) => {
                warn!(error = %e, stale = state.is_some(), "Cache rebuild failed, keeping the previous snapshot");
                return Err(e);
            }
        };
        let index = Arc::new(built);
        *state = Some(Snapshot {
            index: Arc::clone(&index),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(index)
    }

    /// Drop the snapshot so the next lookup rebuilds.
    pub async fn invalidate(&self) {
        *self.state.write().await = None;
    }
}

/// Host lookups by MAC, management address and slug.
#[derive(Debug, Default)]
pub struct HostIndex {
    by_mac: HashMap<String, HostRecord>,
    by_ip: HashMap<String, HostRecord>,
    by_slug: HashMap<String, HostRecord>,
}

impl HostIndex {
    pub fn build(hosts: Vec<HostRecord>) -> Self {
        let mut index = Self::default();
        for host in hosts {
            for raw in host.mac_addresses() {
                match normalize_mac(raw) {
                    Ok(Some(mac)) => {
                        index.by_mac.insert(mac, host.clone());
                    }
                    Ok(None) => {}
                    Err(e) => warn!(
                        host = %host.management_address,
                        mac = raw,
                        error = %e,
                        "Skipping interface with malformed MAC"
                    ),
                }
            }
            let address = host.management_address.trim();
            if !address.is_empty() {
                index.by_slug.insert(host_slug(address), host.clone());
                index.by_ip.insert(address.to_string(), host);
            }
        }
        index
    }
}

/// Cache of the inventory's host records.
pub struct HostCache {
    store: Arc<dyn InventoryStore>,
    cache: SnapshotCache<HostIndex>,
}

impl HostCache {
    pub fn new(store: Arc<dyn InventoryStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: SnapshotCache::new(ttl),
        }
    }

    async fn index(&self) -> Result<Arc<HostIndex>> {
        self.cache
            .get_or_refresh(|| async {
                let hosts = self.store.list_hosts().await?;
                debug!(hosts = hosts.len(), "Rebuilt host cache");
                Ok(HostIndex::build(hosts))
            })
            .await
    }

    /// Host owning the interface with this MAC
    pub async fn by_mac(&self, mac: &str) -> Result<Option<HostRecord>> {
        let Some(mac) = normalize_mac(mac)? else {
            return Ok(None);
        };
        Ok(self.index().await?.by_mac.get(&mac).cloned())
    }

    /// Host with this management address
    pub async fn by_ip(&self, address: &str) -> Result<Option<HostRecord>> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(None);
        }
        Ok(self.index().await?.by_ip.get(address).cloned())
    }

    /// Host whose management address slugs to `slug`
    pub async fn by_slug(&self, slug: &str) -> Result<Option<HostRecord>> {
        let slug = slug.trim().to_lowercase();
        if slug.is_empty() {
            return Ok(None);
        }
        Ok(self.index().await?.by_slug.get(&slug).cloned())
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}

/// Persisted profile lookups by boot MAC and management address.
#[derive(Debug, Default)]
pub struct ProfileIndex {
    by_mac: HashMap<String, ProvisioningProfile>,
    by_ip: HashMap<String, ProvisioningProfile>,
}

impl ProfileIndex {
    pub fn build(profiles: Vec<ProvisioningProfile>) -> Self {
        let mut index = Self::default();
        for profile in profiles {
            if let Some(raw) = profile.boot_mac_address.as_deref() {
                match normalize_mac(raw) {
                    Ok(Some(mac)) => {
                        index.by_mac.insert(mac, profile.clone());
                    }
                    Ok(None) => {}
                    Err(e) => warn!(mac = raw, error = %e, "Skipping profile with malformed boot MAC"),
                }
            }
            if let Some(address) = profile.management_address.as_deref().map(str::trim) {
                if !address.is_empty() {
                    index.by_ip.insert(address.to_string(), profile.clone());
                }
            }
        }
        index
    }
}

/// Cache of persisted provisioning profiles.
pub struct ProfileCache {
    store: Arc<dyn ProfileStore>,
    cache: SnapshotCache<ProfileIndex>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn ProfileStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: SnapshotCache::new(ttl),
        }
    }

    async fn index(&self) -> Result<Arc<ProfileIndex>> {
        self.cache
            .get_or_refresh(|| async {
                let profiles = self.store.list_profiles().await?;
                debug!(profiles = profiles.len(), "Rebuilt profile cache");
                Ok(ProfileIndex::build(profiles))
            })
            .await
    }

    /// Profile whose boot MAC is `mac`
    pub async fn by_mac(&self, mac: &str) -> Result<Option<ProvisioningProfile>> {
        let Some(mac) = normalize_mac(mac)? else {
            return Ok(None);
        };
        Ok(self.index().await?.by_mac.get(&mac).cloned())
    }

    /// Profile bound to this management address
    pub async fn by_ip(&self, address: &str) -> Result<Option<ProvisioningProfile>> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(None);
        }
        Ok(self.index().await?.by_ip.get(address).cloned())
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}
