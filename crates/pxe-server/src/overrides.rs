//! Administrator-supplied profile overrides.
//!
//! An override is merged onto a freshly synthesized default profile, never
//! onto a persisted one. Once applied it is authoritative for each of its
//! MACs until cleared or the process restarts.

use crate::config::ProfileDefaults;
use crate::error::{PxeError, Result};
use crate::identity::{normalize_mac, normalize_mac_list};
use provisioning_store::{HostRecord, ImageCatalog, ProvisioningProfile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Partial profile. Blank fields leave the base profile's value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOverride {
    /// MACs to bind; every interface of the host when empty
    pub mac_addresses: Vec<String>,
    pub image_name: Option<String>,
    pub boot_filename: Option<String>,
    pub kernel_params: Vec<String>,
    pub initrd_params: Vec<String>,
    /// Replaces the base template data wholesale when non-empty
    pub template_data: BTreeMap<String, String>,
    pub ipv4_address: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub next_server: Option<Ipv4Addr>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ProfileOverride {
    /// Overwrite every field of `profile` this override supplies.
    pub fn apply_to(&self, profile: &mut ProvisioningProfile) {
        if let Some(image) = non_blank(&self.image_name) {
            profile.image_name = image;
        }
        if let Some(boot_filename) = non_blank(&self.boot_filename) {
            profile.boot_filename = Some(boot_filename);
        }
        if !self.kernel_params.is_empty() {
            profile.kernel_params = self.kernel_params.clone();
        }
        if !self.initrd_params.is_empty() {
            profile.initrd_params = self.initrd_params.clone();
        }
        if !self.template_data.is_empty() {
            profile.template_data = self.template_data.clone();
        }
        if !self.dns_servers.is_empty() {
            profile.dns_servers = self.dns_servers.clone();
        }
        if let Some(domain) = non_blank(&self.domain_name) {
            profile.domain_name = Some(domain);
        }
        profile.ipv4_address = self.ipv4_address.or(profile.ipv4_address);
        profile.subnet_mask = self.subnet_mask.or(profile.subnet_mask);
        profile.gateway = self.gateway.or(profile.gateway);
        profile.next_server = self.next_server.or(profile.next_server);
    }
}

/// In-memory overrides keyed by normalized MAC.
pub struct OverrideRegistry {
    defaults: ProfileDefaults,
    images: Arc<dyn ImageCatalog>,
    entries: RwLock<HashMap<String, ProvisioningProfile>>,
}

impl OverrideRegistry {
    pub fn new(defaults: ProfileDefaults, images: Arc<dyn ImageCatalog>) -> Self {
        Self {
            defaults,
            images,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and store an override for `host`. Returns the MACs it now
    /// covers. Nothing is stored unless every check passes.
    ///
    /// Malformed MACs in an explicit list are skipped. Only an image the
    /// override names itself is checked against the catalog.
    pub async fn apply(&self, host: &HostRecord, patch: &ProfileOverride) -> Result<Vec<String>> {
        let macs = if patch.mac_addresses.is_empty() {
            normalize_mac_list(host.mac_addresses())
        } else {
            normalize_mac_list(&patch.mac_addresses)
        };
        if macs.is_empty() {
            return Err(PxeError::OverrideRejected(format!(
                "no valid MAC addresses for host {}",
                host.management_address
            )));
        }

        if let Some(image) = non_blank(&patch.image_name) {
            if self.images.lookup_image(&image).await?.is_none() {
                return Err(PxeError::OverrideRejected(format!("image {image} does not exist")));
            }
        }

        let mut merged = self.defaults.base_profile(Some(host), None);
        patch.apply_to(&mut merged);
        if merged.image_name.is_empty() {
            return Err(PxeError::OverrideRejected(
                "override names no image and no default image is configured".to_string(),
            ));
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for mac in &macs {
            let mut profile = merged.clone();
            profile.boot_mac_address = Some(mac.clone());
            entries.insert(mac.clone(), profile);
        }
        info!(
            host = %host.management_address,
            image = %merged.image_name,
            macs = ?macs,
            "Applied provisioning override"
        );
        Ok(macs)
    }

    /// Remove overrides for every interface of `host`. Returns how many were removed.
    pub fn clear(&self, host: &HostRecord) -> usize {
        self.clear_by_mac(host.mac_addresses())
    }

    /// Remove overrides for the given MACs; malformed MACs are skipped.
    pub fn clear_by_mac<I, S>(&self, macs: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let macs = normalize_mac_list(macs);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = macs.iter().filter(|mac| entries.remove(*mac).is_some()).count();
        if removed > 0 {
            info!(removed, macs = ?macs, "Cleared provisioning overrides");
        }
        removed
    }

    pub fn resolve_by_mac(&self, mac: &str) -> Option<ProvisioningProfile> {
        let mac = normalize_mac(mac).ok().flatten()?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&mac).cloned()
    }

    /// First override among the host's MACs, in interface order.
    pub fn resolve_by_host(&self, host: &HostRecord) -> Option<ProvisioningProfile> {
        host.mac_addresses().find_map(|mac| self.resolve_by_mac(mac))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
