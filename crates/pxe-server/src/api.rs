//! Administrative override API
//!
//! The handle a front end uses to pin a machine to an image or parameters
//! without touching persisted profiles. Overrides take effect on the next
//! DHCP or PXELinux request; nothing needs restarting.

use crate::error::Result;
use crate::overrides::{OverrideRegistry, ProfileOverride};
use provisioning_store::{HostRecord, ProvisioningProfile};
use std::sync::Arc;
use tracing::debug;

/// Cloneable handle over the running service's override registry.
#[derive(Clone)]
pub struct AdminApi {
    overrides: Arc<OverrideRegistry>,
}

impl AdminApi {
    pub fn new(overrides: Arc<OverrideRegistry>) -> Self {
        Self { overrides }
    }

    /// Register `patch` for the host's MACs (or the MACs it names).
    ///
    /// Fails without changing anything when no MAC is known, no image can be
    /// determined, or the image does not exist.
    pub async fn apply_override(&self, host: &HostRecord, patch: ProfileOverride) -> Result<Vec<String>> {
        self.overrides.apply(host, &patch).await
    }

    /// Drop every override bound to the host's interfaces.
    pub fn clear_override(&self, host: &HostRecord) -> Result<usize> {
        let removed = self.overrides.clear(host);
        debug!(host = %host.management_address, removed, "Cleared host overrides");
        Ok(removed)
    }

    /// Drop overrides for the given MACs. Malformed MACs are skipped.
    pub fn clear_overrides_by_mac<I, S>(&self, macs: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.overrides.clear_by_mac(macs)
    }

    /// The override currently bound to `mac`, if any.
    pub fn override_for(&self, mac: &str) -> Option<ProvisioningProfile> {
        self.overrides.resolve_by_mac(mac)
    }
}
