//! Profile resolution
//!
//! Turns whatever identity a protocol hands us into the effective profile.
//! Resolution is an explicit list of [`ResolutionStep`]s tried in order; the
//! first step producing a profile wins.
//!
//! - [`MAC_CHAIN`]: DHCP, `pxelinux.cfg/01-<mac>`, `default` with a known MAC
//! - [`HOST_CHAIN`]: hex-IP names, `default` by source IP, profile slugs
//!
//! MAC identity always runs first because it survives lease changes.

use crate::cache::{HostCache, ProfileCache};
use crate::config::ProfileDefaults;
use crate::error::Result;
use crate::identity::normalize_mac;
use crate::overrides::OverrideRegistry;
use provisioning_store::{HostRecord, ProvisioningProfile};
use std::sync::Arc;
use tracing::debug;

/// One resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    /// Override registered for the requesting MAC
    OverrideByMac,
    /// Persisted profile whose boot MAC is the requesting MAC
    ProfileByMac,
    /// Discover the host owning the requesting MAC; never yields a profile
    HostByMac,
    /// First override among the host's MACs, in interface order
    OverrideByHost,
    /// First persisted profile among the host's MACs
    ProfileByHostMacs,
    /// Persisted profile bound to the host's management address
    ProfileByHostAddress,
    /// Configuration defaults stamped with the known identity
    SynthesizedDefault,
}

pub const MAC_CHAIN: &[ResolutionStep] = &[
    ResolutionStep::OverrideByMac,
    ResolutionStep::ProfileByMac,
    ResolutionStep::HostByMac,
    ResolutionStep::OverrideByHost,
    ResolutionStep::ProfileByHostMacs,
    ResolutionStep::ProfileByHostAddress,
    ResolutionStep::SynthesizedDefault,
];

pub const HOST_CHAIN: &[ResolutionStep] = &[
    ResolutionStep::OverrideByHost,
    ResolutionStep::ProfileByHostMacs,
    ResolutionStep::ProfileByHostAddress,
    ResolutionStep::SynthesizedDefault,
];

/// Where a resolved profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    Override,
    Persisted,
    Default,
}

/// The effective profile and whatever host record was discovered on the way.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub profile: ProvisioningProfile,
    pub host: Option<HostRecord>,
    pub source: ProfileSource,
}

/// Identity known so far; steps may fill in the host.
#[derive(Debug, Default)]
struct Lookup {
    mac: Option<String>,
    host: Option<HostRecord>,
}

/// Resolves a MAC, host, address or slug to the profile it boots.
///
/// Every chain consults the override registry and the persisted profiles
/// before falling back to the default synthesized from configuration.
pub struct ProfileResolver {
    hosts: Arc<HostCache>,
    profiles: Arc<ProfileCache>,
    overrides: Arc<OverrideRegistry>,
    defaults: ProfileDefaults,
}

impl ProfileResolver {
    pub fn new(
        hosts: Arc<HostCache>,
        profiles: Arc<ProfileCache>,
        overrides: Arc<OverrideRegistry>,
        defaults: ProfileDefaults,
    ) -> Self {
        Self {
            hosts,
            profiles,
            overrides,
            defaults,
        }
    }

    pub fn hosts(&self) -> &HostCache {
        &self.hosts
    }

    pub fn defaults(&self) -> &ProfileDefaults {
        &self.defaults
    }

    /// Resolve a request identified by MAC.
    ///
    /// `Ok(None)` means decline: no override, no persisted profile and no
    /// default image.
    pub async fn resolve_by_mac(&self, mac: &str) -> Result<Option<Resolution>> {
        let Some(mac) = normalize_mac(mac)? else {
            return Ok(None);
        };
        let lookup = Lookup {
            mac: Some(mac),
            host: None,
        };
        self.run(MAC_CHAIN, lookup).await
    }

    /// Resolve for a known host record.
    pub async fn resolve_by_host(&self, host: HostRecord) -> Result<Option<Resolution>> {
        let lookup = Lookup {
            mac: None,
            host: Some(host),
        };
        self.run(HOST_CHAIN, lookup).await
    }

    /// Resolve by management address. Unknown addresses resolve to nothing.
    pub async fn resolve_by_address(&self, address: &str) -> Result<Option<Resolution>> {
        match self.hosts.by_ip(address).await? {
            Some(host) => self.resolve_by_host(host).await,
            None => {
                debug!(address, "No host for address");
                Ok(None)
            }
        }
    }

    /// Resolve a profile slug. Unknown slugs fall back to the identity-less
    /// default so an unregistered machine can still fetch its seed.
    pub async fn resolve_by_slug(&self, slug: &str) -> Result<Option<Resolution>> {
        match self.hosts.by_slug(slug).await? {
            Some(host) => self.resolve_by_host(host).await,
            None => {
                debug!(slug, "No host for slug, using default profile");
                self.run(&[ResolutionStep::SynthesizedDefault], Lookup::default())
                    .await
            }
        }
    }

    async fn run(&self, chain: &[ResolutionStep], mut lookup: Lookup) -> Result<Option<Resolution>> {
        for step in chain {
            if let Some((profile, source)) = self.try_step(*step, &mut lookup).await? {
                debug!(
                    step = ?step,
                    mac = ?lookup.mac,
                    host = ?lookup.host.as_ref().map(|h| &h.management_address),
                    image = %profile.image_name,
                    "Resolved profile"
                );
                return Ok(Some(Resolution {
                    profile,
                    host: lookup.host,
                    source,
                }));
            }
        }
        Ok(None)
    }

    async fn try_step(
        &self,
        step: ResolutionStep,
        lookup: &mut Lookup,
    ) -> Result<Option<(ProvisioningProfile, ProfileSource)>> {
        let found = match step {
            ResolutionStep::OverrideByMac => lookup
                .mac
                .as_deref()
                .and_then(|mac| self.overrides.resolve_by_mac(mac))
                .map(|p| (p, ProfileSource::Override)),
            ResolutionStep::ProfileByMac => match lookup.mac.as_deref() {
                Some(mac) => self
                    .profiles
                    .by_mac(mac)
                    .await?
                    .map(|p| (p, ProfileSource::Persisted)),
                None => None,
            },
            ResolutionStep::HostByMac => {
                if lookup.host.is_none() {
                    if let Some(mac) = lookup.mac.as_deref() {
                        lookup.host = self.hosts.by_mac(mac).await?;
                    }
                }
                None
            }
            ResolutionStep::OverrideByHost => lookup
                .host
                .as_ref()
                .and_then(|host| self.overrides.resolve_by_host(host))
                .map(|p| (p, ProfileSource::Override)),
            ResolutionStep::ProfileByHostMacs => {
                let Some(host) = lookup.host.as_ref() else {
                    return Ok(None);
                };
                let mut found = None;
                for raw in host.mac_addresses() {
                    if let Ok(Some(mac)) = normalize_mac(raw) {
                        if let Some(profile) = self.profiles.by_mac(&mac).await? {
                            found = Some((profile, ProfileSource::Persisted));
                            break;
                        }
                    }
                }
                found
            }
            ResolutionStep::ProfileByHostAddress => match lookup.host.as_ref() {
                Some(host) => self
                    .profiles
                    .by_ip(&host.management_address)
                    .await?
                    .map(|p| (p, ProfileSource::Persisted)),
                None => None,
            },
            ResolutionStep::SynthesizedDefault => self
                .defaults
                .synthesize(lookup.host.as_ref(), lookup.mac.as_deref())
                .map(|p| (p, ProfileSource::Default)),
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{HOST_CACHE_TTL, PROFILE_CACHE_TTL};
    use crate::error::PxeError;
    use crate::overrides::ProfileOverride;
    use provisioning_store::{ImageMetadata, MockStore, ProvisioningMechanism};

    const MAC: &str = "aa:bb:cc:dd:ee:ff";

    fn resolver(store: &MockStore, default_image: &str) -> ProfileResolver {
        let defaults = ProfileDefaults {
            image_name: default_image.to_string(),
            ..Default::default()
        };
        let shared = Arc::new(store.clone());
        ProfileResolver::new(
            Arc::new(HostCache::new(shared.clone(), HOST_CACHE_TTL)),
            Arc::new(ProfileCache::new(shared.clone(), PROFILE_CACHE_TTL)),
            Arc::new(OverrideRegistry::new(defaults.clone(), shared)),
            defaults,
        )
    }

    fn seeded_store() -> MockStore {
        let store = MockStore::new();
        store.add_host(HostRecord::new("10.0.0.5", ["AA-BB-CC-DD-EE-FF"]));
        store.add_image(ImageMetadata::new("image-x", ProvisioningMechanism::CloudInit));
        store.add_image(ImageMetadata::new("image-y", ProvisioningMechanism::Kickstart));
        store
    }

    fn persisted(image: &str) -> ProvisioningProfile {
        ProvisioningProfile {
            management_address: Some("10.0.0.5".to_string()),
            image_name: image.to_string(),
            kernel_params: vec!["from-store".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_override_beats_persisted_profile() {
        let store = seeded_store();
        store.add_profile(persisted("image-y"));
        let resolver = resolver(&store, "");
        let host = HostRecord::new("10.0.0.5", [MAC]);

        let patch = ProfileOverride {
            image_name: Some("image-x".to_string()),
            ..Default::default()
        };
        resolver.overrides.apply(&host, &patch).await.unwrap();

        let resolved = resolver.resolve_by_mac(MAC).await.unwrap().unwrap();
        assert_eq!(resolved.source, ProfileSource::Override);
        assert_eq!(resolved.profile.image_name, "image-x");
        // Blank override fields come from the defaults, not the persisted profile
        assert!(resolved.profile.kernel_params.is_empty());
    }

    #[tokio::test]
    async fn test_mac_and_address_resolve_to_same_profile() {
        let store = seeded_store();
        store.add_profile(persisted("image-y"));
        let resolver = resolver(&store, "image-x");

        let by_mac = resolver.resolve_by_mac("AA:BB:CC:DD:EE:FF").await.unwrap().unwrap();
        let by_ip = resolver.resolve_by_address("10.0.0.5").await.unwrap().unwrap();
        assert_eq!(by_mac.profile, by_ip.profile);
        assert_eq!(by_mac.source, ProfileSource::Persisted);
        assert_eq!(by_mac.host.unwrap().management_address, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_profile_by_boot_mac_wins_over_address() {
        let store = seeded_store();
        store.add_profile(persisted("image-y"));
        store.add_profile(ProvisioningProfile {
            boot_mac_address: Some(MAC.to_string()),
            image_name: "image-x".to_string(),
            ..Default::default()
        });
        let resolver = resolver(&store, "");

        let by_mac = resolver.resolve_by_mac(MAC).await.unwrap().unwrap();
        assert_eq!(by_mac.profile.image_name, "image-x");
        let by_host = resolver.resolve_by_address("10.0.0.5").await.unwrap().unwrap();
        assert_eq!(by_host.profile.image_name, "image-x");
    }

    #[tokio::test]
    async fn test_default_profile_is_stamped() {
        let store = seeded_store();
        let resolver = resolver(&store, "image-x");

        let known = resolver.resolve_by_mac(MAC).await.unwrap().unwrap();
        assert_eq!(known.source, ProfileSource::Default);
        assert_eq!(known.profile.management_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(known.profile.boot_mac_address.as_deref(), Some(MAC));

        let stranger = resolver.resolve_by_mac("11-22-33-44-55-66").await.unwrap().unwrap();
        assert!(stranger.host.is_none());
        assert_eq!(stranger.profile.boot_mac_address.as_deref(), Some("11:22:33:44:55:66"));
    }

    #[tokio::test]
    async fn test_no_default_image_declines() {
        let store = seeded_store();
        let resolver = resolver(&store, "");
        assert!(resolver.resolve_by_mac("11:22:33:44:55:66").await.unwrap().is_none());
        assert!(resolver.resolve_by_mac(MAC).await.unwrap().is_none());
        assert!(resolver.resolve_by_slug("unknown").await.unwrap().is_none());
        assert!(resolver.resolve_by_mac("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_address_and_slug_misses() {
        let store = seeded_store();
        let resolver = resolver(&store, "image-x");

        assert!(resolver.resolve_by_address("10.9.9.9").await.unwrap().is_none());

        let by_slug = resolver.resolve_by_slug("10-0-0-5").await.unwrap().unwrap();
        assert_eq!(by_slug.profile.management_address.as_deref(), Some("10.0.0.5"));

        let anonymous = resolver.resolve_by_slug("10-9-9-9").await.unwrap().unwrap();
        assert!(anonymous.host.is_none());
        assert_eq!(anonymous.profile.management_address, None);
        assert_eq!(anonymous.profile.image_name, "image-x");
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let store = seeded_store();
        let resolver = resolver(&store, "image-x");
        assert!(matches!(resolver.resolve_by_mac("not-a-mac").await, Err(PxeError::InvalidMac(_))));

        store.set_unavailable(true);
        assert!(matches!(resolver.resolve_by_mac(MAC).await, Err(PxeError::Store(_))));
    }
}
