//! Profile-scoped artifacts shared by the TFTP and HTTP responders.
//!
//! `profiles/<slug>/<category>[/<file>]` resolves the slug to a profile,
//! the profile to an image, and renders the requested seed document.
//! PXELinux configuration names are resolved by MAC, hex IP or requester.

use crate::error::{PxeError, Result};
use crate::identity::{decode_pxelinux_hex_ip, normalize_mac};
use crate::resolver::{ProfileResolver, Resolution};
use crate::template::{TemplateKey, TemplateRenderer};
use provisioning_store::{ImageCatalog, ImageMetadata};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const PROFILES_PREFIX: &str = "profiles/";

/// Served for every vendor-data request
pub const VENDOR_DATA: &[u8] = b"#cloud-config\n{}";

/// Seed documents addressable under a profile slug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileArtifact {
    UserData,
    MetaData,
    VendorData,
    Kickstart,
}

impl ProfileArtifact {
    /// Parse `<category>[/<file>]`. Unknown names are a miss.
    pub fn parse(category: &str, file: &str) -> Result<Self> {
        let category = category.to_lowercase();
        let file = file.trim_matches('/').to_lowercase();
        match (category.as_str(), file.as_str()) {
            ("cloud-init", "user-data") | ("user-data", _) => Ok(ProfileArtifact::UserData),
            ("cloud-init", "meta-data") | ("meta-data", _) => Ok(ProfileArtifact::MetaData),
            ("cloud-init", "vendor-data") | ("vendor-data", _) => Ok(ProfileArtifact::VendorData),
            ("kickstart", "" | "ks.cfg") => Ok(ProfileArtifact::Kickstart),
            ("cloud-init", other) => Err(PxeError::NotFound(format!("unknown cloud-init artifact {other}"))),
            ("kickstart", other) => Err(PxeError::NotFound(format!("unknown kickstart artifact {other}"))),
            (other, _) => Err(PxeError::NotFound(format!("unknown profile artifact {other}"))),
        }
    }
}

/// A `pxelinux.cfg/<name>` request, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PxeLinuxName {
    /// `01-aa-bb-cc-dd-ee-ff`
    Mac(String),
    /// `0A000005`
    HexIp(Ipv4Addr),
    /// `default` or anything unrecognized
    Fallback,
}

impl PxeLinuxName {
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim_matches('/').to_lowercase();
        if let Some(mac) = name.strip_prefix("01-").filter(|rest| !rest.is_empty()) {
            return match normalize_mac(mac)? {
                Some(mac) => Ok(PxeLinuxName::Mac(mac)),
                None => Ok(PxeLinuxName::Fallback),
            };
        }
        if let Some(ip) = decode_pxelinux_hex_ip(&name) {
            return Ok(PxeLinuxName::HexIp(ip));
        }
        Ok(PxeLinuxName::Fallback)
    }
}

/// What we know about the machine behind a TFTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub mac: Option<String>,
    pub ip: Option<Ipv4Addr>,
}

/// Renders profile artifacts for TFTP and HTTP.
pub struct ArtifactService {
    resolver: Arc<ProfileResolver>,
    images: Arc<dyn ImageCatalog>,
    renderer: Arc<TemplateRenderer>,
}

impl std::fmt::Debug for ArtifactService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactService").finish_non_exhaustive()
    }
}

impl ArtifactService {
    pub fn new(
        resolver: Arc<ProfileResolver>,
        images: Arc<dyn ImageCatalog>,
        renderer: Arc<TemplateRenderer>,
    ) -> Self {
        Self {
            resolver,
            images,
            renderer,
        }
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.resolver
    }

    async fn image_for(&self, resolution: &Resolution) -> Result<ImageMetadata> {
        let name = &resolution.profile.image_name;
        self.images
            .lookup_image(name)
            .await?
            .ok_or_else(|| PxeError::NotFound(format!("image {name} not found")))
    }

    async fn render(&self, resolution: Resolution, key: TemplateKey) -> Result<Vec<u8>> {
        let image = self.image_for(&resolution).await?;
        let ctx = self
            .renderer
            .context(resolution.host.as_ref(), &resolution.profile, &image);
        let data = self.renderer.render(key, &ctx)?;
        info!(
            template = key.as_str(),
            slug = %ctx.identifiers.slug,
            image = %image.name,
            bytes = data.len(),
            "Rendered boot artifact"
        );
        Ok(data)
    }

    /// Serve `profiles/<slug>/<category>[/<file>]` (leading `/` optional).
    pub async fn profile_file(&self, path: &str) -> Result<Vec<u8>> {
        let parts: Vec<&str> = path.trim_start_matches('/').splitn(4, '/').collect();
        if parts.len() < 3 || !parts[0].eq_ignore_ascii_case("profiles") {
            return Err(PxeError::NotFound(format!("invalid profile path {path}")));
        }
        let slug = parts[1].to_lowercase();
        let file = parts.get(3).copied().unwrap_or_default();

        let resolution = self
            .resolver
            .resolve_by_slug(&slug)
            .await?
            .ok_or_else(|| PxeError::NotFound(format!("no profile available for slug {slug}")))?;

        match ProfileArtifact::parse(parts[2], file)? {
            ProfileArtifact::UserData => self.render(resolution, TemplateKey::CloudInitUserData).await,
            ProfileArtifact::MetaData => self.render(resolution, TemplateKey::CloudInitMetaData).await,
            ProfileArtifact::Kickstart => self.render(resolution, TemplateKey::Kickstart).await,
            ProfileArtifact::VendorData => {
                // Still a miss when the profile's image is gone
                self.image_for(&resolution).await?;
                Ok(VENDOR_DATA.to_vec())
            }
        }
    }

    /// Render `pxelinux.cfg/<name>` for the requesting machine.
    ///
    /// MAC identity outranks IP identity. A name that identifies nobody is a
    /// miss, so no machine is handed another machine's boot config.
    pub async fn pxelinux_config(&self, name: &str, requester: &Requester) -> Result<Vec<u8>> {
        let resolution = match PxeLinuxName::parse(name)? {
            PxeLinuxName::Mac(mac) => self.resolver.resolve_by_mac(&mac).await?,
            PxeLinuxName::HexIp(ip) => self.resolver.resolve_by_address(&ip.to_string()).await?,
            PxeLinuxName::Fallback => match (&requester.mac, requester.ip) {
                (Some(mac), _) => self.resolver.resolve_by_mac(mac).await?,
                (None, Some(ip)) => self.resolver.resolve_by_address(&ip.to_string()).await?,
                (None, None) => None,
            },
        };
        let resolution = resolution.ok_or_else(|| {
            debug!(name, requester = ?requester, "No profile for pxelinux config");
            PxeError::NotFound(format!("no PXE profile available for pxelinux.cfg/{name}"))
        })?;
        self.render(resolution, TemplateKey::PxeLinux).await
    }
}

/// Whether `path` addresses a profile artifact. The prefix is matched
/// without regard to case and the leading `/` is optional.
pub fn is_profile_path(path: &str) -> bool {
    path.trim_start_matches('/')
        .get(..PROFILES_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(PROFILES_PREFIX))
}

/// Resolve `relative` under `root`, refusing parent-directory segments.
pub fn static_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = relative.trim_start_matches(['/', '\\']);
    if relative.is_empty() {
        return Err(PxeError::NotFound("empty path".to_string()));
    }
    if relative.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(PxeError::NotFound(format!("invalid path {relative}")));
    }
    Ok(root.join(relative))
}
