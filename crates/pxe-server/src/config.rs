//! Service configuration
//!
//! One YAML document describes every listener, the DHCP addressing plan, the
//! synthesized default profile and the cache lifetimes. Every field has a
//! default, so an empty document is a TFTP+HTTP+DHCP service on the standard
//! ports that declines every machine until a default image is set.

use crate::error::{PxeError, Result};
use crate::identity::normalize_mac;
use crate::lease::AddressPool;
use provisioning_store::{HostRecord, ProvisioningProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PxeConfig {
    pub dhcp: DhcpConfig,
    pub tftp: TftpConfig,
    pub http: HttpConfig,
    /// Profile synthesized for machines with no override or persisted profile
    pub defaults: ProfileDefaults,
    pub cache: CacheConfig,
    /// Installer defaults YAML; built-in defaults when unset
    pub installer_config: Option<PathBuf>,
    /// Directory overriding the embedded templates
    pub templates_directory: Option<PathBuf>,
    /// YAML document read by the file-backed store
    pub inventory_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhcpConfig {
    /// Listen address (`0.0.0.0:67` or `:67`); empty disables DHCP
    pub address: String,
    /// Address clients should reach this host on
    pub server_public_address: Option<Ipv4Addr>,
    /// Only hand out boot parameters, never leases
    pub proxy_mode: bool,
    pub ip_range_start: Option<Ipv4Addr>,
    pub ip_range_end: Option<Ipv4Addr>,
    pub lease_seconds: u32,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    /// Bootfile offered when the profile names none
    pub default_boot_filename: String,
    /// Port non-relayed replies are sent to
    pub client_port: u16,
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:67".to_string(),
            server_public_address: None,
            proxy_mode: false,
            ip_range_start: None,
            ip_range_end: None,
            lease_seconds: 7200,
            subnet_mask: None,
            router: None,
            dns_servers: Vec::new(),
            domain_name: None,
            default_boot_filename: "pxelinux.0".to_string(),
            client_port: 68,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TftpConfig {
    pub address: String,
    pub directory: PathBuf,
}

impl Default for TftpConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:69".to_string(),
            directory: PathBuf::from("/var/lib/tftpboot"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub address: String,
    /// Static root; the TFTP directory when unset
    pub directory: Option<PathBuf>,
    /// Externally reachable base URL used in rendered artifacts
    pub public_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8069".to_string(),
            directory: None,
            public_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host_ttl_seconds: u64,
    pub profile_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host_ttl_seconds: 30,
            profile_ttl_seconds: 15,
        }
    }
}

impl CacheConfig {
    pub fn host_ttl(&self) -> Duration {
        Duration::from_secs(self.host_ttl_seconds)
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_seconds)
    }
}

/// Configuration-supplied default profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDefaults {
    /// Image booted by machines with no profile; blank means decline them
    pub image_name: String,
    pub boot_filename: Option<String>,
    pub kernel_params: Vec<String>,
    pub initrd_params: Vec<String>,
    pub template_data: BTreeMap<String, String>,
    pub domain_name: Option<String>,
}

impl ProfileDefaults {
    /// Fresh profile built from the defaults and stamped with the known
    /// identity. The boot MAC is `mac`, else the host's first valid MAC.
    pub fn base_profile(&self, host: Option<&HostRecord>, mac: Option<&str>) -> ProvisioningProfile {
        let boot_mac = mac.map(str::to_string).or_else(|| {
            host.and_then(|h| h.mac_addresses().find_map(|raw| normalize_mac(raw).ok().flatten()))
        });
        ProvisioningProfile {
            management_address: host
                .map(|h| h.management_address.trim().to_string())
                .filter(|addr| !addr.is_empty()),
            boot_mac_address: boot_mac,
            image_name: self.image_name.trim().to_string(),
            boot_filename: self.boot_filename.clone(),
            kernel_params: self.kernel_params.clone(),
            initrd_params: self.initrd_params.clone(),
            template_data: self.template_data.clone(),
            domain_name: self.domain_name.clone(),
            ..ProvisioningProfile::default()
        }
    }

    /// Synthesized default profile, or `None` when no default image is set.
    pub fn synthesize(&self, host: Option<&HostRecord>, mac: Option<&str>) -> Option<ProvisioningProfile> {
        if self.image_name.trim().is_empty() {
            return None;
        }
        Some(self.base_profile(host, mac))
    }
}

/// Parse a listen address; `:port` binds every interface, empty disables.
pub fn parse_listen_addr(raw: &str) -> Result<Option<SocketAddr>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let full = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    full.parse()
        .map(Some)
        .map_err(|_| PxeError::Configuration(format!("invalid listen address: {raw}")))
}

impl PxeConfig {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PxeError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: PxeConfig = if raw.trim().is_empty() {
            PxeConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup checks. Failures are fatal.
    pub fn validate(&self) -> Result<()> {
        let listeners = [
            self.dhcp_listen_addr()?,
            self.tftp_listen_addr()?,
            self.http_listen_addr()?,
        ];
        if listeners.iter().all(Option::is_none) {
            return Err(PxeError::Configuration(
                "no DHCP, TFTP or HTTP listen address configured".to_string(),
            ));
        }

        if self.tftp.directory.as_os_str().is_empty() {
            return Err(PxeError::Configuration("tftp.directory must be set".to_string()));
        }

        if self.dhcp.lease_seconds == 0 {
            return Err(PxeError::Configuration("dhcp.lease_seconds must be positive".to_string()));
        }

        if !self.dhcp.proxy_mode {
            self.address_pool()?;
        }
        Ok(())
    }

    pub fn dhcp_listen_addr(&self) -> Result<Option<SocketAddr>> {
        parse_listen_addr(&self.dhcp.address)
    }

    pub fn tftp_listen_addr(&self) -> Result<Option<SocketAddr>> {
        parse_listen_addr(&self.tftp.address)
    }

    pub fn http_listen_addr(&self) -> Result<Option<SocketAddr>> {
        parse_listen_addr(&self.http.address)
    }

    /// Static root served over HTTP
    pub fn http_root(&self) -> &Path {
        match &self.http.directory {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => &self.tftp.directory,
        }
    }

    /// Dynamic address pool, `None` when no range is configured.
    pub fn address_pool(&self) -> Result<Option<AddressPool>> {
        match (self.dhcp.ip_range_start, self.dhcp.ip_range_end) {
            (Some(start), Some(end)) => AddressPool::new(start, end).map(Some),
            (None, None) => Ok(None),
            _ => Err(PxeError::Configuration(
                "dhcp.ip_range_start and dhcp.ip_range_end must be set together".to_string(),
            )),
        }
    }

    /// Base URL installers fetch artifacts from, without a trailing slash.
    ///
    /// A configured server public address wins over `http.public_url`.
    pub fn http_base_url(&self) -> Result<String> {
        let configured = self.http.public_url.trim().trim_end_matches('/').to_string();
        let Some(ip) = self.dhcp.server_public_address else {
            return Ok(configured);
        };

        let port = self.http_listen_addr()?.map_or(80, |addr| addr.port());
        let derived = if port == 80 {
            format!("http://{ip}")
        } else {
            format!("http://{ip}:{port}")
        };
        if !configured.is_empty() && configured != derived {
            warn!(
                public_url = %configured,
                derived = %derived,
                "Overriding http.public_url with the server public address"
            );
        }
        Ok(derived)
    }

    /// DHCP server identifier and default next-server address.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        if let Some(ip) = self.dhcp.server_public_address {
            return Some(ip);
        }
        match self.dhcp_listen_addr().ok().flatten()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PxeConfig::from_yaml("").unwrap();
        assert_eq!(config.dhcp_listen_addr().unwrap(), Some("0.0.0.0:67".parse().unwrap()));
        assert_eq!(config.tftp.directory, PathBuf::from("/var/lib/tftpboot"));
        assert_eq!(config.http_root(), Path::new("/var/lib/tftpboot"));
        assert_eq!(config.dhcp.lease_seconds, 7200);
        assert_eq!(config.dhcp.default_boot_filename, "pxelinux.0");
        assert_eq!(config.cache.host_ttl(), Duration::from_secs(30));
        assert_eq!(config.cache.profile_ttl(), Duration::from_secs(15));
        assert!(config.defaults.synthesize(None, None).is_none());
    }

    #[test]
    fn test_full_document() {
        let config = PxeConfig::from_yaml(
            r#"
dhcp:
  address: ":67"
  server_public_address: 10.0.0.1
  ip_range_start: 10.0.0.100
  ip_range_end: 10.0.0.200
  subnet_mask: 255.255.255.0
  router: 10.0.0.1
  dns_servers: [10.0.0.2]
tftp:
  directory: /srv/tftp
http:
  address: ":8080"
  directory: /srv/http
defaults:
  image_name: ubuntu-24.04
  kernel_params: [console=ttyS0]
cache:
  host_ttl_seconds: 5
"#,
        )
        .unwrap();

        assert_eq!(config.http_root(), Path::new("/srv/http"));
        assert_eq!(config.http_base_url().unwrap(), "http://10.0.0.1:8080");
        assert_eq!(config.server_identifier(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(config.cache.host_ttl(), Duration::from_secs(5));
        assert_eq!(config.cache.profile_ttl(), Duration::from_secs(15));
        let pool = config.address_pool().unwrap().unwrap();
        assert!(pool.contains(Ipv4Addr::new(10, 0, 0, 150)));
    }

    #[test]
    fn test_validation_failures() {
        let no_listeners = "dhcp: {address: ''}\ntftp: {address: ''}\nhttp: {address: ''}";
        assert!(matches!(PxeConfig::from_yaml(no_listeners), Err(PxeError::Configuration(_))));

        let half_range = "dhcp: {ip_range_start: 10.0.0.10}";
        assert!(matches!(PxeConfig::from_yaml(half_range), Err(PxeError::Configuration(_))));

        let inverted = "dhcp: {ip_range_start: 10.0.0.20, ip_range_end: 10.0.0.10}";
        assert!(matches!(PxeConfig::from_yaml(inverted), Err(PxeError::Configuration(_))));

        // A proxy never allocates, so its range is not checked
        let proxy = "dhcp: {proxy_mode: true, ip_range_start: 10.0.0.10}";
        assert!(PxeConfig::from_yaml(proxy).is_ok());

        assert!(matches!(PxeConfig::from_yaml("tftp: {address: 'nope'}"), Err(PxeError::Configuration(_))));
        assert!(matches!(PxeConfig::from_yaml("dhcp: {router: not-an-ip}"), Err(PxeError::Serialization(_))));
    }

    #[test]
    fn test_base_url_derivation() {
        let mut config = PxeConfig::default();
        config.http.public_url = "http://pxe.lab:8069/".to_string();
        assert_eq!(config.http_base_url().unwrap(), "http://pxe.lab:8069");

        config.dhcp.server_public_address = Some(Ipv4Addr::new(192, 168, 1, 2));
        config.http.address = "0.0.0.0:80".to_string();
        assert_eq!(config.http_base_url().unwrap(), "http://192.168.1.2");

        config.http.address = String::new();
        assert_eq!(config.http_base_url().unwrap(), "http://192.168.1.2");
    }

    #[test]
    fn test_server_identifier_from_listen_address() {
        let mut config = PxeConfig::default();
        assert_eq!(config.server_identifier(), None);
        config.dhcp.address = "10.0.0.1:67".to_string();
        assert_eq!(config.server_identifier(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_default_profile_stamping() {
        let defaults = ProfileDefaults {
            image_name: " ubuntu-24.04 ".to_string(),
            kernel_params: vec!["console=ttyS0".to_string()],
            ..Default::default()
        };
        let host = HostRecord::new("10.0.0.5", ["bogus", "AA-BB-CC-DD-EE-FF"]);

        let profile = defaults.synthesize(Some(&host), None).unwrap();
        assert_eq!(profile.image_name, "ubuntu-24.04");
        assert_eq!(profile.management_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(profile.boot_mac_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(profile.kernel_params, vec!["console=ttyS0"]);

        let by_mac = defaults.synthesize(None, Some("11:22:33:44:55:66")).unwrap();
        assert_eq!(by_mac.management_address, None);
        assert_eq!(by_mac.boot_mac_address.as_deref(), Some("11:22:33:44:55:66"));
    }
}
