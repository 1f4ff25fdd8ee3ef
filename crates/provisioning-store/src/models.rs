//! Provisioning data model
//!
//! Records owned by the inventory, profile and image collaborators. The PXE
//! core treats them as read-only snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// A physical machine known to the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HostRecord {
    /// Management address, the unique identity of the host
    pub management_address: String,

    /// Network interfaces in inventory order
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
}

impl HostRecord {
    /// Create a host with the given management address and interface MACs
    pub fn new<I, S>(management_address: impl Into<String>, macs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            management_address: management_address.into(),
            interfaces: macs
                .into_iter()
                .map(|mac| NetworkInterface {
                    mac_address: mac.into(),
                    ..NetworkInterface::default()
                })
                .collect(),
        }
    }

    /// Non-blank interface MAC addresses, in interface order
    pub fn mac_addresses(&self) -> impl Iterator<Item = &str> {
        self.interfaces
            .iter()
            .map(|nic| nic.mac_address.trim())
            .filter(|mac| !mac.is_empty())
    }
}

/// A network interface on a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NetworkInterface {
    /// MAC address as recorded by the inventory (any separator convention)
    pub mac_address: String,

    /// Interface name (e.g. `eno1`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Free-form interface metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Network and provisioning parameters bound to a machine or MAC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProvisioningProfile {
    /// Management address of the host this profile belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_address: Option<String>,

    /// MAC address the machine boots from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mac_address: Option<String>,

    /// Name of the OS image to install
    #[serde(default)]
    pub image_name: String,

    /// Bootloader filename handed out over DHCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_filename: Option<String>,

    /// Extra kernel parameters, appended last
    #[serde(default)]
    pub kernel_params: Vec<String>,

    /// Extra initrd parameters
    #[serde(default)]
    pub initrd_params: Vec<String>,

    /// Free-form values exposed to templates
    #[serde(default)]
    pub template_data: BTreeMap<String, String>,

    /// Fixed IPv4 address for the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,

    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,

    /// TFTP next-server address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_server: Option<Ipv4Addr>,
}

/// How an image is configured unattended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningMechanism {
    /// No unattended configuration
    #[default]
    None,
    /// cloud-init / Subiquity autoinstall via NoCloud
    CloudInit,
    /// Anaconda kickstart
    Kickstart,
    /// Debian-installer preseed
    Preseed,
    /// SUSE AutoYaST
    #[serde(rename = "autoyast")]
    AutoYast,
    /// Interactive installer with guided defaults
    GuidedInstaller,
}

/// Distribution family of an image, as classified by the image library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistroFamily {
    #[default]
    Other,
    Debian,
    RedHat,
    Arch,
    Suse,
    Alpine,
    Windows,
}

/// Where an image's boot payloads live in artifact storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoragePaths {
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub initrd: String,
    #[serde(default)]
    pub full_image: String,
}

/// An installable OS image known to the image library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImageMetadata {
    /// Unique image name
    pub name: String,

    #[serde(default)]
    pub storage_paths: StoragePaths,

    #[serde(default)]
    pub mechanism: ProvisioningMechanism,

    #[serde(default)]
    pub distro_family: DistroFamily,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
}

impl ImageMetadata {
    /// Create image metadata with the given name and mechanism
    pub fn new(name: impl Into<String>, mechanism: ProvisioningMechanism) -> Self {
        Self {
            name: name.into(),
            mechanism,
            ..Self::default()
        }
    }
}
