//! Shared fixtures for the loopback integration tests

#![allow(dead_code, reason = "each test binary uses a different subset")]

use provisioning_store::{HostRecord, ImageMetadata, MockStore, ProvisioningMechanism, ProvisioningProfile};
use pxe_server::PxeConfig;
use std::path::Path;

pub const HOST_MAC: &str = "aa:bb:cc:dd:ee:ff";
pub const HOST_MAC_BYTES: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

/// One host at 10.0.0.5 with a persisted cloud-init profile.
pub fn seeded_store() -> MockStore {
    let store = MockStore::new();
    store.add_host(HostRecord::new("10.0.0.5", [HOST_MAC]));
    store.add_profile(ProvisioningProfile {
        management_address: Some("10.0.0.5".to_string()),
        image_name: "ubuntu-24.04".to_string(),
        ..Default::default()
    });
    store.add_image(ImageMetadata::new("ubuntu-24.04", ProvisioningMechanism::CloudInit));
    store
}

/// Every listener disabled; tests enable what they exercise on loopback.
pub fn loopback_config(root: &Path) -> PxeConfig {
    let mut config = PxeConfig::default();
    config.dhcp.address = String::new();
    config.tftp.address = String::new();
    config.tftp.directory = root.to_path_buf();
    config.http.address = String::new();
    config
}
