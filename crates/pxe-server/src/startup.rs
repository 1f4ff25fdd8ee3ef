//! One-off checks and fix-ups run before the listeners start.
//!
//! None of these are fatal; problems are logged and the service starts anyway.

use crate::error::Result;
use crate::identity::artifact_dir_name;
use provisioning_store::{ImageCatalog, ImageMetadata};
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Files PXELinux fetches before it asks for its configuration
pub const SYSLINUX_ASSETS: [&str; 2] = ["pxelinux.0", "ldlinux.c32"];

/// Alphabetically first catalog image, used when no default image is set.
pub async fn pick_default_image(images: &dyn ImageCatalog) -> Result<Option<String>> {
    let mut names: Vec<String> = images
        .list_images()
        .await?
        .into_iter()
        .map(|image| image.name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    Ok(names.into_iter().next())
}

/// Warn about missing Syslinux assets under the TFTP root. Returns what is missing.
pub fn validate_syslinux_assets(tftp_root: &Path) -> Vec<String> {
    let mut missing = Vec::new();
    for name in SYSLINUX_ASSETS {
        let path = tftp_root.join(name);
        match std::fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Syslinux asset missing");
                missing.push(name.to_string());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot stat Syslinux asset"),
        }
    }

    let config_dir = tftp_root.join("pxelinux.cfg");
    if !config_dir.is_dir() {
        warn!(
            path = %config_dir.display(),
            "pxelinux.cfg directory missing; pxelinux may give up before requesting its config"
        );
        missing.push("pxelinux.cfg/".to_string());
    }
    missing
}

#[cfg(unix)]
async fn link(actual: &Path, alias: &Path) -> io::Result<()> {
    tokio::fs::symlink(actual, alias).await
}

#[cfg(not(unix))]
async fn link(_actual: &Path, _alias: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are unix-only"))
}

/// Link `artifacts/<artifact_dir_name>` to `artifacts/<image name>` under
/// `root` for every image whose payload directory exists. Existing aliases
/// are left alone. Returns how many links were created.
pub async fn ensure_artifact_aliases(root: &Path, images: &[ImageMetadata]) -> Result<usize> {
    let artifacts = root.join("artifacts");
    let mut created = 0;
    for image in images {
        let name = image.name.trim();
        if name.is_empty() {
            continue;
        }
        let dir_name = artifact_dir_name(name);
        if dir_name == name {
            continue;
        }

        let actual = artifacts.join(name);
        let alias = artifacts.join(&dir_name);
        if tokio::fs::metadata(&actual).await.is_err() {
            continue;
        }
        if tokio::fs::symlink_metadata(&alias).await.is_ok() {
            continue;
        }

        match link(&actual, &alias).await {
            Ok(()) => {
                info!(alias = %alias.display(), target = %actual.display(), "Created artifact alias");
                created += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(created)
}
