//! PXE Orchestrator
//!
//! Answers PXE-booting machines with the boot files, PXELinux configuration
//! and installer seeds for their provisioning profile.
//!
//! Configuration is read from the YAML file named by `PXE_CONFIG`
//! (default `/etc/pxe-orchestrator/config.yaml`); hosts, profiles and images
//! come from the YAML store named by its `inventory_file`.

use anyhow::{Context, Result};
use provisioning_store::FileStore;
use pxe_server::{PxeConfig, PxeServer, Stores};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/pxe-orchestrator/config.yaml";
const DEFAULT_INVENTORY_PATH: &str = "/etc/pxe-orchestrator/inventory.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting PXE Orchestrator");

    let config_path = env::var("PXE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = PxeConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let inventory = config.inventory_file.clone().unwrap_or_else(|| {
        warn!(path = DEFAULT_INVENTORY_PATH, "No inventory_file configured, using the default path");
        PathBuf::from(DEFAULT_INVENTORY_PATH)
    });
    info!("Configuration:");
    info!("  Config file: {}", config_path);
    info!("  Inventory: {}", inventory.display());
    info!("  TFTP root: {}", config.tftp.directory.display());

    let store = FileStore::new(inventory);
    let server = PxeServer::new(config, Stores::shared(store))
        .await
        .context("initializing PXE service")?;
    server.start().await.context("starting listeners")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    server.shutdown().await.context("shutting down")?;
    Ok(())
}
