//! PXE Boot Server
//!
//! Network-boot orchestration: machines that PXE-boot are matched to a
//! provisioning profile and handed everything they need to install.
//!
//! This server provides:
//! - DHCP (full or proxy) replies with a per-machine boot file and next-server
//! - TFTP server for Syslinux assets and per-machine `pxelinux.cfg` files
//! - HTTP server for kernels, images and rendered cloud-init / kickstart files
//! - An administrative API for temporary per-MAC profile overrides
//!
//! # Resolution
//!
//! Every request is resolved, in order, against an override registered
//! through [`AdminApi`], a persisted profile, and finally a default profile
//! synthesized from configuration. A machine with none of these is declined.
//!
//! # Example
//!
//! ```no_run
//! use provisioning_store::FileStore;
//! use pxe_server::{PxeConfig, PxeServer, Stores};
//!
//! # async fn example() -> pxe_server::Result<()> {
//! let config = PxeConfig::load("/etc/pxe-orchestrator/config.yaml")?;
//! let store = FileStore::new("/etc/pxe-orchestrator/inventory.yaml");
//! let server = PxeServer::new(config, Stores::shared(store)).await?;
//! server.start().await?;
//! // ...
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod artifacts;
pub mod cache;
pub mod config;
pub mod dhcp;
pub mod error;
pub mod http;
pub mod identity;
pub mod installer;
pub mod lease;
pub mod overrides;
pub mod resolver;
pub mod server;
pub mod startup;
pub mod template;
pub mod tftp;

pub use api::AdminApi;
pub use config::PxeConfig;
pub use error::{PxeError, Result};
pub use overrides::ProfileOverride;
pub use server::{BoundAddresses, PxeServer, Stores};
