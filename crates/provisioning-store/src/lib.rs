//! Provisioning Store
//!
//! Collaborator surface consumed by the PXE orchestrator: the host inventory,
//! persisted provisioning profiles, and OS image metadata.
//!
//! # Example
//!
//! ```no_run
//! use provisioning_store::{FileStore, InventoryStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileStore::new("/etc/pxe-orchestrator/inventory.yaml");
//! for host in store.list_hosts().await? {
//!     println!("{} has {} interfaces", host.management_address, host.interfaces.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Models**: hosts, interfaces, profiles, images
//! - **Traits**: `InventoryStore`, `ProfileStore`, `ImageCatalog`
//! - **File store**: YAML document re-read on every call
//! - **Mock store** (`test-util`): in-memory, with failure injection

pub mod error;
pub mod file;
pub mod models;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use error::StoreError;
pub use file::{FileStore, StoreDocument};
pub use models::*;
pub use store_trait::{ImageCatalog, InventoryStore, ProfileStore};
#[cfg(feature = "test-util")]
pub use mock::MockStore;
