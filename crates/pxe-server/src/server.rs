//! Service wiring and lifecycle
//!
//! [`PxeServer`] builds the shared state once (caches, override registry,
//! resolver, renderer, lease store) and runs the TFTP, HTTP and DHCP
//! listeners on top of it as independent tasks.

use crate::api::AdminApi;
use crate::artifacts::ArtifactService;
use crate::cache::{HostCache, ProfileCache};
use crate::config::PxeConfig;
use crate::dhcp::{bind_socket, DhcpResponder, DhcpSettings};
use crate::error::{PxeError, Result};
use crate::http::{self, HttpState};
use crate::installer::TemplateDefaults;
use crate::lease::LeaseStore;
use crate::overrides::OverrideRegistry;
use crate::resolver::ProfileResolver;
use crate::startup;
use crate::template::TemplateRenderer;
use crate::tftp::{TftpFiles, TftpServer};
use provisioning_store::{ImageCatalog, InventoryStore, ProfileStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The collaborators the service reads from
#[derive(Clone)]
pub struct Stores {
    pub inventory: Arc<dyn InventoryStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub images: Arc<dyn ImageCatalog>,
}

impl Stores {
    /// One store backing all three collaborator roles.
    pub fn shared<S>(store: S) -> Self
    where
        S: InventoryStore + ProfileStore + ImageCatalog + 'static,
    {
        let store = Arc::new(store);
        Self {
            inventory: store.clone(),
            profiles: store.clone(),
            images: store,
        }
    }
}

/// Addresses the listeners actually bound; `None` for disabled listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundAddresses {
    pub tftp: Option<SocketAddr>,
    pub http: Option<SocketAddr>,
    pub dhcp: Option<SocketAddr>,
}

/// Network-boot orchestration service.
pub struct PxeServer {
    config: PxeConfig,
    resolver: Arc<ProfileResolver>,
    artifacts: Arc<ArtifactService>,
    overrides: Arc<OverrideRegistry>,
    leases: Arc<LeaseStore>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PxeServer {
    /// Validate `config` and build the shared state.
    ///
    /// Fails on invalid configuration or unreadable installer defaults.
    /// Missing Syslinux assets, an empty image catalog and alias failures
    /// are only logged.
    pub async fn new(mut config: PxeConfig, stores: Stores) -> Result<Self> {
        config.validate()?;

        if config.defaults.image_name.trim().is_empty() {
            match startup::pick_default_image(stores.images.as_ref()).await {
                Ok(Some(image)) => {
                    warn!(image = %image, "No default image configured, using the first catalog image");
                    config.defaults.image_name = image;
                }
                Ok(None) => warn!("Image catalog is empty; machines need an explicit profile or override"),
                Err(e) => warn!(error = %e, "Cannot list images to pick a default"),
            }
        }

        let template_defaults = TemplateDefaults::load(config.installer_config.as_deref())?;
        let renderer = TemplateRenderer::new(
            config.templates_directory.clone(),
            config.http_base_url()?,
            config.dhcp.dns_servers.clone(),
            template_defaults,
        );

        let hosts = Arc::new(HostCache::new(stores.inventory.clone(), config.cache.host_ttl()));
        let profiles = Arc::new(ProfileCache::new(stores.profiles.clone(), config.cache.profile_ttl()));
        let overrides = Arc::new(OverrideRegistry::new(config.defaults.clone(), stores.images.clone()));
        let resolver = Arc::new(ProfileResolver::new(
            hosts,
            profiles,
            overrides.clone(),
            config.defaults.clone(),
        ));
        let artifacts = Arc::new(ArtifactService::new(
            resolver.clone(),
            stores.images.clone(),
            Arc::new(renderer),
        ));

        startup::validate_syslinux_assets(&config.tftp.directory);
        Self::link_artifacts(&config, stores.images.as_ref()).await;

        let (shutdown, _) = watch::channel(false);
        info!(
            default_image = %config.defaults.image_name,
            proxy_mode = config.dhcp.proxy_mode,
            "PXE service initialized"
        );
        Ok(Self {
            config,
            resolver,
            artifacts,
            overrides,
            leases: Arc::new(LeaseStore::new()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    async fn link_artifacts(config: &PxeConfig, images: &dyn ImageCatalog) {
        let images = match images.list_images().await {
            Ok(images) => images,
            Err(e) => {
                warn!(error = %e, "Cannot list images for artifact aliases");
                return;
            }
        };

        let mut roots: Vec<PathBuf> = vec![config.tftp.directory.clone()];
        if config.http_root() != config.tftp.directory.as_path() {
            roots.push(config.http_root().to_path_buf());
        }
        for root in roots {
            if let Err(e) = startup::ensure_artifact_aliases(&root, &images).await {
                warn!(root = %root.display(), error = %e, "Cannot create artifact aliases");
            }
        }
    }

    /// Handle for the administrative override API
    pub fn admin(&self) -> AdminApi {
        AdminApi::new(self.overrides.clone())
    }

    pub fn leases(&self) -> &Arc<LeaseStore> {
        &self.leases
    }

    pub fn resolver(&self) -> &Arc<ProfileResolver> {
        &self.resolver
    }

    /// Bind and spawn every configured listener: TFTP, then HTTP, then DHCP.
    ///
    /// A bind failure is returned before any later listener starts; listeners
    /// already running keep running until [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<BoundAddresses> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(PxeError::Configuration("service already started".to_string()));
        }
        let mut bound = BoundAddresses::default();

        if let Some(addr) = self.config.tftp_listen_addr()? {
            let files = TftpFiles::new(
                self.config.tftp.directory.clone(),
                self.artifacts.clone(),
                self.leases.clone(),
            );
            let server = TftpServer::bind(addr, files).await?;
            bound.tftp = Some(server.local_addr());

            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve(shutdown).await {
                    error!(error = %e, "TFTP responder stopped");
                }
            }));
        }

        if let Some(addr) = self.config.http_listen_addr()? {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| PxeError::BindFailed { addr, source })?;
            bound.http = Some(listener.local_addr()?);

            let router = http::router(Arc::new(HttpState {
                artifacts: self.artifacts.clone(),
                root: self.config.http_root().to_path_buf(),
            }));
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = http::serve(router, listener, shutdown).await {
                    error!(error = %e, "HTTP responder stopped");
                }
            }));
        }

        if let Some(addr) = self.config.dhcp_listen_addr()? {
            let socket = bind_socket(addr)?;
            bound.dhcp = Some(socket.local_addr()?);

            let responder = Arc::new(DhcpResponder::new(
                DhcpSettings::from_config(&self.config),
                self.resolver.clone(),
                self.leases.clone(),
                self.config.address_pool()?,
            ));
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = responder.serve(socket, shutdown).await {
                    error!(error = %e, "DHCP responder stopped");
                }
            }));
        }

        info!(
            tftp = ?bound.tftp,
            http = ?bound.http,
            dhcp = ?bound.dhcp,
            "PXE service started"
        );
        Ok(bound)
    }

    /// Stop the listeners and wait for them to exit. Transfers and requests
    /// already in flight finish on their own tasks.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down PXE service");
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Listener task panicked");
            }
        }
        info!("PXE service stopped");
        Ok(())
    }
}
