//! TFTP responder
//!
//! Transfers run on `async-tftp`. [`TftpFiles`] is its request handler and
//! decides what a filename means: PXELinux configuration is rendered per
//! machine, `profiles/` paths go to the shared artifact service, everything
//! else is streamed from the TFTP root. Write requests are refused.

use crate::artifacts::{is_profile_path, static_path, ArtifactService, Requester};
use crate::error::{PxeError, Result};
use crate::lease::LeaseStore;
use async_tftp::packet;
use async_tftp::server::{Handler, TftpServerBuilder};
use futures::io::{AsyncRead, AsyncWrite, Cursor};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};

const PXELINUX_DIR: &str = "pxelinux.cfg";

/// Retransmit timeout used for every transfer. Client-requested timeouts
/// are not honored.
pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Retransmissions of one block before a transfer is abandoned
pub const MAX_SEND_RETRIES: u32 = 5;

/// Contents handed to the transfer engine
pub type TftpReader = Box<dyn AsyncRead + Unpin + Send>;

/// Never produced; write requests are refused
pub type TftpWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Resolves TFTP filenames to file contents
#[derive(Clone)]
pub struct TftpFiles {
    root: PathBuf,
    artifacts: Arc<ArtifactService>,
    leases: Arc<LeaseStore>,
}

impl std::fmt::Debug for TftpFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TftpFiles").field("root", &self.root).finish_non_exhaustive()
    }
}

impl TftpFiles {
    /// Serve static files from `root`. The lease store maps a requester's
    /// source address back to its MAC for `pxelinux.cfg/default`.
    pub fn new(root: impl Into<PathBuf>, artifacts: Arc<ArtifactService>, leases: Arc<LeaseStore>) -> Self {
        Self {
            root: root.into(),
            artifacts,
            leases,
        }
    }

    /// Open `filename` as requested by `peer`. Returns a reader over the
    /// contents and their size.
    pub async fn open(&self, filename: &str, peer: SocketAddr) -> Result<(TftpReader, u64)> {
        let name = filename.trim_start_matches('/');
        if name.is_empty() {
            return Err(PxeError::NotFound("empty filename".to_string()));
        }
        if name.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(PxeError::NotFound(format!("invalid path {name}")));
        }

        if let Some(config) = pxelinux_config_name(name) {
            let requester = self.requester(peer);
            debug!(config, requester = ?requester, "PXELinux config request");
            let data = self.artifacts.pxelinux_config(config, &requester).await?;
            return Ok(in_memory(data));
        }

        if is_profile_path(name) {
            let data = self.artifacts.profile_file(name).await?;
            return Ok(in_memory(data));
        }

        let path = static_path(&self.root, name)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PxeError::NotFound(format!("{name} not found")));
            }
            Err(e) => return Err(PxeError::Io(e)),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(PxeError::NotFound(format!("{name} is not a file")));
        }
        Ok((Box::new(file.compat()), metadata.len()))
    }

    /// The peer's IPv4 address and, when it holds a lease, its MAC.
    fn requester(&self, peer: SocketAddr) -> Requester {
        let ip = match peer.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped(),
        };
        Requester {
            mac: ip.and_then(|ip| self.leases.mac_for_ip(ip)),
            ip,
        }
    }
}

fn in_memory(data: Vec<u8>) -> (TftpReader, u64) {
    let len = data.len() as u64;
    (Box::new(Cursor::new(data)), len)
}

/// TFTP error packet for a failed open.
fn transfer_error(filename: &str, peer: SocketAddr, err: &PxeError) -> packet::Error {
    if err.is_not_found() {
        debug!(%peer, filename, error = %err, "TFTP file not found");
        return packet::Error::FileNotFound;
    }
    warn!(%peer, filename, error = %err, "TFTP read failed");
    packet::Error::Msg(err.to_string())
}

impl Handler for TftpFiles {
    type Reader = TftpReader;
    type Writer = TftpWriter;

    async fn read_req_open(
        &mut self,
        client: &SocketAddr,
        path: &Path,
    ) -> std::result::Result<(Self::Reader, Option<u64>), packet::Error> {
        let filename = path.to_string_lossy();
        match self.open(&filename, *client).await {
            Ok((reader, size)) => {
                info!(peer = %client, filename = %filename, size, "TFTP read");
                Ok((reader, Some(size)))
            }
            Err(e) => Err(transfer_error(&filename, *client, &e)),
        }
    }

    async fn write_req_open(
        &mut self,
        client: &SocketAddr,
        path: &Path,
        _size: Option<u64>,
    ) -> std::result::Result<Self::Writer, packet::Error> {
        warn!(peer = %client, filename = %path.display(), "Refusing TFTP write request");
        Err(packet::Error::PermissionDenied)
    }
}

/// A bound TFTP listener
pub struct TftpServer {
    server: async_tftp::server::TftpServer<TftpFiles>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for TftpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TftpServer").field("local_addr", &self.local_addr).finish_non_exhaustive()
    }
}

impl TftpServer {
    /// Bind `addr` and prepare to serve `files`.
    pub async fn bind(addr: SocketAddr, files: TftpFiles) -> Result<Self> {
        let server = TftpServerBuilder::with_handler(files)
            .bind(addr)
            .timeout(RETRANSMIT_TIMEOUT)
            .ignore_client_timeout()
            .max_send_retries(MAX_SEND_RETRIES)
            .build()
            .await
            .map_err(|e| PxeError::Tftp(format!("cannot bind {addr}: {e}")))?;
        let local_addr = server.listen_addr().map_err(|e| PxeError::Tftp(e.to_string()))?;
        Ok(Self { server, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` flips to true. Transfers in flight are dropped
    /// with the listener.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %self.local_addr, "TFTP responder started");
        tokio::select! {
            served = self.server.serve() => {
                served.map_err(|e| PxeError::Tftp(e.to_string()))
            }
            _ = shutdown.wait_for(|stop| *stop) => {
                info!("TFTP responder shutting down");
                Ok(())
            }
        }
    }
}

/// `pxelinux.cfg/<name>` -> `<name>`, `default` when blank. The directory
/// name is matched without regard to case.
fn pxelinux_config_name(path: &str) -> Option<&str> {
    let prefix = path.get(..PXELINUX_DIR.len())?;
    if !prefix.eq_ignore_ascii_case(PXELINUX_DIR) {
        return None;
    }
    let rest = &path[PXELINUX_DIR.len()..];
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    match rest.trim_matches('/') {
        "" => Some("default"),
        name => Some(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{HostCache, ProfileCache, HOST_CACHE_TTL, PROFILE_CACHE_TTL};
    use crate::config::ProfileDefaults;
    use crate::installer::TemplateDefaults;
    use crate::overrides::OverrideRegistry;
    use crate::resolver::ProfileResolver;
    use crate::template::TemplateRenderer;
    use futures::io::AsyncReadExt;
    use provisioning_store::{HostRecord, ImageMetadata, MockStore, ProvisioningMechanism, ProvisioningProfile};
    use std::net::Ipv4Addr;

    fn files(store: &MockStore, root: &std::path::Path, leases: Arc<LeaseStore>) -> TftpFiles {
        let defaults = ProfileDefaults::default();
        let shared = Arc::new(store.clone());
        let resolver = ProfileResolver::new(
            Arc::new(HostCache::new(shared.clone(), HOST_CACHE_TTL)),
            Arc::new(ProfileCache::new(shared.clone(), PROFILE_CACHE_TTL)),
            Arc::new(OverrideRegistry::new(defaults.clone(), shared.clone())),
            defaults,
        );
        let renderer = TemplateRenderer::new(None, "http://10.0.0.1", Vec::new(), TemplateDefaults::default());
        let artifacts = ArtifactService::new(Arc::new(resolver), shared, Arc::new(renderer));
        TftpFiles::new(root, Arc::new(artifacts), leases)
    }

    fn store() -> MockStore {
        let store = MockStore::new();
        store.add_host(HostRecord::new("10.0.0.5", ["aa:bb:cc:dd:ee:ff"]));
        store.add_profile(ProvisioningProfile {
            management_address: Some("10.0.0.5".to_string()),
            image_name: "ubuntu-24.04".to_string(),
            ..Default::default()
        });
        store.add_image(ImageMetadata::new("ubuntu-24.04", ProvisioningMechanism::CloudInit));
        store
    }

    fn peer(ip: [u8; 4]) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::from(ip).into(), 2070)
    }

    async fn read(files: &TftpFiles, filename: &str, from: SocketAddr) -> Result<Vec<u8>> {
        let (mut reader, size) = files.open(filename, from).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        assert_eq!(data.len() as u64, size);
        Ok(data)
    }

    #[test]
    fn test_pxelinux_config_name() {
        assert_eq!(pxelinux_config_name("pxelinux.cfg/01-aa-bb"), Some("01-aa-bb"));
        assert_eq!(pxelinux_config_name("PXELINUX.CFG/default"), Some("default"));
        assert_eq!(pxelinux_config_name("pxelinux.cfg/"), Some("default"));
        assert_eq!(pxelinux_config_name("pxelinux.cfg"), Some("default"));
        assert_eq!(pxelinux_config_name("pxelinux.cfgx/default"), None);
        assert_eq!(pxelinux_config_name("pxelinux.0"), None);
        assert_eq!(pxelinux_config_name("ldlinux.c32"), None);
    }

    #[tokio::test]
    async fn test_static_files_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pxelinux.0"), b"bootloader").unwrap();
        std::fs::create_dir(dir.path().join("artifacts")).unwrap();
        let files = files(&store(), dir.path(), Arc::new(LeaseStore::new()));

        let data = read(&files, "/pxelinux.0", peer([10, 0, 0, 9])).await.unwrap();
        assert_eq!(data, b"bootloader");

        assert!(read(&files, "ldlinux.c32", peer([10, 0, 0, 9])).await.unwrap_err().is_not_found());
        assert!(read(&files, "../etc/passwd", peer([10, 0, 0, 9])).await.unwrap_err().is_not_found());
        assert!(read(&files, "", peer([10, 0, 0, 9])).await.unwrap_err().is_not_found());
        assert!(read(&files, "artifacts", peer([10, 0, 0, 9])).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_handler_maps_misses_and_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = files(&store(), dir.path(), Arc::new(LeaseStore::new()));

        let miss = files.read_req_open(&peer([10, 0, 0, 9]), Path::new("ldlinux.c32")).await;
        assert!(matches!(miss, Err(packet::Error::FileNotFound)));

        let write = files.write_req_open(&peer([10, 0, 0, 9]), Path::new("pxelinux.0"), Some(4)).await;
        assert!(matches!(write, Err(packet::Error::PermissionDenied)));
        assert!(!dir.path().join("pxelinux.0").exists());
    }

    #[tokio::test]
    async fn test_default_config_uses_the_lease_for_the_peer() {
        let dir = tempfile::tempdir().unwrap();
        let leases = Arc::new(LeaseStore::new());
        let files = files(&store(), dir.path(), leases.clone());

        // Unknown peer, no lease
        let err = read(&files, "pxelinux.cfg/default", peer([10, 0, 0, 77])).await.unwrap_err();
        assert!(err.is_not_found());

        leases.set("aa:bb:cc:dd:ee:ff", Ipv4Addr::new(10, 0, 0, 77));
        let config = read(&files, "pxelinux.cfg/default", peer([10, 0, 0, 77])).await.unwrap();
        let text = String::from_utf8(config).unwrap();
        assert!(text.contains("/profiles/10-0-0-5/"));

        // Source IP matching the management address also resolves
        assert!(read(&files, "pxelinux.cfg/default", peer([10, 0, 0, 5])).await.is_ok());
    }

    #[tokio::test]
    async fn test_profile_paths_are_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(&store(), dir.path(), Arc::new(LeaseStore::new()));
        let data = read(&files, "profiles/10-0-0-5/cloud-init/meta-data", peer([10, 0, 0, 9]))
            .await
            .unwrap();
        assert!(String::from_utf8(data).unwrap().contains("laas-10-0-0-5"));

        let upper = read(&files, "/Profiles/10-0-0-5/cloud-init/meta-data", peer([10, 0, 0, 9]))
            .await
            .unwrap();
        assert!(String::from_utf8(upper).unwrap().contains("laas-10-0-0-5"));
    }
}
