//! DHCP responder
//!
//! Answers PXE clients only. Discover gets an Offer, Request gets an Ack,
//! every other message type is ignored. A MAC that resolves to no profile is
//! declined silently: no NAK, no bytes on the wire.
//!
//! In proxy mode the responder hands out boot parameters only and leaves
//! addressing to the site's DHCP server.

use crate::config::PxeConfig;
use crate::error::{PxeError, Result};
use crate::identity::mac_from_bytes;
use crate::lease::{AddressPool, LeaseStore};
use crate::resolver::ProfileResolver;
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
use dhcproto::{Decodable, Encodable};
use provisioning_store::ProvisioningProfile;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Bootfile handed out when neither the profile nor the configuration names one
pub const FALLBACK_BOOT_FILENAME: &str = "pxelinux.0";

/// Port relay agents listen on
pub const RELAY_PORT: u16 = 67;

/// Largest datagram read from the socket
const MAX_DATAGRAM: usize = 1500;

/// Parsed DHCP request
#[derive(Debug, Clone)]
pub struct DhcpRequest {
    pub message: Message,
    pub message_type: MessageType,
    /// Normalized client hardware address
    pub mac: String,
    pub xid: u32,
    /// ciaddr
    pub client_ip: Ipv4Addr,
    /// giaddr, set when relayed
    pub relay_ip: Ipv4Addr,
}

impl DhcpRequest {
    /// Decode a DHCPv4 message.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let message = Message::from_bytes(data).map_err(|e| PxeError::Dhcp(e.to_string()))?;

        let message_type = match message.opts().get(OptionCode::MessageType) {
            Some(DhcpOption::MessageType(mt)) => *mt,
            _ => return Err(PxeError::Dhcp("missing message type".to_string())),
        };
        let mac = mac_from_bytes(message.chaddr())?;

        Ok(Self {
            xid: message.xid(),
            client_ip: message.ciaddr(),
            relay_ip: message.giaddr(),
            message,
            message_type,
            mac,
        })
    }

    /// Whether option 60 identifies a PXE client (`PXEClient:...`)
    pub fn is_pxe_client(&self) -> bool {
        match self.message.opts().get(OptionCode::ClassIdentifier) {
            Some(DhcpOption::ClassIdentifier(class)) => String::from_utf8_lossy(class)
                .to_ascii_uppercase()
                .contains("PXECLIENT"),
            _ => false,
        }
    }

    /// Where the reply goes: the relay, the client's own address, or broadcast.
    pub fn reply_destination(&self, client_port: u16) -> SocketAddr {
        if !self.relay_ip.is_unspecified() {
            SocketAddr::new(self.relay_ip.into(), RELAY_PORT)
        } else if !self.client_ip.is_unspecified() {
            SocketAddr::new(self.client_ip.into(), client_port)
        } else {
            SocketAddr::new(Ipv4Addr::BROADCAST.into(), client_port)
        }
    }
}

/// Reply ready for the wire
#[derive(Debug, Clone)]
pub struct DhcpReply {
    pub message_type: MessageType,
    /// yiaddr, absent in proxy mode
    pub address: Option<Ipv4Addr>,
    pub destination: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Network settings decorating every reply
#[derive(Debug, Clone)]
pub struct DhcpSettings {
    pub proxy_mode: bool,
    /// Server identifier and default next-server
    pub server_identifier: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub boot_filename: String,
    pub lease_seconds: u32,
    pub client_port: u16,
}

impl DhcpSettings {
    pub fn from_config(config: &PxeConfig) -> Self {
        Self {
            proxy_mode: config.dhcp.proxy_mode,
            server_identifier: config.server_identifier(),
            subnet_mask: config.dhcp.subnet_mask,
            router: config.dhcp.router,
            dns_servers: config.dhcp.dns_servers.clone(),
            domain_name: config.dhcp.domain_name.clone(),
            boot_filename: config.dhcp.default_boot_filename.clone(),
            lease_seconds: config.dhcp.lease_seconds,
            client_port: config.dhcp.client_port,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Stateless per-message DHCP responder
pub struct DhcpResponder {
    settings: DhcpSettings,
    resolver: Arc<ProfileResolver>,
    leases: Arc<LeaseStore>,
    pool: Option<AddressPool>,
}

impl DhcpResponder {
    pub fn new(
        settings: DhcpSettings,
        resolver: Arc<ProfileResolver>,
        leases: Arc<LeaseStore>,
        pool: Option<AddressPool>,
    ) -> Self {
        Self {
            settings,
            resolver,
            leases,
            pool,
        }
    }

    /// Build the reply for one datagram.
    ///
    /// `Ok(None)` means nothing is sent: not a PXE client, an ignored message
    /// type, an Ack in proxy mode, or a MAC with no profile.
    pub async fn handle_packet(&self, data: &[u8]) -> Result<Option<DhcpReply>> {
        let request = DhcpRequest::parse(data)?;
        if !request.is_pxe_client() {
            return Ok(None);
        }
        debug!(
            mac = %request.mac,
            msg_type = ?request.message_type,
            xid = request.xid,
            "Received DHCP request"
        );

        let reply_type = match request.message_type {
            MessageType::Discover => MessageType::Offer,
            MessageType::Request if !self.settings.proxy_mode => MessageType::Ack,
            _ => return Ok(None),
        };

        let Some(resolution) = self.resolver.resolve_by_mac(&request.mac).await? else {
            debug!(mac = %request.mac, "No PXE profile, declining");
            return Ok(None);
        };
        let profile = resolution.profile;

        let address = if self.settings.proxy_mode {
            None
        } else {
            Some(self.lease_address(&request.mac, &profile)?)
        };

        let mut reply = Message::default();
        reply.set_opcode(Opcode::BootReply);
        reply.set_xid(request.xid);
        reply.set_flags(request.message.flags());
        reply.set_giaddr(request.relay_ip);
        reply.set_ciaddr(request.client_ip);
        reply.set_chaddr(request.message.chaddr());
        reply.opts_mut().insert(DhcpOption::MessageType(reply_type));
        if let Some(ip) = address {
            reply.set_yiaddr(ip);
        }
        self.decorate(&mut reply, &profile);

        if reply_type == MessageType::Ack {
            if let Some(ip) = address {
                self.leases.set(&request.mac, ip);
            }
        }

        let bytes = reply.to_vec().map_err(|e| PxeError::Dhcp(e.to_string()))?;
        Ok(Some(DhcpReply {
            message_type: reply_type,
            address,
            destination: request.reply_destination(self.settings.client_port),
            bytes,
        }))
    }

    /// Pick the client address: the profile's, then the MAC's lease, then
    /// the next free address in the pool.
    fn lease_address(&self, mac: &str, profile: &ProvisioningProfile) -> Result<Ipv4Addr> {
        if let Some(ip) = profile.ipv4_address.filter(|ip| !ip.is_unspecified()) {
            return self.ensure_in_range(ip);
        }
        if let Some(ip) = self.leases.get(mac) {
            return self.ensure_in_range(ip);
        }

        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| PxeError::NoAddress(format!("no DHCP range configured for {mac}")))?;
        pool.allocate_for(mac, &self.leases)
            .ok_or_else(|| PxeError::NoAddress("DHCP range exhausted".to_string()))
    }

    fn ensure_in_range(&self, ip: Ipv4Addr) -> Result<Ipv4Addr> {
        match &self.pool {
            Some(pool) if !pool.contains(ip) => Err(PxeError::NoAddress(format!(
                "{ip} outside the configured DHCP range"
            ))),
            _ => Ok(ip),
        }
    }

    fn decorate(&self, reply: &mut Message, profile: &ProvisioningProfile) {
        let settings = &self.settings;
        if !settings.proxy_mode {
            let opts = reply.opts_mut();
            if let Some(server) = settings.server_identifier {
                opts.insert(DhcpOption::ServerIdentifier(server));
            }
            if let Some(mask) = profile.subnet_mask.or(settings.subnet_mask) {
                opts.insert(DhcpOption::SubnetMask(mask));
            }
            if let Some(router) = profile.gateway.or(settings.router) {
                opts.insert(DhcpOption::Router(vec![router]));
            }
            let dns = if profile.dns_servers.is_empty() {
                &settings.dns_servers
            } else {
                &profile.dns_servers
            };
            if !dns.is_empty() {
                opts.insert(DhcpOption::DomainNameServer(dns.clone()));
            }
            if let Some(domain) = non_blank(profile.domain_name.as_deref())
                .or_else(|| non_blank(settings.domain_name.as_deref()))
            {
                opts.insert(DhcpOption::DomainName(domain.to_string()));
            }
            opts.insert(DhcpOption::AddressLeaseTime(settings.lease_seconds));
        } else {
            // PXE ROMs ignore proxy offers without the vendor class echoed back
            reply
                .opts_mut()
                .insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
        }

        let boot_filename = non_blank(profile.boot_filename.as_deref())
            .or_else(|| non_blank(self.resolver.defaults().boot_filename.as_deref()))
            .or_else(|| non_blank(Some(settings.boot_filename.as_str())))
            .unwrap_or(FALLBACK_BOOT_FILENAME)
            .to_string();
        reply.set_fname_str(&boot_filename);
        reply
            .opts_mut()
            .insert(DhcpOption::BootfileName(boot_filename.into_bytes()));

        if let Some(next) = profile.next_server.or(settings.server_identifier) {
            reply.set_siaddr(next);
            reply
                .opts_mut()
                .insert(DhcpOption::TFTPServerName(next.to_string().into_bytes()));
        }
    }

    async fn respond(&self, socket: &UdpSocket, data: &[u8], peer: SocketAddr) {
        match self.handle_packet(data).await {
            Ok(Some(reply)) => match socket.send_to(&reply.bytes, reply.destination).await {
                Ok(_) => info!(
                    msg_type = ?reply.message_type,
                    address = ?reply.address,
                    dest = %reply.destination,
                    "Sent DHCP reply"
                ),
                Err(e) => error!(error = %e, dest = %reply.destination, "Failed to send DHCP reply"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, peer = %peer, "Dropped DHCP request"),
        }
    }

    /// Serve until `shutdown` flips to true. Each datagram is handled on its
    /// own task.
    pub async fn serve(self: Arc<Self>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let socket = Arc::new(socket);
        info!(
            addr = %socket.local_addr()?,
            proxy_mode = self.settings.proxy_mode,
            "DHCP responder started"
        );

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let data = buf[..len].to_vec();
                        let responder = Arc::clone(&self);
                        let socket = Arc::clone(&socket);
                        tokio::spawn(async move {
                            responder.respond(&socket, &data, peer).await;
                        });
                    }
                    Err(e) => error!(error = %e, "Error receiving DHCP packet"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("DHCP responder shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Bind a broadcast-capable UDP socket for DHCP.
pub fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let bind_failed = |source| PxeError::BindFailed { addr, source };
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.set_broadcast(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_failed)
}
