//! Local identity provider

use crate::config::SyncConfig;
use crate::error::SessionError;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use whiteboard_wire::{PeerAddr, PeerId};

/// This peer's id and advertised address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIdentity {
    id: PeerId,
    ip: Ipv4Addr,
}

impl LocalIdentity {
    pub fn new(id: PeerId, ip: Ipv4Addr) -> Self {
        Self { id, ip }
    }

    /// Fresh random id for the given address
    pub fn generate(ip: Ipv4Addr) -> Self {
        Self::new(PeerId(rand::random()), ip)
    }

    /// Random id plus the configured or discovered local address
    pub fn resolve(config: &SyncConfig) -> Result<Self, SessionError> {
        let ip = match config.advertise_ip {
            Some(ip) => ip,
            None => outbound_ipv4(config.multicast_group, config.multicast_port)
                .map_err(SessionError::AddressResolution)?,
        };
        let identity = Self::generate(ip);
        tracing::info!("Local identity {} at {}", identity.id, identity.ip);
        Ok(identity)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// This host at the given port
    pub fn addr(&self, port: u16) -> PeerAddr {
        PeerAddr::new(self.ip, port)
    }
}

/// Source address the OS would pick to reach `target`. Connecting a UDP
/// socket sends nothing; it only consults the routing table.
fn outbound_ipv4(target: Ipv4Addr, port: u16) -> std::io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(SocketAddrV4::new(target, port))?;
    match socket.local_addr()? {
        std::net::SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no usable IPv4 source address (got {other})"),
        )),
    }
}
