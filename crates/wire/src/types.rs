//! Peer identity and addressing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Session-unique peer identifier
///
/// Drawn at random when a session starts. Self-suppression on the multicast
/// group compares against this value, so it must not be derived from the
/// local address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// IPv4 endpoint carried inside records
///
/// Occupies five integer fields on the wire: four octets and a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr(SocketAddrV4);

impl PeerAddr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// Same host, different port
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.ip(), port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }
}

impl From<SocketAddrV4> for PeerAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self(addr)
    }
}

impl From<PeerAddr> for SocketAddr {
    fn from(addr: PeerAddr) -> Self {
        addr.socket_addr()
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
