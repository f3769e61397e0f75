//! Session configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Well-known multicast group shared by every peer
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 159, 82);
pub const DEFAULT_MULTICAST_PORT: u16 = 55559;
/// Unicast port a joining peer receives history on
pub const DEFAULT_HISTORY_PORT: u16 = 55558;
/// Port a fetching peer accepts the object stream on
pub const DEFAULT_OBJECT_PORT: u16 = 55550;
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Configuration for a whiteboard session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Multicast group all control and action traffic flows through
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    /// Local interface used for the group join (unspecified = OS choice)
    pub interface: Ipv4Addr,
    /// Deliver our own multicast datagrams back to this host
    pub multicast_loop: bool,
    pub history_port: u16,
    pub object_port: u16,
    /// Address advertised to other peers; resolved from the routing table when unset
    pub advertise_ip: Option<Ipv4Addr>,
    /// Maximum number of records kept in the action log
    pub log_capacity: usize,
    /// How long a joining peer collects discovery answers
    pub discovery_window_ms: u64,
    /// Per-datagram receive timeout during history catch-up
    pub history_timeout_ms: u64,
    /// Grace period for the leave notice to hit the wire before disabling
    pub leave_flush_ms: u64,
    /// Upper bound on a single object fetch
    pub object_timeout_ms: u64,
    pub recv_buffer_bytes: usize,
    pub max_object_bytes: usize,
    /// Concurrent history/object responders
    pub max_workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_loop: true,
            history_port: DEFAULT_HISTORY_PORT,
            object_port: DEFAULT_OBJECT_PORT,
            advertise_ip: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
            discovery_window_ms: 500,
            history_timeout_ms: 5_000,
            leave_flush_ms: 200,
            object_timeout_ms: 10_000,
            recv_buffer_bytes: 2_048,
            max_object_bytes: 16 * 1024 * 1024,
            max_workers: 16,
        }
    }
}

impl SyncConfig {
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.multicast_group, self.multicast_port))
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    pub fn leave_flush(&self) -> Duration {
        Duration::from_millis(self.leave_flush_ms)
    }

    pub fn object_timeout(&self) -> Duration {
        Duration::from_millis(self.object_timeout_ms)
    }

    /// Receive buffer size, never below the wire minimum
    pub fn recv_buffer(&self) -> usize {
        self.recv_buffer_bytes.max(whiteboard_wire::MIN_RECV_BUFFER)
    }
}
