//! Session, replication and transfer errors

use crate::frame::FrameError;
use crate::object_store::ObjectKey;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Local setup failures. These abort session startup.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot resolve local IPv4 address: {0}")]
    AddressResolution(#[source] std::io::Error),

    #[error("cannot bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("cannot join multicast group {group}: {source}")]
    JoinGroup {
        group: Ipv4Addr,
        source: std::io::Error,
    },

    #[error("broadcast bus already has a subscriber")]
    AlreadySubscribed,
}

/// History catch-up failures
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("cannot bind history receiver on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
}

/// Object fetch/push failures
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("cannot bind object listener on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("object stream io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object stream: {0}")]
    Frame(#[from] FrameError),

    #[error("no object arrived within {0:?}")]
    Timeout(Duration),

    #[error("session is shutting down")]
    Cancelled,

    #[error("object {0} is not available locally")]
    Unavailable(ObjectKey),
}
