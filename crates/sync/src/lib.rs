//! Whiteboard Sync - peer-to-peer replication of a shared action log
//!
//! Architecture:
//! - Every peer broadcasts drawing actions and control records on one multicast group
//! - A joining peer discovers others and pulls history from the longest log over unicast UDP
//! - Image objects are fetched from their origin over a one-shot TCP stream
//! - A single apply pipeline orders log appends and rendering

pub mod action_log;
pub mod broadcast;
pub mod canvas;
pub mod collab;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod history;
pub mod identity;
pub mod object_store;
pub mod peers;
pub mod session;
pub mod transfer;
pub mod workers;

#[cfg(test)]
mod tests;

pub use action_log::{ActionLog, LogSnapshot};
pub use broadcast::{BroadcastBus, BusHandle, Inbound, NetworkSwitch};
pub use collab::{HeadlessUi, Renderer, SessionUi};
pub use config::SyncConfig;
pub use error::{ReplicationError, SessionError, TransferError};
pub use history::{CatchUp, HistoryReplicator};
pub use identity::LocalIdentity;
pub use object_store::{ObjectKey, ObjectStore};
pub use peers::{PeerDirectory, PeerEntry};
pub use session::{Session, SessionBuilder};
pub use transfer::ObjectTransfer;
