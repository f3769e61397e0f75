//! Known peers and catch-up source selection

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use whiteboard_wire::{PeerAddr, PeerId};

/// A peer learned from discovery traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerEntry {
    pub id: PeerId,
    /// Advertised unicast address
    pub addr: PeerAddr,
    /// Log length the peer reported when announcing itself
    pub history_len: u64,
}

impl PeerEntry {
    pub fn new(id: PeerId, addr: PeerAddr, history_len: u64) -> Self {
        Self {
            id,
            addr,
            history_len,
        }
    }

    fn same_peer(&self, other: &PeerEntry) -> bool {
        self.id == other.id && self.addr == other.addr
    }
}

#[derive(Default)]
struct Directory {
    peers: Vec<PeerEntry>,
    longest: Option<PeerEntry>,
}

/// Set of known peers, keyed by `(id, addr)`
///
/// Also caches the entry with the longest advertised history (first seen
/// wins ties). The cache is not recomputed when that entry leaves: it falls
/// back to `None` until a new, longer announcement arrives.
#[derive(Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<RwLock<Directory>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns `false` if the `(id, addr)` pair was already known.
    pub fn add_peer(&self, entry: PeerEntry) -> bool {
        let mut dir = self.inner.write();
        if dir.peers.iter().any(|p| p.same_peer(&entry)) {
            return false;
        }
        dir.peers.push(entry);

        let longest = dir.longest.map(|p| p.history_len).unwrap_or(0);
        if entry.history_len > longest {
            dir.longest = Some(entry);
        }

        tracing::debug!(
            "Added peer {} at {} (history {}), {} known",
            entry.id,
            entry.addr,
            entry.history_len,
            dir.peers.len()
        );
        true
    }

    /// Remove every entry announced from `addr`. Returns how many were removed.
    pub fn remove_peer(&self, addr: &PeerAddr) -> usize {
        let mut dir = self.inner.write();
        let before = dir.peers.len();
        dir.peers.retain(|p| p.addr != *addr);
        let removed = before - dir.peers.len();

        if dir.longest.is_some_and(|p| p.addr == *addr) {
            dir.longest = None;
        }
        if removed > 0 {
            tracing::debug!("Removed peer at {}, {} known", addr, dir.peers.len());
        }
        removed
    }

    /// Forget every peer and the longest-history candidate
    pub fn reset(&self) {
        let mut dir = self.inner.write();
        dir.peers.clear();
        dir.longest = None;
        tracing::debug!("Peer directory cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().peers.is_empty()
    }

    pub fn longest_history_peer(&self) -> Option<PeerEntry> {
        self.inner.read().longest
    }

    /// Copy of the current entries in discovery order
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.inner.read().peers.clone()
    }
}
