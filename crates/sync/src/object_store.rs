//! Local store for out-of-band objects (images)

use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use whiteboard_wire::PeerId;

/// Object identity
///
/// Keys are assigned by the originating peer and are only unique per origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub origin: PeerId,
    pub key: u32,
}

impl ObjectKey {
    pub fn new(origin: PeerId, key: u32) -> Self {
        Self { origin, key }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.key)
    }
}

/// Concurrent blob map
///
/// Written by the fetch path and the local share path, read by the apply
/// pipeline and the object responder.
#[derive(Clone, Default)]
pub struct ObjectStore {
    objects: Arc<DashMap<ObjectKey, Bytes>>,
    next_key: Arc<AtomicU32>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ObjectKey, blob: Bytes) {
        self.objects.insert(key, blob);
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Bytes> {
        self.objects.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Next key for an object shared by this peer. Keys start at 1.
    pub fn next_local_key(&self) -> u32 {
        self.next_key.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop every object. Local key numbering carries on, so a peer that
    /// kept an older object never sees its key reused.
    pub fn clear(&self) {
        self.objects.clear();
    }
}
