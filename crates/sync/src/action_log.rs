//! Bounded in-memory action history

use crate::config::DEFAULT_LOG_CAPACITY;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use whiteboard_wire::ActionRecord;

/// Thread-safe, insertion-ordered action history
///
/// Holds at most `capacity` records. Once full, every append evicts the
/// oldest record first, so the log always contains the most recent
/// `capacity` appends in their original order. Cloning is cheap and shares
/// the same underlying buffer.
#[derive(Clone)]
pub struct ActionLog {
    records: Arc<RwLock<VecDeque<ActionRecord>>>,
    capacity: usize,
}

impl ActionLog {
    /// Create a log with the default capacity (10,000 records)
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Append at the tail, evicting the head when full. Returns the new length.
    pub fn append(&self, record: ActionRecord) -> usize {
        let mut records = self.records.write();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Point-in-time copy of the current contents
    ///
    /// Appends racing with the snapshot either land entirely before it or
    /// are not observed at all.
    pub fn snapshot(&self) -> LogSnapshot {
        let records = self.records.read();
        LogSnapshot {
            records: records.iter().copied().collect(),
        }
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable, restartable view over an [`ActionLog`]
#[derive(Clone, Debug)]
pub struct LogSnapshot {
    records: Arc<[ActionRecord]>,
}

impl LogSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate in insertion order. May be called any number of times.
    pub fn iter(&self) -> std::slice::Iter<'_, ActionRecord> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a LogSnapshot {
    type Item = &'a ActionRecord;
    type IntoIter = std::slice::Iter<'a, ActionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
