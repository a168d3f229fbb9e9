//! Fixed-capacity ring of recent operation outcomes

use crate::models::OperationResult;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// A bounded history ring shared between a component and the facade.
///
/// Appends evict the oldest entry once capacity is reached; the length
/// never exceeds capacity. Readers take a snapshot and never block writers
/// for longer than the copy.
#[derive(Clone)]
pub struct HistoryRing {
    entries: Arc<RwLock<VecDeque<OperationResult>>>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Append a result, evicting the oldest entry when full.
    pub fn push(&self, result: OperationResult) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    /// Snapshot of all entries, oldest first.
    pub fn snapshot(&self) -> Vec<OperationResult> {
        self.entries.read().iter().cloned().collect()
    }

    /// Most recent entry, if any.
    pub fn last(&self) -> Option<OperationResult> {
        self.entries.read().back().cloned()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
