//! Read-only collection snapshots

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// A collection as last observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    items: Vec<T>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl<T> Snapshot<T> {
    /// Never refreshed
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            refreshed_at: None,
        }
    }

    /// Observed now
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            refreshed_at: Some(Utc::now()),
        }
    }

    /// Items in display order
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing was observed
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Time of the successful refresh that produced this snapshot
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Holder that swaps whole snapshots; readers never see a partial update
#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: RwLock<Arc<Snapshot<T>>>,
}

impl<T> SnapshotCell<T> {
    /// Start empty
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<Snapshot<T>> {
        Arc::clone(&self.current.read())
    }

    /// Replace the snapshot
    pub fn store(&self, snapshot: Snapshot<T>) {
        *self.current.write() = Arc::new(snapshot);
    }
}

impl<T> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_leaves_old_readers_intact() {
        let cell = SnapshotCell::new();
        assert!(cell.load().refreshed_at().is_none());

        cell.store(Snapshot::new(vec![1, 2]));
        let before = cell.load();
        cell.store(Snapshot::new(vec![3]));

        assert_eq!(before.items(), &[1, 2]);
        assert_eq!(cell.load().items(), &[3]);
        assert!(cell.load().refreshed_at().is_some());
    }
}
