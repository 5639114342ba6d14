//! Per-key dirty tracking for split-layout stores.
//!
//! When each key persists as its own file, a flush should touch only the
//! keys that changed. The tracker keeps two disjoint key sets: keys with an
//! unflushed write and keys with an unflushed delete. Setting a key moves
//! it out of the delete set; deleting does the reverse.

use std::collections::BTreeSet;

/// Pending persistence state of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// The key's current value must be written.
    Write,
    /// The key's backing file must be removed.
    Delete,
    /// Nothing pending.
    Clean,
}

/// Tracks which keys have unflushed writes or deletes.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    pending_write: BTreeSet<String>,
    pending_delete: BTreeSet<String>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as set.
    pub fn record_set(&mut self, key: &str) {
        self.pending_delete.remove(key);
        self.pending_write.insert(key.to_string());
    }

    /// Mark a key as deleted.
    pub fn record_delete(&mut self, key: &str) {
        self.pending_write.remove(key);
        self.pending_delete.insert(key.to_string());
    }

    /// Pending state of one key.
    pub fn pending(&self, key: &str) -> PendingState {
        if self.pending_write.contains(key) {
            PendingState::Write
        } else if self.pending_delete.contains(key) {
            PendingState::Delete
        } else {
            PendingState::Clean
        }
    }

    /// True when nothing is pending.
    pub fn is_clean(&self) -> bool {
        self.pending_write.is_empty() && self.pending_delete.is_empty()
    }

    /// Drain both sets for a full flush.
    pub fn take_all(&mut self) -> (BTreeSet<String>, BTreeSet<String>) {
        (
            std::mem::take(&mut self.pending_write),
            std::mem::take(&mut self.pending_delete),
        )
    }

    /// Resolve and clear one key's pending state.
    pub fn take_key(&mut self, key: &str) -> PendingState {
        if self.pending_write.remove(key) {
            PendingState::Write
        } else if self.pending_delete.remove(key) {
            PendingState::Delete
        } else {
            PendingState::Clean
        }
    }

    /// Merge a failed flush's drained sets back in.
    ///
    /// Mutations applied since the drain are newer than the drained state,
    /// so a key that picked up fresh pending state keeps it.
    pub fn restore(&mut self, writes: BTreeSet<String>, deletes: BTreeSet<String>) {
        for key in writes {
            if self.pending(&key) == PendingState::Clean {
                self.pending_write.insert(key);
            }
        }
        for key in deletes {
            if self.pending(&key) == PendingState::Clean {
                self.pending_delete.insert(key);
            }
        }
    }

    /// Forget everything (successful full flush, discard, destroy).
    pub fn clear(&mut self) {
        self.pending_write.clear();
        self.pending_delete.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_delete_stay_disjoint() {
        let mut tracker = DirtyTracker::new();

        tracker.record_set("a");
        assert_eq!(tracker.pending("a"), PendingState::Write);

        tracker.record_delete("a");
        assert_eq!(tracker.pending("a"), PendingState::Delete);

        tracker.record_set("a");
        assert_eq!(tracker.pending("a"), PendingState::Write);
    }

    #[test]
    fn take_all_drains_both_sets() {
        let mut tracker = DirtyTracker::new();
        tracker.record_set("a");
        tracker.record_set("b");
        tracker.record_delete("c");

        let (writes, deletes) = tracker.take_all();
        assert_eq!(writes.len(), 2);
        assert!(writes.contains("a") && writes.contains("b"));
        assert!(deletes.contains("c"));
        assert!(tracker.is_clean());
    }

    #[test]
    fn take_key_resolves_only_that_key() {
        let mut tracker = DirtyTracker::new();
        tracker.record_set("a");
        tracker.record_delete("b");

        assert_eq!(tracker.take_key("a"), PendingState::Write);
        assert_eq!(tracker.take_key("a"), PendingState::Clean);
        assert_eq!(tracker.pending("b"), PendingState::Delete);
    }

    #[test]
    fn restore_does_not_clobber_newer_state() {
        let mut tracker = DirtyTracker::new();
        tracker.record_set("a");
        tracker.record_set("b");

        let (writes, deletes) = tracker.take_all();

        // "a" was deleted while the (failed) flush was in flight; the
        // delete is newer and must win over the restored write.
        tracker.record_delete("a");
        tracker.restore(writes, deletes);

        assert_eq!(tracker.pending("a"), PendingState::Delete);
        assert_eq!(tracker.pending("b"), PendingState::Write);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut tracker = DirtyTracker::new();
        tracker.record_set("a");
        tracker.record_delete("b");

        tracker.clear();
        assert!(tracker.is_clean());
    }
}
