//! RAII release handle for granted locks.

use super::table::LockTable;
use super::types::LockKind;

/// Handle to a granted lock.
///
/// Releasing is in-process bookkeeping and cannot fail, so there is no
/// fallible variant: drop the guard (or call [`LockGuard::release`] to make
/// the release point explicit) and the table re-evaluates its queue.
#[derive(Debug)]
pub struct LockGuard {
    table: LockTable,
    key: String,
    kind: LockKind,
    released: bool,
}

impl LockGuard {
    pub(super) fn new(table: LockTable, key: String, kind: LockKind) -> Self {
        Self {
            table,
            key,
            kind,
            released: false,
        }
    }

    /// The resource key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The kind of access this guard holds.
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Release the lock now instead of at end of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.table.release(&self.key, self.kind);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}
