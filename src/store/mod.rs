//! Store implementations.
//!
//! Two flavors share the same lifecycle and durability machinery:
//! [`DocStore`], an ordered collection of documents, and [`KvStore`], a
//! string-keyed dictionary with a choice of single-file or split (one file
//! per key) persistence.
//!
//! # Lifecycle
//!
//! A store starts unloaded. `load` populates it from the backing resource
//! under a reader lock; every other operation before that fails with
//! `NotLoaded`. Mutations apply to memory first, then the requested
//! [`WriteMode`] decides whether the flush happens inline, on a detached
//! thread, or not at all. `discard` reloads from disk, dropping unflushed
//! memory state; `destroy` deletes the backing resource and resets the
//! store to unloaded.
//!
//! In-memory state lives behind a per-store mutex that is never held
//! across file I/O or lock waits, so reads stay responsive while a
//! background flush runs.

mod collection;
mod dirty;
mod kv;
mod write;


pub use collection::DocStore;
pub use dirty::{DirtyTracker, PendingState};
pub use kv::{KvStore, Layout};
pub use write::WriteMode;

use std::path::Path;

/// Normalize a backing path into a lock-table resource key.
///
/// Resource-key equality is string identity of the normalized path, so a
/// store and external callers sequencing work against the same file agree
/// on the key.
pub(crate) fn resource_key(path: &Path) -> String {
    let normalized: std::path::PathBuf = path.components().collect();
    normalized.display().to_string()
}
