//! Write-mode scheduling (the write coordinator).
//!
//! Mutating operations apply to memory first, then call [`schedule`] with
//! the caller's [`WriteMode`] to decide what happens on disk. The
//! background mode's fire-and-forget semantics are an explicit, named
//! operation here — [`detach_flush`] — rather than a side effect of
//! ignoring a result somewhere.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Durability mode for a mutating store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// The operation does not return until the flush finishes or fails.
    /// Failures propagate to the caller and to `error` observers.
    #[default]
    Sync,
    /// The operation returns right after the in-memory mutation; the flush
    /// runs on a detached thread and reports only through observers.
    Background,
    /// No flush is scheduled. State stays in memory until an explicit
    /// flush call.
    Buffered,
}

/// A store handle that can flush its full current state.
pub(crate) trait Flushable: Clone + Send + 'static {
    fn flush_now(&self) -> Result<()>;
}

/// Apply a write mode after an in-memory mutation.
pub(crate) fn schedule<S: Flushable>(store: &S, mode: WriteMode) -> Result<()> {
    match mode {
        WriteMode::Sync => store.flush_now(),
        WriteMode::Background => {
            detach_flush(store.clone());
            Ok(())
        }
        WriteMode::Buffered => Ok(()),
    }
}

/// Run a flush on a detached thread.
///
/// The thread's result is consumed by the store's observer broadcast (the
/// flush itself notifies `written`/`error`); nothing here reports back to
/// the call site.
pub(crate) fn detach_flush<S: Flushable>(store: S) {
    let spawned = std::thread::Builder::new()
        .name("cubby-flush".to_string())
        .spawn(move || {
            let _ = store.flush_now();
        });
    if let Err(e) = spawned {
        eprintln!("Warning: failed to spawn background flush thread: {}", e);
    }
}
