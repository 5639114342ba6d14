//! Locking subsystem for cubby.
//!
//! This module implements the in-process concurrency model for backing
//! resources: a fair reader/writer lock per resource key (the normalized
//! path of a backing file or directory), managed by a shared [`LockTable`].
//!
//! # Lock Model
//!
//! - Any number of readers may hold a key at once, or exactly one writer,
//!   never both.
//! - Blocked requests wait in a strict FIFO queue. When the lock state
//!   changes, only the queue head is inspected: a run of consecutive read
//!   requests at the head is granted together, a write request is granted
//!   alone, and the first blocked request stops the pass. Nothing ever
//!   jumps the queue, which keeps writers from starving.
//! - Every request carries a deadline. A request still queued when its
//!   deadline elapses is removed in place and fails with
//!   [`CubbyError::LockTimeout`](crate::error::CubbyError::LockTimeout);
//!   a granted lock is never preempted.
//!
//! # RAII Guards
//!
//! Granted locks are released through [`LockGuard`] objects, either
//! explicitly via [`LockGuard::release`] or automatically on drop.
//!
//! # Bookkeeping
//!
//! Lock entries are created lazily on first request for a key and removed
//! the moment the key is fully idle (no holders, empty queue), so idle keys
//! cost nothing.

mod guard;
mod table;
mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use guard::LockGuard;
pub use table::{DEFAULT_TIMEOUT, LockTable};
pub use types::{LockKind, LockStats};
