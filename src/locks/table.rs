//! Lock table implementation: per-key lock state machines behind one mutex.

use super::guard::LockGuard;
use super::types::{LockKind, LockStats, Waiter};
use crate::error::{CubbyError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Deadline applied to lock requests that do not carry their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of per-resource reader/writer locks.
///
/// Cloning is cheap and clones share state, so one table can be handed to
/// every store of a registry (and to tests that want to sequence external
/// work against store resources). The table is local to the process; it
/// provides no cross-process exclusion.
#[derive(Debug, Clone)]
pub struct LockTable {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    default_timeout: Duration,
    state: Mutex<TableState>,
    wakeup: Condvar,
}

#[derive(Debug, Default)]
struct TableState {
    next_id: u64,
    entries: HashMap<String, LockEntry>,
}

/// Lock state for a single resource key.
#[derive(Debug, Default)]
struct LockEntry {
    readers: usize,
    writer: bool,
    queue: VecDeque<Waiter>,
    /// Requests already admitted by a queue pass but not yet observed by
    /// their waiting thread.
    granted: HashSet<u64>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.queue.is_empty() && self.granted.is_empty()
    }

    /// Queue admission pass, run on every state change.
    ///
    /// Repeatedly inspects the head of the queue: a run of consecutive read
    /// requests is granted while no writer holds; a write request is granted
    /// only when the key is fully idle, and then blocks everything behind
    /// it. The pass stops at the first blocked request — it never scans past
    /// it for grantable requests further back. That restraint is what keeps
    /// the queue FIFO-fair and writers free of starvation.
    ///
    /// Returns true if at least one request was granted.
    fn pump(&mut self) -> bool {
        let mut granted_any = false;
        loop {
            let Some(head) = self.queue.front() else {
                break;
            };
            let grantable = match head.kind {
                LockKind::Read => !self.writer,
                LockKind::Write => self.readers == 0 && !self.writer,
            };
            if !grantable {
                break;
            }
            let kind = head.kind;
            let id = head.id;
            self.queue.pop_front();
            self.granted.insert(id);
            granted_any = true;
            match kind {
                LockKind::Read => self.readers += 1,
                LockKind::Write => {
                    self.writer = true;
                    break;
                }
            }
        }
        granted_any
    }
}

impl LockTable {
    /// Create a lock table with the default request timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a lock table whose requests default to the given timeout.
    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                default_timeout,
                state: Mutex::new(TableState::default()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Acquire shared access to a resource key.
    ///
    /// Grants immediately if no writer holds the key and nothing is queued
    /// ahead; otherwise waits in FIFO order. `timeout` of `None` uses the
    /// table default; `Some(Duration::ZERO)` behaves like a try-lock.
    pub fn acquire_read(&self, key: &str, timeout: Option<Duration>) -> Result<LockGuard> {
        self.acquire(key, LockKind::Read, timeout)
    }

    /// Acquire exclusive access to a resource key.
    ///
    /// Grants immediately only when the key is fully idle; otherwise waits
    /// in FIFO order.
    pub fn acquire_write(&self, key: &str, timeout: Option<Duration>) -> Result<LockGuard> {
        self.acquire(key, LockKind::Write, timeout)
    }

    /// Snapshot the lock state of a key for diagnostics and tests.
    pub fn stats(&self, key: &str) -> LockStats {
        let state = self.lock_state();
        state
            .entries
            .get(key)
            .map(|entry| LockStats {
                readers: entry.readers,
                writer_held: entry.writer,
                queue_len: entry.queue.len(),
            })
            .unwrap_or_default()
    }

    /// Number of keys currently carrying lock state.
    ///
    /// Idle keys are garbage-collected, so this counts keys that are held,
    /// queued on, or granted-but-unclaimed.
    pub fn tracked_keys(&self) -> usize {
        self.lock_state().entries.len()
    }

    fn acquire(&self, key: &str, kind: LockKind, timeout: Option<Duration>) -> Result<LockGuard> {
        let deadline = Instant::now() + timeout.unwrap_or(self.shared.default_timeout);
        let mut state = self.lock_state();

        let id = state.next_id;
        state.next_id += 1;

        let entry = state.entries.entry(key.to_string()).or_default();
        entry.queue.push_back(Waiter { id, kind });
        if entry.pump() {
            self.shared.wakeup.notify_all();
        }

        loop {
            if let Some(entry) = state.entries.get_mut(key)
                && entry.granted.remove(&id)
            {
                return Ok(LockGuard::new(self.clone(), key.to_string(), kind));
            }

            let now = Instant::now();
            if now >= deadline {
                self.cancel(&mut state, key, id);
                return Err(CubbyError::LockTimeout {
                    key: key.to_string(),
                    kind,
                });
            }

            let (next, _timed_out) = self
                .shared
                .wakeup
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
        }
    }

    /// Remove a timed-out request from the queue.
    ///
    /// The removed request may have been blocking the head, so the queue is
    /// pumped again. No partial grant survives: the request either returned
    /// granted before this point or leaves no trace.
    fn cancel(&self, state: &mut TableState, key: &str, id: u64) {
        let mut notify = false;
        let mut remove = false;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.queue.retain(|waiter| waiter.id != id);
            notify = entry.pump();
            remove = entry.is_idle();
        }
        if remove {
            state.entries.remove(key);
        }
        if notify {
            self.shared.wakeup.notify_all();
        }
    }

    /// Release a granted lock and re-evaluate the queue.
    pub(super) fn release(&self, key: &str, kind: LockKind) {
        let mut state = self.lock_state();
        let mut remove = false;
        if let Some(entry) = state.entries.get_mut(key) {
            match kind {
                LockKind::Read => entry.readers = entry.readers.saturating_sub(1),
                LockKind::Write => entry.writer = false,
            }
            entry.pump();
            remove = entry.is_idle();
        }
        if remove {
            state.entries.remove(key);
        }
        self.shared.wakeup.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, TableState> {
        // A poisoned mutex only means another thread panicked while holding
        // it; the table state itself stays consistent.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
