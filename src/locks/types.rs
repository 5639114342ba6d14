//! Lock kind and diagnostics structures.

/// Kind of access a lock request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Shared access; coexists with other readers.
    Read,
    /// Exclusive access; excludes everything else.
    Write,
}

impl LockKind {
    /// Get the lowercase name of this lock kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Read => "read",
            LockKind::Write => "write",
        }
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consistent snapshot of one resource key's lock state.
///
/// Taken under the table mutex, so the three fields always describe the
/// same instant. A key with no entry reports the default (fully idle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStats {
    /// Number of readers currently holding the key.
    pub readers: usize,
    /// Whether a writer currently holds the key.
    pub writer_held: bool,
    /// Number of requests still waiting in the queue.
    pub queue_len: usize,
}

/// A queued lock request.
#[derive(Debug)]
pub(super) struct Waiter {
    /// Unique request id, assigned at enqueue time.
    pub id: u64,
    /// Requested access kind.
    pub kind: LockKind,
}
