//! Error types for cubby.
//!
//! Uses thiserror for derive macros. Every failure a caller can hit maps to
//! one of a handful of categories: lock timeouts, codec failures,
//! filesystem failures, and use-before-load.

use crate::locks::LockKind;
use thiserror::Error;

/// Main error type for cubby operations.
#[derive(Error, Debug)]
pub enum CubbyError {
    /// A queued lock request sat past its deadline without being granted.
    #[error("timed out waiting for {kind} lock on '{key}'")]
    LockTimeout {
        /// The resource key the request was queued on.
        key: String,
        /// Whether the request asked for read or write access.
        kind: LockKind,
    },

    /// Codec failure: malformed bytes on decode, or a value the codec
    /// cannot represent on encode.
    #[error("format error: {0}")]
    Format(String),

    /// Filesystem failure during a flush, load, discard, or destroy.
    #[error("{context}: {source}")]
    Io {
        /// What cubby was doing when the operation failed.
        context: String,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// Operation invoked on a store before its initial `load`.
    #[error("store '{0}' has not been loaded")]
    NotLoaded(String),

    /// Caller misuse of the registry (e.g., reopening a store under the
    /// same name but a different flavor or layout).
    #[error("{0}")]
    Usage(String),
}

impl CubbyError {
    /// Build an `Io` error with a human-readable context string.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CubbyError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias for cubby operations.
pub type Result<T> = std::result::Result<T, CubbyError>;
