//! Filesystem utilities for cubby.
//!
//! Every flush path goes through [`atomic_write`], so a crash mid-write
//! never leaves a torn backing file: the last fully-written file wins.

mod atomic;

pub use atomic::atomic_write;
