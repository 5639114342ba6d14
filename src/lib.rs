//! cubby: an embedded, file-backed data store with per-path concurrency
//! control and tunable write durability.
//!
//! Multiple logical stores — ordered document collections ([`DocStore`])
//! and key-value dictionaries ([`KvStore`]) — live in one process and
//! serialize conflicting disk access through a shared [`LockTable`] while
//! non-conflicting access proceeds concurrently.
//!
//! Every mutation applies to memory first; the caller's [`WriteMode`] then
//! decides durability:
//!
//! - [`WriteMode::Sync`]: the call waits for the flush (default).
//! - [`WriteMode::Background`]: the flush runs detached, reporting only
//!   through the store's [`events`] observers.
//! - [`WriteMode::Buffered`]: nothing is flushed until an explicit
//!   `flush()`.
//!
//! Dictionaries can persist as one file per store or, with
//! [`Layout::Split`], one file per key with per-key dirty tracking, so a
//! flush only rewrites what changed.
//!
//! # Example
//!
//! ```no_run
//! use cubby::{Registry, WriteMode, Layout};
//! use serde_json::json;
//!
//! let registry = Registry::new("/var/lib/myapp/stores");
//! let sessions = registry.dict("sessions", Layout::Single)?;
//! sessions.set("token", json!("abc"), WriteMode::Sync)?;
//!
//! let users = registry.collection("users")?;
//! users.insert(json!({"name": "ada", "role": "admin"}), WriteMode::Background)?;
//! registry.close()?;
//! # Ok::<(), cubby::CubbyError>(())
//! ```

pub mod codec;
pub mod error;
pub mod events;
pub mod fs;
pub mod locks;
pub mod meta;
pub mod registry;
pub mod store;

pub use codec::Format;
pub use error::{CubbyError, Result};
pub use events::StoreEvent;
pub use locks::{LockGuard, LockKind, LockStats, LockTable};
pub use registry::{Registry, RegistryOptions};
pub use store::{DocStore, KvStore, Layout, WriteMode};
