//! Top-level registry facade.
//!
//! A [`Registry`] maps store names to live store instances under one root
//! directory and hands every store the same [`LockTable`], so two stores
//! (or a store and external code) touching the same path serialize their
//! disk access. Bulk operations are pure composition over the stores'
//! public API.
//!
//! Nothing here is a process-wide singleton: construct as many independent
//! registries as you like (each with its own or a shared lock table),
//! which is what keeps tests hermetic.

use crate::codec::Format;
use crate::error::{CubbyError, Result};
use crate::locks::LockTable;
use crate::store::{DocStore, KvStore, Layout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Registry configuration.
///
/// Serde-deserializable with defaults for every field, so a partial YAML
/// config parses and unknown fields are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOptions {
    /// On-disk format for every store opened through this registry.
    pub format: Format,

    /// Default lock-request timeout, in seconds.
    pub lock_timeout_secs: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            format: Format::Json,
            lock_timeout_secs: 5,
        }
    }
}

impl RegistryOptions {
    /// Load options from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CubbyError::io(format!("failed to read options '{}'", path.display()), e)
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            CubbyError::Format(format!("failed to parse options '{}': {}", path.display(), e))
        })
    }
}

/// Named store instances sharing one root directory and one lock table.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
    format: Format,
    table: LockTable,
    stores: Mutex<BTreeMap<String, Handle>>,
}

#[derive(Debug, Clone)]
enum Handle {
    Collection(DocStore),
    Dict(KvStore),
}

impl Handle {
    fn flush(&self) -> Result<()> {
        match self {
            Handle::Collection(store) => store.flush(),
            Handle::Dict(store) => store.flush(),
        }
    }

    fn discard(&self) -> Result<()> {
        match self {
            Handle::Collection(store) => store.discard(),
            Handle::Dict(store) => store.discard(),
        }
    }
}

impl Registry {
    /// Create a registry with default options.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, RegistryOptions::default())
    }

    /// Create a registry with the given options and a fresh lock table.
    pub fn with_options(root: impl Into<PathBuf>, options: RegistryOptions) -> Self {
        let table = LockTable::with_timeout(Duration::from_secs(options.lock_timeout_secs));
        Self::with_lock_table(root, options, table)
    }

    /// Create a registry that shares an existing lock table, enabling
    /// cross-registry sequencing on the same paths. The table keeps its
    /// own default timeout; `options.lock_timeout_secs` does not apply.
    pub fn with_lock_table(
        root: impl Into<PathBuf>,
        options: RegistryOptions,
        table: LockTable,
    ) -> Self {
        Self {
            root: root.into(),
            format: options.format,
            table,
            stores: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The lock table shared by every store of this registry.
    pub fn lock_table(&self) -> &LockTable {
        &self.table
    }

    /// Open (and load) the named document collection, backed by
    /// `<root>/<name>.<ext>`. Reopening a name returns the existing
    /// instance.
    pub fn collection(&self, name: &str) -> Result<DocStore> {
        let mut stores = self.lock_stores();
        match stores.get(name) {
            Some(Handle::Collection(store)) => return Ok(store.clone()),
            Some(Handle::Dict(_)) => {
                return Err(CubbyError::Usage(format!(
                    "store '{}' is already open as a dictionary",
                    name
                )));
            }
            None => {}
        }

        let path = self.root.join(format!("{}.{}", name, self.format.codec().extension()));
        let store = DocStore::new(name, path, self.format.codec(), self.table.clone());
        store.load()?;
        stores.insert(name.to_string(), Handle::Collection(store.clone()));
        Ok(store)
    }

    /// Open (and load) the named dictionary store.
    ///
    /// [`Layout::Single`] is backed by `<root>/<name>.<ext>`,
    /// [`Layout::Split`] by the directory `<root>/<name>`. Reopening a name
    /// returns the existing instance; asking for a different layout than it
    /// was opened with is an error.
    pub fn dict(&self, name: &str, layout: Layout) -> Result<KvStore> {
        let mut stores = self.lock_stores();
        match stores.get(name) {
            Some(Handle::Dict(store)) => {
                if store.layout() != layout {
                    return Err(CubbyError::Usage(format!(
                        "store '{}' is already open with a different layout",
                        name
                    )));
                }
                return Ok(store.clone());
            }
            Some(Handle::Collection(_)) => {
                return Err(CubbyError::Usage(format!(
                    "store '{}' is already open as a collection",
                    name
                )));
            }
            None => {}
        }

        let path = match layout {
            Layout::Single => self
                .root
                .join(format!("{}.{}", name, self.format.codec().extension())),
            Layout::Split => self.root.join(name),
        };
        let store = KvStore::new(name, path, layout, self.format.codec(), self.table.clone());
        store.load()?;
        stores.insert(name.to_string(), Handle::Dict(store.clone()));
        Ok(store)
    }

    /// Flush every open store. Every store is attempted; the first error
    /// is returned.
    pub fn sync_all(&self) -> Result<()> {
        self.for_each(Handle::flush)
    }

    /// Discard unflushed state in every open store, reloading each from
    /// its backing resource.
    pub fn discard_all(&self) -> Result<()> {
        self.for_each(Handle::discard)
    }

    /// Flush every open store, then forget the handles. Stores can be
    /// reopened afterwards as if the registry were fresh.
    pub fn close(&self) -> Result<()> {
        let result = self.sync_all();
        self.lock_stores().clear();
        result
    }

    fn for_each(&self, op: impl Fn(&Handle) -> Result<()>) -> Result<()> {
        let handles: Vec<Handle> = self.lock_stores().values().cloned().collect();
        let mut first_err = None;
        for handle in &handles {
            if let Err(e) = op(handle)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock_stores(&self) -> MutexGuard<'_, BTreeMap<String, Handle>> {
        self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
