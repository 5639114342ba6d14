//! Key-value dictionary store.
//!
//! A [`KvStore`] maps string keys to freeform values and persists them in
//! one of two layouts:
//!
//! - [`Layout::Single`]: the whole dictionary is one codec file; any
//!   mutation marks the file modified and the next flush rewrites it.
//! - [`Layout::Split`]: the store is a directory with one codec file per
//!   key, named by the key. A [`DirtyTracker`] records which keys have
//!   pending writes or deletes so a flush touches only those files. Pick
//!   this for large value sets where rewriting everything per mutation
//!   would hurt.
//!
//! Handles are cheap clones sharing one inner state, which is what lets a
//! detached background flush outlive the calling scope.

use crate::codec::{self, Codec};
use crate::error::{CubbyError, Result};
use crate::events::{Observers, StoreEvent};
use crate::locks::LockTable;
use crate::meta::MetaFile;
use crate::store::dirty::{DirtyTracker, PendingState};
use crate::store::write::{self, Flushable, WriteMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistence layout for a dictionary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One codec file holds the whole dictionary.
    #[default]
    Single,
    /// One directory per store, one codec file per key.
    Split,
}

/// String-keyed dictionary store.
#[derive(Debug, Clone)]
pub struct KvStore {
    inner: Arc<KvInner>,
}

#[derive(Debug)]
struct KvInner {
    name: String,
    path: PathBuf,
    /// Normalized lock-table key for `path`.
    key: String,
    layout: Layout,
    codec: Arc<dyn Codec>,
    table: LockTable,
    meta: MetaFile,
    observers: Observers,
    state: Mutex<KvState>,
}

#[derive(Debug, Default)]
struct KvState {
    loaded: bool,
    records: BTreeMap<String, Value>,
    /// Split layout only.
    dirty: DirtyTracker,
    /// Single layout only: whole-file dirty flag.
    modified: bool,
}

impl KvStore {
    /// Create an unloaded store. `path` is the backing file for
    /// [`Layout::Single`] or the backing directory for [`Layout::Split`].
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        layout: Layout,
        codec: Arc<dyn Codec>,
        table: LockTable,
    ) -> Self {
        let path = path.into();
        let key = super::resource_key(&path);
        let meta = MetaFile::for_resource(&path);
        Self {
            inner: Arc::new(KvInner {
                name: name.into(),
                path,
                key,
                layout,
                codec,
                table,
                meta,
                observers: Observers::new(),
                state: Mutex::new(KvState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn layout(&self) -> Layout {
        self.inner.layout
    }

    /// The lock-table key this store serializes disk access on.
    pub fn resource_key(&self) -> &str {
        &self.inner.key
    }

    /// Subscribe to this store's `written`/`error` events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.inner.observers.subscribe()
    }

    /// Populate the store from the backing resource under a reader lock.
    ///
    /// An absent resource loads as an empty dictionary. Loading discards
    /// any previous in-memory state and dirty tracking.
    pub fn load(&self) -> Result<()> {
        let records = {
            let _guard = self.inner.table.acquire_read(&self.inner.key, None)?;
            self.read_backing()?
        };
        let mut state = self.state();
        state.records = records;
        state.dirty.clear();
        state.modified = false;
        state.loaded = true;
        Ok(())
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let state = self.loaded_state()?;
        Ok(state.records.get(key).cloned())
    }

    /// All keys, in sorted order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let state = self.loaded_state()?;
        Ok(state.records.keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        let state = self.loaded_state()?;
        Ok(state.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Set a key, then schedule persistence per `mode`.
    pub fn set(&self, key: &str, value: Value, mode: WriteMode) -> Result<()> {
        {
            let mut state = self.loaded_state()?;
            state.records.insert(key.to_string(), value);
            match self.inner.layout {
                Layout::Split => state.dirty.record_set(key),
                Layout::Single => state.modified = true,
            }
        }
        write::schedule(self, mode)
    }

    /// Delete a key, then schedule persistence per `mode`.
    ///
    /// Returns whether the key was present. Deleting an absent key
    /// schedules nothing.
    pub fn delete(&self, key: &str, mode: WriteMode) -> Result<bool> {
        let removed = {
            let mut state = self.loaded_state()?;
            let removed = state.records.remove(key).is_some();
            if removed {
                match self.inner.layout {
                    Layout::Split => state.dirty.record_delete(key),
                    Layout::Single => state.modified = true,
                }
            }
            removed
        };
        if removed {
            write::schedule(self, mode)?;
        }
        Ok(removed)
    }

    /// Remove every key, then schedule persistence per `mode`.
    pub fn clear(&self, mode: WriteMode) -> Result<()> {
        {
            let mut state = self.loaded_state()?;
            let keys: Vec<String> = state.records.keys().cloned().collect();
            state.records.clear();
            match self.inner.layout {
                // The per-key files have to go, not just the memory.
                Layout::Split => {
                    for key in &keys {
                        state.dirty.record_delete(key);
                    }
                }
                Layout::Single => state.modified = true,
            }
        }
        write::schedule(self, mode)
    }

    /// Flush all pending state to the backing resource.
    ///
    /// Behaves like the sync branch of a mutation regardless of how the
    /// pending state was accumulated: the caller gets the outcome and
    /// observers are notified. A clean store flushes as a no-op without
    /// emitting an event.
    pub fn flush(&self) -> Result<()> {
        self.report(self.run_flush())
    }

    /// Flush a single key's pending state (split layout).
    ///
    /// Writes the key's current value, deletes its file, or does nothing
    /// if the key is clean. Other keys' pending state is untouched. For a
    /// single-file store this is equivalent to a full flush.
    pub fn flush_key(&self, key: &str) -> Result<()> {
        if self.inner.layout != Layout::Split {
            return self.flush();
        }
        self.report(self.run_flush_key(key))
    }

    /// Reload from the backing resource, discarding unflushed memory state
    /// and all dirty tracking.
    pub fn discard(&self) -> Result<()> {
        self.loaded_state()?;
        let records = {
            let _guard = self.inner.table.acquire_read(&self.inner.key, None)?;
            self.read_backing()?
        };
        let mut state = self.state();
        state.records = records;
        state.dirty.clear();
        state.modified = false;
        Ok(())
    }

    /// Delete the backing resource and reset the store to unloaded.
    ///
    /// Idempotent: an absent backing resource is not an error, and
    /// concurrent destroys serialize on the writer lock. A destroyed store
    /// can be loaded again as if newly constructed.
    pub fn destroy(&self) -> Result<()> {
        let _guard = self.inner.table.acquire_write(&self.inner.key, None)?;
        match self.inner.layout {
            Layout::Single => remove_file_if_present(&self.inner.path)?,
            Layout::Split => remove_dir_if_present(&self.inner.path)?,
        }
        self.inner.meta.delete()?;

        let mut state = self.state();
        state.records.clear();
        state.dirty.clear();
        state.modified = false;
        state.loaded = false;
        Ok(())
    }

    /// Notify observers of a flush outcome and pass it through.
    fn report(&self, outcome: Result<bool>) -> Result<()> {
        match outcome {
            Ok(true) => {
                self.inner.observers.notify(StoreEvent::Written {
                    store: self.inner.name.clone(),
                });
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                self.inner.observers.notify(StoreEvent::Error {
                    store: self.inner.name.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run a full flush. Returns whether anything was written.
    ///
    /// Dirty state is drained optimistically before the I/O and restored
    /// on failure, so a failed flush corrupts nothing and a retry
    /// re-persists.
    fn run_flush(&self) -> Result<bool> {
        match self.inner.layout {
            Layout::Single => {
                let snapshot = {
                    let mut state = self.loaded_state()?;
                    if !state.modified {
                        return Ok(false);
                    }
                    state.modified = false;
                    Value::Object(state.records.clone().into_iter().collect())
                };
                let result = self.write_single(&snapshot);
                if result.is_err() {
                    self.state().modified = true;
                }
                result.map(|_| true)
            }
            Layout::Split => {
                let (writes, deletes, values) = {
                    let mut state = self.loaded_state()?;
                    if state.dirty.is_clean() {
                        return Ok(false);
                    }
                    let (writes, deletes) = state.dirty.take_all();
                    let values: Vec<(String, Value)> = writes
                        .iter()
                        .filter_map(|k| state.records.get(k).map(|v| (k.clone(), v.clone())))
                        .collect();
                    (writes, deletes, values)
                };
                let result = self.write_split(&values, &deletes);
                if result.is_err() {
                    self.state().dirty.restore(writes, deletes);
                }
                result.map(|_| true)
            }
        }
    }

    fn run_flush_key(&self, key: &str) -> Result<bool> {
        let (pending, value) = {
            let mut state = self.loaded_state()?;
            (state.dirty.take_key(key), state.records.get(key).cloned())
        };
        let result = match pending {
            PendingState::Clean => return Ok(false),
            PendingState::Write => {
                // A pending write whose value vanished from memory means
                // the key was re-deleted; nothing to persist.
                let Some(value) = value else {
                    return Ok(false);
                };
                self.write_one_key(key, &value)
            }
            PendingState::Delete => self.delete_one_key(key),
        };
        if result.is_err() {
            let mut state = self.state();
            if state.dirty.pending(key) == PendingState::Clean {
                match pending {
                    PendingState::Write => state.dirty.record_set(key),
                    PendingState::Delete => state.dirty.record_delete(key),
                    PendingState::Clean => {}
                }
            }
        }
        result.map(|_| true)
    }

    fn write_single(&self, snapshot: &Value) -> Result<()> {
        let _guard = self.inner.table.acquire_write(&self.inner.key, None)?;
        let bytes = self.inner.codec.encode(snapshot)?;
        crate::fs::atomic_write(&self.inner.path, &bytes)?;
        self.inner.meta.touch()
    }

    fn write_split(&self, values: &[(String, Value)], deletes: &BTreeSet<String>) -> Result<()> {
        let _guard = self.inner.table.acquire_write(&self.inner.key, None)?;
        std::fs::create_dir_all(&self.inner.path).map_err(|e| {
            CubbyError::io(
                format!("failed to create store directory '{}'", self.inner.path.display()),
                e,
            )
        })?;
        for (key, value) in values {
            let bytes = self.inner.codec.encode(value)?;
            crate::fs::atomic_write(self.key_path(key), &bytes)?;
        }
        for key in deletes {
            remove_file_if_present(&self.key_path(key))?;
        }
        self.inner.meta.touch()
    }

    fn write_one_key(&self, key: &str, value: &Value) -> Result<()> {
        let _guard = self.inner.table.acquire_write(&self.inner.key, None)?;
        let bytes = self.inner.codec.encode(value)?;
        crate::fs::atomic_write(self.key_path(key), &bytes)?;
        self.inner.meta.touch()
    }

    fn delete_one_key(&self, key: &str) -> Result<()> {
        let _guard = self.inner.table.acquire_write(&self.inner.key, None)?;
        remove_file_if_present(&self.key_path(key))?;
        self.inner.meta.touch()
    }

    /// Read the backing resource into a fresh record map (no state change).
    fn read_backing(&self) -> Result<BTreeMap<String, Value>> {
        match self.inner.layout {
            Layout::Single => {
                match codec::read_resource(self.inner.codec.as_ref(), &self.inner.path)? {
                    None => Ok(BTreeMap::new()),
                    Some(Value::Object(map)) => Ok(map.into_iter().collect()),
                    Some(_) => Err(CubbyError::Format(format!(
                        "'{}' does not contain an object",
                        self.inner.path.display()
                    ))),
                }
            }
            Layout::Split => {
                let mut records = BTreeMap::new();
                let entries = match std::fs::read_dir(&self.inner.path) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
                    Err(e) => {
                        return Err(CubbyError::io(
                            format!(
                                "failed to read store directory '{}'",
                                self.inner.path.display()
                            ),
                            e,
                        ));
                    }
                };
                let extension = self.inner.codec.extension();
                for entry in entries {
                    let entry = entry.map_err(|e| {
                        CubbyError::io("failed to read store directory entry".to_string(), e)
                    })?;
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                        continue;
                    }
                    let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if let Some(value) = codec::read_resource(self.inner.codec.as_ref(), &path)? {
                        records.insert(key.to_string(), value);
                    }
                }
                Ok(records)
            }
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.inner
            .path
            .join(format!("{}.{}", key, self.inner.codec.extension()))
    }

    fn state(&self) -> MutexGuard<'_, KvState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn loaded_state(&self) -> Result<MutexGuard<'_, KvState>> {
        let state = self.state();
        if !state.loaded {
            return Err(CubbyError::NotLoaded(self.inner.name.clone()));
        }
        Ok(state)
    }
}

impl Flushable for KvStore {
    fn flush_now(&self) -> Result<()> {
        KvStore::flush(self)
    }
}

fn remove_file_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CubbyError::io(
            format!("failed to delete '{}'", path.display()),
            e,
        )),
    }
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CubbyError::io(
            format!("failed to delete '{}'", path.display()),
            e,
        )),
    }
}
