//! Ordered document collection store.
//!
//! A [`DocStore`] keeps an ordered sequence of freeform documents backed by
//! a single codec file (an array at the top level). Queries are a plain
//! linear scan with subset matching on top-level fields; updates merge
//! changed fields into matching documents, last writer wins per field.

use crate::codec::{self, Codec};
use crate::error::{CubbyError, Result};
use crate::events::{Observers, StoreEvent};
use crate::locks::LockTable;
use crate::meta::MetaFile;
use crate::store::write::{self, Flushable, WriteMode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

/// Ordered collection of documents.
#[derive(Debug, Clone)]
pub struct DocStore {
    inner: Arc<DocInner>,
}

#[derive(Debug)]
struct DocInner {
    name: String,
    path: PathBuf,
    key: String,
    codec: Arc<dyn Codec>,
    table: LockTable,
    meta: MetaFile,
    observers: Observers,
    state: Mutex<DocState>,
}

#[derive(Debug, Default)]
struct DocState {
    loaded: bool,
    docs: Vec<Value>,
    modified: bool,
}

impl DocStore {
    /// Create an unloaded collection backed by the given file.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        codec: Arc<dyn Codec>,
        table: LockTable,
    ) -> Self {
        let path = path.into();
        let key = super::resource_key(&path);
        let meta = MetaFile::for_resource(&path);
        Self {
            inner: Arc::new(DocInner {
                name: name.into(),
                path,
                key,
                codec,
                table,
                meta,
                observers: Observers::new(),
                state: Mutex::new(DocState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The lock-table key this store serializes disk access on.
    pub fn resource_key(&self) -> &str {
        &self.inner.key
    }

    /// Subscribe to this store's `written`/`error` events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.inner.observers.subscribe()
    }

    /// Populate the collection from the backing file under a reader lock.
    /// An absent file loads as an empty collection.
    pub fn load(&self) -> Result<()> {
        let docs = {
            let _guard = self.inner.table.acquire_read(&self.inner.key, None)?;
            self.read_backing()?
        };
        let mut state = self.state();
        state.docs = docs;
        state.modified = false;
        state.loaded = true;
        Ok(())
    }

    /// All documents, in insertion order.
    pub fn all(&self) -> Result<Vec<Value>> {
        let state = self.loaded_state()?;
        Ok(state.docs.clone())
    }

    pub fn len(&self) -> Result<usize> {
        let state = self.loaded_state()?;
        Ok(state.docs.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Documents whose top-level fields are a superset of `filter`.
    /// An empty filter matches every document.
    pub fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        let state = self.loaded_state()?;
        Ok(state
            .docs
            .iter()
            .filter(|doc| matches(doc, filter))
            .cloned()
            .collect())
    }

    /// Append a document, then schedule persistence per `mode`.
    pub fn insert(&self, doc: Value, mode: WriteMode) -> Result<()> {
        {
            let mut state = self.loaded_state()?;
            state.docs.push(doc);
            state.modified = true;
        }
        write::schedule(self, mode)
    }

    /// Merge `changes` into every document matching `filter`, last writer
    /// wins per field. Returns the match count; zero matches schedules
    /// nothing.
    pub fn update(&self, filter: &Value, changes: &Value, mode: WriteMode) -> Result<usize> {
        let updated = {
            let mut state = self.loaded_state()?;
            let mut updated = 0;
            for doc in state.docs.iter_mut() {
                if matches(doc, filter) {
                    merge_fields(doc, changes);
                    updated += 1;
                }
            }
            if updated > 0 {
                state.modified = true;
            }
            updated
        };
        if updated > 0 {
            write::schedule(self, mode)?;
        }
        Ok(updated)
    }

    /// Remove every document matching `filter`, preserving the order of
    /// the rest. Returns the removed count.
    pub fn remove(&self, filter: &Value, mode: WriteMode) -> Result<usize> {
        let removed = {
            let mut state = self.loaded_state()?;
            let before = state.docs.len();
            state.docs.retain(|doc| !matches(doc, filter));
            let removed = before - state.docs.len();
            if removed > 0 {
                state.modified = true;
            }
            removed
        };
        if removed > 0 {
            write::schedule(self, mode)?;
        }
        Ok(removed)
    }

    /// Flush the full collection to the backing file if modified.
    pub fn flush(&self) -> Result<()> {
        let outcome = self.run_flush();
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

    /// Reload from the backing file, discarding unflushed memory state.
    pub fn discard(&self) -> Result<()> {
        self.loaded_state()?;
        let docs = {
            let _guard = self.inner.table.acquire_read(&self.inner.key, None)?;
            self.read_backing()?
        };
        let mut state = self.state();
        state.docs = docs;
        state.modified = false;
        Ok(())
    }

    /// Delete the backing file and reset the store to unloaded.
    /// Idempotent: an absent backing file is not an error.
    pub fn destroy(&self) -> Result<()> {
        let _guard = self.inner.table.acquire_write(&self.inner.key, None)?;
        match std::fs::remove_file(&self.inner.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CubbyError::io(
                    format!("failed to delete '{}'", self.inner.path.display()),
                    e,
                ));
            }
        }
        self.inner.meta.delete()?;

        let mut state = self.state();
        state.docs.clear();
        state.modified = false;
        state.loaded = false;
        Ok(())
    }

    fn run_flush(&self) -> Result<bool> {
        let snapshot = {
            let mut state = self.loaded_state()?;
            if !state.modified {
                return Ok(false);
            }
            state.modified = false;
            Value::Array(state.docs.clone())
        };
        let result = (|| {
            let _guard = self.inner.table.acquire_write(&self.inner.key, None)?;
            let bytes = self.inner.codec.encode(&snapshot)?;
            crate::fs::atomic_write(&self.inner.path, &bytes)?;
            self.inner.meta.touch()
        })();
        if result.is_err() {
            self.state().modified = true;
        }
        result.map(|_| true)
    }

    fn read_backing(&self) -> Result<Vec<Value>> {
        match codec::read_resource(self.inner.codec.as_ref(), &self.inner.path)? {
            None => Ok(Vec::new()),
            Some(Value::Array(docs)) => Ok(docs),
            Some(_) => Err(CubbyError::Format(format!(
                "'{}' does not contain an array",
                self.inner.path.display()
            ))),
        }
    }

    fn state(&self) -> MutexGuard<'_, DocState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn loaded_state(&self) -> Result<MutexGuard<'_, DocState>> {
        let state = self.state();
        if !state.loaded {
            return Err(CubbyError::NotLoaded(self.inner.name.clone()));
        }
        Ok(state)
    }
}

impl Flushable for DocStore {
    fn flush_now(&self) -> Result<()> {
        DocStore::flush(self)
    }
}

/// Subset match on top-level fields. Non-object documents never match.
fn matches(doc: &Value, filter: &Value) -> bool {
    let (Some(doc), Some(filter)) = (doc.as_object(), filter.as_object()) else {
        return false;
    };
    filter.iter().all(|(field, expected)| doc.get(field) == Some(expected))
}

/// Merge `changes` fields into `doc`, overwriting existing fields.
fn merge_fields(doc: &mut Value, changes: &Value) {
    if let (Some(doc), Some(changes)) = (doc.as_object_mut(), changes.as_object()) {
        for (field, value) in changes {
            doc.insert(field.clone(), value.clone());
        }
    }
}
