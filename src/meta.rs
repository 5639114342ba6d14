//! Metadata side-files.
//!
//! Each backing resource gets a sidecar `<name>.meta.json` next to it,
//! recording when the resource was first and last written and by whom
//! (`user@HOST`). The store core only drives two hooks: `touch` after every
//! successful flush and `delete` as part of destroying a store.

use crate::error::{CubbyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Timestamps and provenance for one backing resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    /// When the resource was first flushed (RFC3339).
    pub created_at: DateTime<Utc>,

    /// When the resource was last flushed (RFC3339).
    pub updated_at: DateTime<Utc>,

    /// Who performed the last flush (e.g., `user@HOST`).
    pub writer: String,
}

/// Handle to the sidecar file of one backing resource.
#[derive(Debug, Clone)]
pub struct MetaFile {
    path: PathBuf,
}

impl MetaFile {
    /// Sidecar for the given backing file or directory.
    pub fn for_resource(resource: &Path) -> Self {
        let name = resource
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("resource");
        let file = format!("{}.meta.json", name);
        let path = match resource.parent() {
            Some(parent) => parent.join(&file),
            None => PathBuf::from(&file),
        };
        Self { path }
    }

    /// Path of the sidecar file itself.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the sidecar, mapping a missing file to `None`.
    pub fn read(&self) -> Result<Option<Meta>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CubbyError::io(
                    format!("failed to read metadata '{}'", self.path.display()),
                    e,
                ));
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| {
                CubbyError::Format(format!(
                    "failed to parse metadata '{}': {}",
                    self.path.display(),
                    e
                ))
            })
    }

    /// Record a successful flush: keep `created_at` if the sidecar already
    /// exists (an unreadable sidecar is rewritten from scratch), bump
    /// `updated_at`, and stamp the writer.
    pub fn touch(&self) -> Result<()> {
        let now = Utc::now();
        let created_at = self
            .read()
            .ok()
            .flatten()
            .map(|meta| meta.created_at)
            .unwrap_or(now);

        let meta = Meta {
            created_at,
            updated_at: now,
            writer: writer_string(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| CubbyError::Format(format!("failed to serialize metadata: {}", e)))?;
        crate::fs::atomic_write(&self.path, json.as_bytes())
    }

    /// Remove the sidecar. A missing sidecar is not an error.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CubbyError::io(
                format!("failed to delete metadata '{}'", self.path.display()),
                e,
            )),
        }
    }
}

/// Get the writer string for metadata provenance.
fn writer_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
