//! Atomic file writes.
//!
//! Pattern: write to a temp file in the target directory, fsync, then
//! rename over the target. On POSIX the rename is atomic when source and
//! destination share a filesystem, which they do here by construction.
//! On crash a stray `.{name}.tmp` file may remain; it is overwritten by
//! the next write.

use crate::error::{CubbyError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file, creating parent directories on demand.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            CubbyError::io(
                format!("failed to create directory '{}'", parent.display()),
                e,
            )
        })?;
    }

    let temp_path = temp_path_for(path)?;
    write_and_sync(&temp_path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        CubbyError::io(
            format!("failed to atomically replace '{}'", path.display()),
            e,
        )
    })?;

    // Persist the directory entry as well.
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Temp file path in the same directory as the target.
fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            CubbyError::Format(format!("invalid resource path '{}'", target.display()))
        })?;
    Ok(parent.join(format!(".{}.tmp", name)))
}

fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        CubbyError::io(format!("failed to create temp file '{}'", path.display()), e)
    })?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        CubbyError::io("failed to write temp file".to_string(), e)
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        CubbyError::io("failed to sync temp file".to_string(), e)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_a_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.json");

        atomic_write(&path, b"{\"x\": 1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"x\": 1}");
    }

    #[test]
    fn replaces_an_existing_file_whole() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.json");
        fs::write(&path, "old content that is longer").unwrap();

        atomic_write(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a").join("b").join("data.json");

        atomic_write(&path, b"nested").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "nested");
    }

    #[test]
    fn leaves_no_temp_file_behind() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.json");

        atomic_write(&path, b"content").unwrap();

        assert!(!temp_dir.path().join(".data.json.tmp").exists());
    }

    #[test]
    fn writing_over_a_directory_fails_with_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.json");
        fs::create_dir(&path).unwrap();

        let err = atomic_write(&path, b"content").unwrap_err();
        assert!(matches!(err, CubbyError::Io { .. }));
    }
}
