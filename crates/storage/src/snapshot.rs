//! Full-state snapshot files.
//!
//! A snapshot is the whole record map serialized as one JSON object.
//! Writes go to a temp file, fsync, then remove-then-rename; loaders
//! treat a missing snapshot as empty, which makes the brief window
//! between remove and rename recoverable.

use crate::record::Record;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot decode error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Load a snapshot, returning `None` when the file does not exist.
pub fn load(path: &Path) -> Result<Option<HashMap<String, Record>>, SnapshotError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SnapshotError::Io(e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Durably write `data` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), SnapshotError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let tmp = tmp_path(path);
    let result = (|| {
        let mut f = File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
        drop(f);

        // Rename-over-existing is not portable; remove first.
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
