//! Write-ahead log for the record store.
//!
//! Format: one JSON-serialized record per line. Every append is fsynced
//! before the write is acknowledged. On replay a trailing line without a
//! newline is treated as a torn write and ignored.

use crate::record::Record;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("wal I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("wal serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// An append-only log of accepted LWW winners.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
    ops: u64,
    bytes: u64,
}

impl Wal {
    /// Open or create a WAL file at the given path.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            ops: 0,
            bytes,
        })
    }

    /// Append one record and fsync.
    pub fn append(&mut self, record: &Record) -> Result<(), WalError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        self.file.write_all(&line)?;
        self.file.sync_all()?;

        self.ops += 1;
        self.bytes += line.len() as u64;
        Ok(())
    }

    /// Replay all complete entries from a WAL file, in order.
    ///
    /// A missing file is an empty log. Blank lines and records with an
    /// empty key are skipped; a torn final line stops the replay.
    pub fn replay(path: &Path) -> Result<Vec<Record>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WalError::Io(e)),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                tracing::warn!(path = %path.display(), "wal ends in a partial line, ignoring it");
                break;
            }
            let line = &buf[..buf.len() - 1];
            if line.is_empty() {
                continue;
            }
            let record: Record = serde_json::from_slice(line)?;
            if record.key.is_empty() {
                continue;
            }
            records.push(record);
        }

        Ok(records)
    }

    /// Durably replace the log with an empty one and reset counters.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        let empty = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        empty.sync_all()?;
        drop(empty);

        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.ops = 0;
        self.bytes = 0;
        Ok(())
    }

    /// (appends since open, file size in bytes).
    pub fn stats(&self) -> (u64, u64) {
        (self.ops, self.bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
