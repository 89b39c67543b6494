//! The single-node authoritative record map.
//!
//! `MemStore` enforces LWW on every write and keeps at most one record
//! per key: the maximum version it has observed. Writes append the
//! winner to the attached WAL before they are acknowledged; the map lock
//! is never held across network I/O.

use crate::lww;
use crate::record::{Meta, Record};
use crate::snapshot::{self, SnapshotError};
use crate::wal::{Wal, WalError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// In-memory LWW store with optional WAL-backed durability.
#[derive(Debug, Default)]
pub struct MemStore {
    m: RwLock<HashMap<String, Record>>,
    wal: Mutex<Option<Wal>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recover state from disk: bulk-load the snapshot (if any), replay
    /// the WAL through the LWW merge, then open the WAL for appends.
    ///
    /// A crash during recovery is safe to rerun: nothing is written
    /// until the WAL is reattached at the end.
    pub fn recover(&self, snap_path: &Path, wal_path: &Path) -> Result<(), StoreError> {
        if let Some(m) = snapshot::load(snap_path)? {
            self.load_all(m);
        }
        for record in Wal::replay(wal_path)? {
            self.apply_lww(record);
        }
        self.attach_wal(Wal::open(wal_path)?);
        Ok(())
    }

    /// Attach a WAL; subsequent `put_lww` calls append winners to it.
    pub fn attach_wal(&self, wal: Wal) {
        *self.wal.lock() = Some(wal);
    }

    /// The stored record for `key`, tombstones included.
    pub fn get(&self, key: &str) -> Option<Record> {
        self.m.read().get(key).cloned()
    }

    /// Number of keys held (tombstones included).
    pub fn len(&self) -> usize {
        self.m.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.read().is_empty()
    }

    /// Merge a record under LWW and persist the winner to the WAL.
    ///
    /// No-ops (the incoming version loses, or equals the stored record
    /// byte for byte) skip the WAL. A WAL append failure aborts the
    /// mutation so an unacknowledged write is never observable.
    pub fn put_lww(&self, record: Record) -> Result<Record, StoreError> {
        let mut m = self.m.write();

        let Some(current) = m.get(&record.key).cloned() else {
            self.append_wal(&record)?;
            m.insert(record.key.clone(), record.clone());
            return Ok(record);
        };

        let winner = lww::newer(current.clone(), record);
        if winner.ts == current.ts
            && winner.writer_id == current.writer_id
            && winner.deleted == current.deleted
            && winner.value == current.value
        {
            return Ok(current);
        }

        self.append_wal(&winner)?;
        m.insert(winner.key.clone(), winner.clone());
        Ok(winner)
    }

    /// Merge a record under LWW without touching the WAL.
    ///
    /// Used during startup replay, where the log is the source.
    pub fn apply_lww(&self, record: Record) -> Record {
        let mut m = self.m.write();
        let winner = match m.get(&record.key).cloned() {
            Some(current) => lww::newer(current, record),
            None => record,
        };
        m.insert(winner.key.clone(), winner.clone());
        winner
    }

    /// Snapshot copy of key -> version metadata for anti-entropy.
    pub fn keys_meta(&self) -> HashMap<String, Meta> {
        self.m
            .read()
            .iter()
            .map(|(k, r)| (k.clone(), r.meta()))
            .collect()
    }

    /// Whole-state copy; snapshot logic only.
    pub fn dump_all(&self) -> HashMap<String, Record> {
        self.m.read().clone()
    }

    /// Whole-state replace; snapshot logic only.
    pub fn load_all(&self, m: HashMap<String, Record>) {
        *self.m.write() = m;
    }

    /// Serialize the entire map to `snap_path`, then truncate the WAL.
    ///
    /// Holds the write lock for the duration, blocking writers; snapshots
    /// are operator-scheduled so the pause is acceptable.
    pub fn snapshot_and_reset_wal(&self, snap_path: &Path) -> Result<(), StoreError> {
        let m = self.m.write();
        let bytes = serde_json::to_vec(&*m).map_err(|e| SnapshotError::Serde(e))?;
        snapshot::write_atomic(snap_path, &bytes)?;
        if let Some(wal) = self.wal.lock().as_mut() {
            wal.truncate()?;
        }
        Ok(())
    }

    /// (appends since open, file size) of the attached WAL.
    pub fn wal_stats(&self) -> (u64, u64) {
        self.wal.lock().as_ref().map_or((0, 0), |w| w.stats())
    }

    pub fn wal_path(&self) -> Option<PathBuf> {
        self.wal.lock().as_ref().map(|w| w.path().to_path_buf())
    }

    fn append_wal(&self, record: &Record) -> Result<(), StoreError> {
        if let Some(wal) = self.wal.lock().as_mut() {
            wal.append(record)?;
        }
        Ok(())
    }
}
