//! Durable queue of writes owed to temporarily unreachable peers.
//!
//! For each (target node, key) the manager keeps exactly one record: the
//! LWW winner of every hint observed for that pair. Mutations are logged
//! to an append-only WAL of `add`/`del` JSON lines; the log is a
//! reconstructable key-value log, not a queue, so compaction may rewrite
//! it from the in-memory map at any time.

use driftdb_storage::lww;
use driftdb_storage::record::Record;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Compact once the WAL has this many appends...
const COMPACT_OPS: u64 = 2_000;
/// ...or has grown this large...
const COMPACT_BYTES: u64 = 1 << 20;
/// ...but no more often than this.
const COMPACT_MIN_GAP: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum HintError {
    #[error("hint wal I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("hint wal serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    op: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    target: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    key: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    ts: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    writer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record: Option<Record>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl WalEntry {
    fn add(target: &str, record: Record) -> Self {
        Self {
            op: "add".into(),
            target: target.into(),
            key: String::new(),
            ts: 0,
            writer_id: String::new(),
            record: Some(record),
        }
    }

    fn del(target: &str, key: &str, ts: i64, writer_id: &str) -> Self {
        Self {
            op: "del".into(),
            target: target.into(),
            key: key.into(),
            ts,
            writer_id: writer_id.into(),
            record: None,
        }
    }
}

#[derive(Debug)]
struct HintWal {
    path: PathBuf,
    file: File,
    ops: u64,
    bytes: u64,
    last_compact: Option<Instant>,
}

type HintMap = HashMap<String, HashMap<String, Record>>;

/// Durable per-target hint queue.
///
/// Lock order is always map before WAL; WAL appends complete before the
/// mutation is observable as committed.
#[derive(Debug, Default)]
pub struct HintManager {
    m: Mutex<HintMap>,
    wal: Mutex<Option<HintWal>>,
}

impl HintManager {
    /// An in-memory manager with no durability; tests and disabled-WAL
    /// configurations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a persistent manager: replay the WAL at `path` (if any) into
    /// memory, then append future updates to it.
    pub fn open(path: &Path) -> Result<Self, HintError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut m = HintMap::new();
        replay_into(path, &mut m)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let bytes = file.metadata().map(|md| md.len()).unwrap_or(0);

        Ok(Self {
            m: Mutex::new(m),
            wal: Mutex::new(Some(HintWal {
                path: path.to_path_buf(),
                file,
                ops: 0,
                bytes,
                last_compact: None,
            })),
        })
    }

    /// Queue a record for `target`, keeping the LWW winner per key.
    /// Only changes to the stored winner touch the WAL.
    pub fn add(&self, target: &str, record: Record) -> Result<(), HintError> {
        if target.is_empty() || record.key.is_empty() {
            return Ok(());
        }

        let mut m = self.m.lock();
        if add_entry(&mut m, target, record.clone()) {
            self.append(WalEntry::add(target, record))?;
            driftdb_metrics::metrics().hints_stored.inc();
        }
        Ok(())
    }

    /// Remove the hint for (target, key) only if it still carries the
    /// delivered version; a newer hint queued since delivery survives.
    pub fn delete_if_same(&self, target: &str, key: &str, record: &Record) -> Result<(), HintError> {
        if target.is_empty() || key.is_empty() {
            return Ok(());
        }

        let mut m = self.m.lock();
        if del_entry(&mut m, target, key, record.ts, &record.writer_id) {
            self.append(WalEntry::del(target, key, record.ts, &record.writer_id))?;
        }
        Ok(())
    }

    /// Node ids with pending hints.
    pub fn targets(&self) -> Vec<String> {
        self.m.lock().keys().cloned().collect()
    }

    /// Pending records for one target.
    pub fn records_for(&self, target: &str) -> Vec<Record> {
        self.m
            .lock()
            .get(target)
            .map(|by_key| by_key.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total pending hints across all targets.
    pub fn count(&self) -> usize {
        self.m.lock().values().map(HashMap::len).sum()
    }

    pub fn wal_path(&self) -> Option<PathBuf> {
        self.wal.lock().as_ref().map(|w| w.path.clone())
    }

    /// Rewrite the WAL as `add` entries for exactly the current hints,
    /// once it has grown past the threshold and the previous compaction
    /// is not too recent.
    pub fn maybe_compact(&self) -> Result<(), HintError> {
        let m = self.m.lock();
        let mut wal_guard = self.wal.lock();
        let Some(wal) = wal_guard.as_mut() else {
            return Ok(());
        };

        if wal.ops < COMPACT_OPS && wal.bytes < COMPACT_BYTES {
            return Ok(());
        }
        if let Some(t) = wal.last_compact {
            if t.elapsed() < COMPACT_MIN_GAP {
                return Ok(());
            }
        }

        let tmp = {
            let mut os = wal.path.as_os_str().to_os_string();
            os.push(".tmp");
            PathBuf::from(os)
        };

        let rewrite = (|| -> Result<(), HintError> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for (target, by_key) in m.iter() {
                for record in by_key.values() {
                    let mut line = serde_json::to_vec(&WalEntry::add(target, record.clone()))?;
                    line.push(b'\n');
                    writer.write_all(&line)?;
                }
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();
        if let Err(e) = rewrite {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        // Replace across platforms; loaders tolerate a missing file.
        let _ = fs::remove_file(&wal.path);
        fs::rename(&tmp, &wal.path)?;

        wal.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal.path)?;
        wal.bytes = wal.file.metadata().map(|md| md.len()).unwrap_or(0);
        wal.ops = 0;
        wal.last_compact = Some(Instant::now());
        Ok(())
    }

    fn append(&self, entry: WalEntry) -> Result<(), HintError> {
        let mut wal_guard = self.wal.lock();
        let Some(wal) = wal_guard.as_mut() else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        wal.file.write_all(&line)?;
        wal.file.sync_all()?;
        wal.ops += 1;
        wal.bytes += line.len() as u64;
        Ok(())
    }
}

/// Insert under LWW; returns whether the stored winner changed.
fn add_entry(m: &mut HintMap, target: &str, record: Record) -> bool {
    if target.is_empty() || record.key.is_empty() {
        return false;
    }
    let by_key = m.entry(target.to_string()).or_default();
    match by_key.get(&record.key) {
        Some(current) => {
            let (cur_ts, cur_writer) = (current.ts, current.writer_id.clone());
            let winner = lww::newer(current.clone(), record);
            if winner.ts != cur_ts || winner.writer_id != cur_writer {
                by_key.insert(winner.key.clone(), winner);
                true
            } else {
                false
            }
        }
        None => {
            by_key.insert(record.key.clone(), record);
            true
        }
    }
}

/// Remove only on an exact version match; returns whether anything was
/// removed.
fn del_entry(m: &mut HintMap, target: &str, key: &str, ts: i64, writer_id: &str) -> bool {
    let Some(by_key) = m.get_mut(target) else {
        return false;
    };
    let matches = by_key
        .get(key)
        .is_some_and(|cur| cur.ts == ts && cur.writer_id == writer_id);
    if !matches {
        return false;
    }
    by_key.remove(key);
    if by_key.is_empty() {
        m.remove(target);
    }
    true
}

/// Replay a hint WAL into `m`. `add` goes through the same LWW
/// discipline as live adds and `del` only removes on a version match, so
/// replay is idempotent and a newer `add` survives an older `del`.
/// Unknown ops are skipped for forward compatibility; a torn final line
/// is ignored.
fn replay_into(path: &Path, m: &mut HintMap) -> Result<(), HintError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(HintError::Io(e)),
    };

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            tracing::warn!(path = %path.display(), "hint wal ends in a partial line, ignoring it");
            break;
        }
        let line = &buf[..buf.len() - 1];
        if line.is_empty() {
            continue;
        }
        let entry: WalEntry = serde_json::from_slice(line)?;
        match entry.op.as_str() {
            "add" => {
                if let Some(record) = entry.record {
                    add_entry(m, &entry.target, record);
                }
            }
            "del" => {
                del_entry(m, &entry.target, &entry.key, entry.ts, &entry.writer_id);
            }
            _ => {}
        }
    }
    Ok(())
}
