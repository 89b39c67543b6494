//! Last-Write-Wins version ordering.
//!
//! Higher `ts` wins; on a timestamp tie the lexicographically higher
//! `writer_id` wins. Tombstones carry no special weight: they are just
//! records with `deleted = true` and a newer version.

use crate::record::Record;

/// Return the LWW winner of two versions of the same key.
///
/// On a full `(ts, writer_id)` tie the first argument wins, so merging
/// an already-stored version back in never churns the store.
pub fn newer(a: Record, b: Record) -> Record {
    if a.ts > b.ts {
        return a;
    }
    if b.ts > a.ts {
        return b;
    }
    if a.writer_id >= b.writer_id {
        a
    } else {
        b
    }
}

/// Whether two records carry the same version.
pub fn same_version(a: &Record, b: &Record) -> bool {
    a.ts == b.ts && a.writer_id == b.writer_id
}

/// Whether version `(a_ts, a_writer)` strictly wins over `(b_ts, b_writer)`.
pub fn strictly_newer(a_ts: i64, a_writer: &str, b_ts: i64, b_writer: &str) -> bool {
    a_ts > b_ts || (a_ts == b_ts && a_writer > b_writer)
}
