//! Versioned record format.
//!
//! A `Record` is the sole unit of replicated state: one version of one
//! key, with the originating coordinator's timestamp and writer id.
//! Deletes are tombstones (`deleted = true`) so they replicate and merge
//! like any other write.

use serde::{Deserialize, Serialize};

/// A versioned key-value record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The key (opaque, non-empty).
    pub key: String,
    /// Value bytes; ignored when `deleted` is set. Base64 on the wire
    /// and in persisted files.
    #[serde(with = "value_b64", default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<u8>,
    /// Wall-clock nanoseconds assigned by the originating coordinator.
    pub ts: i64,
    /// Id of the node that originated this version.
    pub writer_id: String,
    /// Tombstone flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

/// Projection of a record to its version metadata, used by anti-entropy
/// to compare keys without shipping values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub ts: i64,
    pub writer_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl Record {
    /// Create a live record.
    pub fn new(key: String, value: Vec<u8>, ts: i64, writer_id: String) -> Self {
        Self {
            key,
            value,
            ts,
            writer_id,
            deleted: false,
        }
    }

    /// Create a tombstone.
    pub fn tombstone(key: String, ts: i64, writer_id: String) -> Self {
        Self {
            key,
            value: Vec::new(),
            ts,
            writer_id,
            deleted: true,
        }
    }

    /// The metadata projection of this record.
    pub fn meta(&self) -> Meta {
        Meta {
            ts: self.ts,
            writer_id: self.writer_id.clone(),
            deleted: self.deleted,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Serde adapter: `Vec<u8>` as a base64 string, so values survive JSON.
mod value_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
