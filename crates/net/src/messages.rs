//! Wire messages for the internal peer endpoints.

use driftdb_storage::record::{Meta, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `POST /internal/put`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub record: Record,
    /// When non-empty, the receiver also queues `record` as a hint for
    /// this node id (sloppy-quorum fallback writes).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hint_for: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutResponse {
    pub ok: bool,
}

/// `POST /internal/get`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
}

/// `POST /internal/keys`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysResponse {
    pub keys: HashMap<String, Meta>,
}
