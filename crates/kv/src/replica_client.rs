//! Abstraction over node-to-node replica calls.
//!
//! A trait in the domain crate with the HTTP implementation in
//! `driftdb-net`; unit tests use mocks, integration tests an in-memory
//! registry. Self-dispatch is handled by the coordinator, so
//! implementations only ever talk to remote peers.

use driftdb_common::NodeInfo;
use driftdb_storage::record::{Meta, Record};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("timed out")]
    Timeout,
    #[error("storage: {0}")]
    Storage(String),
}

/// Transport for the internal replica endpoints.
#[async_trait::async_trait]
pub trait ReplicaClient: Send + Sync + 'static {
    /// Apply a record on `target` via its replica-put endpoint. A
    /// non-empty `hint_for` asks the target to also queue the record as
    /// a hint for that node.
    async fn replica_put(
        &self,
        target: &NodeInfo,
        record: &Record,
        hint_for: &str,
    ) -> Result<(), ReplicaError>;

    /// Read `target`'s local record for `key`, without merging.
    async fn replica_get(
        &self,
        target: &NodeInfo,
        key: &str,
    ) -> Result<Option<Record>, ReplicaError>;

    /// Snapshot of `target`'s key metadata, for anti-entropy.
    async fn replica_keys(
        &self,
        target: &NodeInfo,
    ) -> Result<HashMap<String, Meta>, ReplicaError>;
}
