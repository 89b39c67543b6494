//! Failure-injecting `ReplicaClient` wrapper for tests.
//!
//! Wraps a real client and refuses calls to any node id in a shared
//! down-set, so multi-node tests can stop and restart peers without
//! real processes.

use crate::replica_client::{ReplicaClient, ReplicaError};
use driftdb_common::NodeInfo;
use driftdb_storage::record::{Meta, Record};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A shared set of unreachable node ids.
pub type DownSet = Arc<Mutex<HashSet<String>>>;

pub fn down_set() -> DownSet {
    Arc::new(Mutex::new(HashSet::new()))
}

#[derive(Debug)]
pub struct ChaosReplicaClient<C> {
    inner: C,
    down: DownSet,
}

impl<C> ChaosReplicaClient<C> {
    pub fn new(inner: C, down: DownSet) -> Self {
        Self { inner, down }
    }

    fn check(&self, target: &NodeInfo) -> Result<(), ReplicaError> {
        if self.down.lock().contains(&target.id) {
            Err(ReplicaError::Transport(format!(
                "chaos: node {} is down",
                target.id
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl<C: ReplicaClient> ReplicaClient for ChaosReplicaClient<C> {
    async fn replica_put(
        &self,
        target: &NodeInfo,
        record: &Record,
        hint_for: &str,
    ) -> Result<(), ReplicaError> {
        self.check(target)?;
        self.inner.replica_put(target, record, hint_for).await
    }

    async fn replica_get(
        &self,
        target: &NodeInfo,
        key: &str,
    ) -> Result<Option<Record>, ReplicaError> {
        self.check(target)?;
        self.inner.replica_get(target, key).await
    }

    async fn replica_keys(
        &self,
        target: &NodeInfo,
    ) -> Result<HashMap<String, Meta>, ReplicaError> {
        self.check(target)?;
        self.inner.replica_keys(target).await
    }
}
