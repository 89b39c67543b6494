//! Quorum coordinator: executes client PUT/DELETE/GET against the
//! replica set for a key.
//!
//! Writes fan out to the N preferred replicas in parallel and succeed at
//! W acks; a shortfall is made up from fallback nodes further around the
//! ring, each carrying a hint for the preferred replica it stands in for
//! (sloppy quorum). Reads fan out to the preferred replicas only, need R
//! successes, resolve the LWW winner, and asynchronously repair stale or
//! missing copies.

use crate::hints::HintManager;
use crate::replica_client::{ReplicaClient, ReplicaError};
use crate::ring::Ring;
use driftdb_common::{now_ns, NodeInfo};
use driftdb_storage::lww;
use driftdb_storage::record::Record;
use driftdb_storage::store::MemStore;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{timeout_at, Duration, Instant};

/// Quorum and replication configuration, validated at startup.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Replica count (N).
    pub n: usize,
    /// Read quorum (R).
    pub r: usize,
    /// Write quorum (W).
    pub w: usize,
    /// Cluster size; the full ring walk for sloppy-quorum fallbacks.
    pub num_nodes: usize,
    /// Per-operation deadline.
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("no replicas available")]
    NoReplicas,
    #[error("read quorum impossible: replicas={replicas} r={r}")]
    QuorumImpossible { replicas: usize, r: usize },
    #[error("write quorum not reached: acks={acks} need={need}")]
    WriteQuorumNotReached { acks: usize, need: usize },
    #[error("read quorum not reached: success={success} need={need}")]
    ReadQuorumNotReached { success: usize, need: usize },
}

/// Per-node request coordinator.
///
/// Generic over `R: ReplicaClient` for testability; production wires in
/// the HTTP client from `driftdb-net`.
pub struct Coordinator<R: ReplicaClient> {
    self_info: NodeInfo,
    ring: Ring,
    store: Arc<MemStore>,
    client: Arc<R>,
    hints: Arc<HintManager>,
    cfg: CoordinatorConfig,
}

impl<R: ReplicaClient> std::fmt::Debug for Coordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("self_info", &self.self_info)
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> Coordinator<R> {
    pub fn new(
        self_info: NodeInfo,
        ring: Ring,
        store: Arc<MemStore>,
        client: Arc<R>,
        hints: Arc<HintManager>,
        cfg: CoordinatorConfig,
    ) -> Self {
        Self {
            self_info,
            ring,
            store,
            client,
            hints,
            cfg,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_info.id
    }

    /// PUT a value. Timestamps are coordinator-assigned; clients never
    /// supply them.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        let record = Record::new(
            key.to_string(),
            value,
            now_ns(),
            self.self_info.id.clone(),
        );
        self.put_record(record).await
    }

    /// DELETE a key by writing a tombstone through the same quorum path.
    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        let record = Record::tombstone(key.to_string(), now_ns(), self.self_info.id.clone());
        self.put_record(record).await
    }

    /// Shared write path for live records and tombstones.
    pub async fn put_record(&self, record: Record) -> Result<(), KvError> {
        // Full distinct-node walk; everything past the first N is a
        // fallback candidate.
        let order = self.ring.replicas(&record.key, self.cfg.num_nodes);
        if order.is_empty() {
            return Err(KvError::NoReplicas);
        }
        let pref_n = self.cfg.n.min(order.len());
        let (preferred, fallbacks) = order.split_at(pref_n);

        // Phase 1: preferred replicas in parallel under one deadline.
        let deadline = Instant::now() + self.cfg.timeout;
        let mut calls = FuturesUnordered::new();
        for node in preferred {
            let record = &record;
            calls.push(async move {
                let res = match timeout_at(deadline, self.replica_put(node, record, "")).await {
                    Ok(res) => res,
                    Err(_) => Err(ReplicaError::Timeout),
                };
                (node.clone(), res)
            });
        }

        let mut acks = 0usize;
        let mut failed_preferred: Vec<NodeInfo> = Vec::new();
        while let Some((node, res)) = calls.next().await {
            match res {
                Ok(()) => {
                    acks += 1;
                    if acks >= self.cfg.w {
                        // Dropping the stream cancels the stragglers.
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::debug!(node = %node.id, error = %e, "replica put failed");
                    failed_preferred.push(node);
                }
            }
        }
        drop(calls);

        if acks >= self.cfg.w {
            return Ok(());
        }
        if fallbacks.is_empty() {
            return Err(KvError::WriteQuorumNotReached {
                acks,
                need: self.cfg.w,
            });
        }

        // Phase 2: sloppy quorum. Each fallback stands in for one failed
        // preferred replica and stores a hint on its behalf.
        let mut failed_ids: VecDeque<String> =
            failed_preferred.into_iter().map(|n| n.id).collect();
        let deadline = Instant::now() + self.cfg.timeout;

        for fb in fallbacks {
            let hint_for = failed_ids.pop_front().unwrap_or_default();
            match timeout_at(deadline, self.replica_put(fb, &record, &hint_for)).await {
                Ok(Ok(())) => {
                    acks += 1;
                    if acks >= self.cfg.w {
                        return Ok(());
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(node = %fb.id, error = %e, "fallback put failed");
                }
                Err(_) => break,
            }
        }

        Err(KvError::WriteQuorumNotReached {
            acks,
            need: self.cfg.w,
        })
    }

    /// GET a key. Returns `None` when the key is absent or tombstoned.
    pub async fn get(&self, key: &str) -> Result<Option<Record>, KvError> {
        // Reads are strict: preferred replicas only, no fallbacks.
        let replicas = self.ring.replicas(key, self.cfg.n);
        if replicas.len() < self.cfg.r {
            return Err(KvError::QuorumImpossible {
                replicas: replicas.len(),
                r: self.cfg.r,
            });
        }

        let deadline = Instant::now() + self.cfg.timeout;
        let mut calls = FuturesUnordered::new();
        for node in &replicas {
            calls.push(async move {
                let res = match timeout_at(deadline, self.replica_get(node, key)).await {
                    Ok(res) => res,
                    Err(_) => Err(ReplicaError::Timeout),
                };
                (node.clone(), res)
            });
        }

        // Collect R successful responses; found and not-found both count.
        let mut responses: Vec<(NodeInfo, Option<Record>)> = Vec::with_capacity(self.cfg.r);
        while let Some((node, res)) = calls.next().await {
            match res {
                Ok(found) => {
                    responses.push((node, found));
                    if responses.len() >= self.cfg.r {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(node = %node.id, error = %e, "replica get failed");
                }
            }
        }
        drop(calls);

        if responses.len() < self.cfg.r {
            return Err(KvError::ReadQuorumNotReached {
                success: responses.len(),
                need: self.cfg.r,
            });
        }

        // LWW winner among the found responses.
        let mut winner: Option<Record> = None;
        for (_, rec) in &responses {
            if let Some(rec) = rec {
                winner = Some(match winner {
                    None => rec.clone(),
                    Some(w) => lww::newer(w, rec.clone()),
                });
            }
        }
        let Some(winner) = winner else {
            return Ok(None);
        };

        self.spawn_read_repair(&winner, &responses);

        // A tombstone winner is "not present" at the client surface.
        if winner.deleted {
            return Ok(None);
        }
        Ok(Some(winner))
    }

    /// Route one replica write, short-circuiting to the local store when
    /// the target is this node.
    async fn replica_put(
        &self,
        node: &NodeInfo,
        record: &Record,
        hint_for: &str,
    ) -> Result<(), ReplicaError> {
        if node.id == self.self_info.id {
            self.store
                .put_lww(record.clone())
                .map_err(|e| ReplicaError::Storage(e.to_string()))?;
            if !hint_for.is_empty() {
                if let Err(e) = self.hints.add(hint_for, record.clone()) {
                    tracing::warn!(hint_for = %hint_for, error = %e, "failed to store hint");
                }
            }
            return Ok(());
        }
        self.client.replica_put(node, record, hint_for).await
    }

    async fn replica_get(
        &self,
        node: &NodeInfo,
        key: &str,
    ) -> Result<Option<Record>, ReplicaError> {
        if node.id == self.self_info.id {
            return Ok(self.store.get(key));
        }
        self.client.replica_get(node, key).await
    }

    /// Push the winner to replicas that answered with an older version
    /// or nothing at all. Best-effort: runs on its own deadline so the
    /// client's remaining request time cannot cut it off, and errors
    /// are swallowed.
    fn spawn_read_repair(&self, winner: &Record, responses: &[(NodeInfo, Option<Record>)]) {
        let stale: Vec<NodeInfo> = responses
            .iter()
            .filter(|(_, rec)| match rec {
                None => true,
                // Equal versions never repair each other.
                Some(r) => {
                    !lww::same_version(r, winner)
                        && lww::strictly_newer(winner.ts, &winner.writer_id, r.ts, &r.writer_id)
                }
            })
            .map(|(node, _)| node.clone())
            .collect();
        if stale.is_empty() {
            return;
        }

        driftdb_metrics::metrics().read_repairs.inc();
        let winner = winner.clone();
        let client = self.client.clone();
        let store = self.store.clone();
        let self_id = self.self_info.id.clone();
        let per_call = self.cfg.timeout;

        tokio::spawn(async move {
            for node in stale {
                if node.id == self_id {
                    if let Err(e) = store.put_lww(winner.clone()) {
                        tracing::warn!(error = %e, "local read repair failed");
                    }
                    continue;
                }
                let res = tokio::time::timeout(per_call, client.replica_put(&node, &winner, ""))
                    .await;
                if let Ok(Err(e)) = res {
                    tracing::debug!(node = %node.id, error = %e, "read repair put failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hints::HintManager;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Mock client backed by a registry of per-node stores, with a
    /// configurable set of unreachable nodes.
    struct MockReplicaClient {
        stores: HashMap<String, Arc<MemStore>>,
        down: Mutex<HashSet<String>>,
        /// (receiving node, hinted-for node, key) for every remote put
        /// that carried a hint.
        hints_seen: Mutex<Vec<(String, String, String)>>,
    }

    impl MockReplicaClient {
        fn new(stores: HashMap<String, Arc<MemStore>>) -> Self {
            Self {
                stores,
                down: Mutex::new(HashSet::new()),
                hints_seen: Mutex::new(Vec::new()),
            }
        }

        fn stop(&self, id: &str) {
            self.down.lock().insert(id.to_string());
        }
    }

    #[async_trait::async_trait]
    impl ReplicaClient for MockReplicaClient {
        async fn replica_put(
            &self,
            target: &NodeInfo,
            record: &Record,
            hint_for: &str,
        ) -> Result<(), ReplicaError> {
            if self.down.lock().contains(&target.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            let store = self
                .stores
                .get(&target.id)
                .ok_or_else(|| ReplicaError::Transport("unknown node".into()))?;
            store
                .put_lww(record.clone())
                .map_err(|e| ReplicaError::Storage(e.to_string()))?;
            if !hint_for.is_empty() {
                self.hints_seen.lock().push((
                    target.id.clone(),
                    hint_for.to_string(),
                    record.key.clone(),
                ));
            }
            Ok(())
        }

        async fn replica_get(
            &self,
            target: &NodeInfo,
            key: &str,
        ) -> Result<Option<Record>, ReplicaError> {
            if self.down.lock().contains(&target.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            let store = self
                .stores
                .get(&target.id)
                .ok_or_else(|| ReplicaError::Transport("unknown node".into()))?;
            Ok(store.get(key))
        }

        async fn replica_keys(
            &self,
            target: &NodeInfo,
        ) -> Result<HashMap<String, driftdb_storage::record::Meta>, ReplicaError> {
            if self.down.lock().contains(&target.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            let store = self
                .stores
                .get(&target.id)
                .ok_or_else(|| ReplicaError::Transport("unknown node".into()))?;
            Ok(store.keys_meta())
        }
    }

    struct Harness {
        nodes: Vec<NodeInfo>,
        stores: HashMap<String, Arc<MemStore>>,
        client: Arc<MockReplicaClient>,
        coordinator: Coordinator<MockReplicaClient>,
        hints: Arc<HintManager>,
    }

    impl Harness {
        /// Whether any remote put carried a hint for one of `ids`.
        fn hints_seen_for(&self, ids: &[String]) -> bool {
            self.client
                .hints_seen
                .lock()
                .iter()
                .any(|(_, hinted, _)| ids.contains(hinted))
        }
    }

    /// A coordinator on n1 of a `num_nodes`-member cluster, all stores
    /// in memory.
    fn harness(num_nodes: usize, n: usize, r: usize, w: usize) -> Harness {
        let nodes: Vec<NodeInfo> = (1..=num_nodes)
            .map(|i| NodeInfo::new(format!("n{}", i), format!("127.0.0.1:{}", 8080 + i)))
            .collect();
        let stores: HashMap<String, Arc<MemStore>> = nodes
            .iter()
            .map(|node| (node.id.clone(), Arc::new(MemStore::new())))
            .collect();

        let client = Arc::new(MockReplicaClient::new(stores.clone()));
        let hints = Arc::new(HintManager::new());
        let ring = Ring::new(&nodes, 32);
        let coordinator = Coordinator::new(
            nodes[0].clone(),
            ring,
            stores["n1"].clone(),
            client.clone(),
            hints.clone(),
            CoordinatorConfig {
                n,
                r,
                w,
                num_nodes,
                timeout: Duration::from_millis(500),
            },
        );
        Harness {
            nodes,
            stores,
            client,
            coordinator,
            hints,
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let h = harness(3, 3, 2, 2);
        h.coordinator.put("cat", b"meow".to_vec()).await.unwrap();

        let got = h.coordinator.get("cat").await.unwrap().unwrap();
        assert_eq!(got.value, b"meow");
        assert_eq!(got.writer_id, "n1");
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let h = harness(3, 3, 2, 2);
        assert!(h.coordinator.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_surfaces_as_absent() {
        let h = harness(3, 3, 2, 2);
        h.coordinator.put("zombie", b"meow".to_vec()).await.unwrap();
        h.coordinator.delete("zombie").await.unwrap();

        assert!(h.coordinator.get("zombie").await.unwrap().is_none());
        // The tombstone still exists on replicas.
        let tomb = h
            .stores
            .values()
            .filter_map(|s| s.get("zombie"))
            .next()
            .unwrap();
        assert!(tomb.deleted);
    }

    #[tokio::test]
    async fn test_write_quorum_unreached_without_fallbacks() {
        let h = harness(3, 3, 2, 2);
        h.client.stop("n2");
        h.client.stop("n3");
        // n1 still acks locally, but W=2 needs a second ack and a
        // 3-node cluster with N=3 has no fallbacks.
        let err = h.coordinator.put("k", b"v".to_vec()).await.unwrap_err();
        assert!(matches!(err, KvError::WriteQuorumNotReached { .. }));
    }

    #[tokio::test]
    async fn test_sloppy_quorum_uses_fallback_and_records_hint() {
        // 5-node cluster, N=3: two fallbacks exist past the preferred set.
        let h = harness(5, 3, 2, 2);
        let preferred = h.coordinator.ring.replicas("cat", 3);
        let fallbacks = h.coordinator.ring.replicas("cat", 5)[3..].to_vec();

        // Stop every preferred replica that is not the coordinator.
        let stopped: Vec<String> = preferred
            .iter()
            .filter(|node| node.id != "n1")
            .map(|node| {
                h.client.stop(&node.id);
                node.id.clone()
            })
            .collect();

        h.coordinator.put("cat", b"v1".to_vec()).await.unwrap();

        // The write landed on at least one fallback.
        let on_fallback = fallbacks
            .iter()
            .any(|node| h.stores[&node.id].get("cat").is_some());
        assert!(on_fallback, "sloppy quorum should use fallbacks");

        // Some accepting node queued a hint for a downed preferred
        // replica: either a remote fallback (seen by the mock) or the
        // coordinator itself.
        let remote_hints = h.hints_seen_for(&stopped);
        assert!(
            remote_hints || h.hints.count() > 0,
            "a hint must be recorded for a downed preferred replica"
        );
    }

    #[tokio::test]
    async fn test_read_quorum_impossible_for_tiny_cluster() {
        // One node, R=2: the ring can never produce two replicas.
        let nodes = vec![NodeInfo::new("n1", "127.0.0.1:8081")];
        let stores: HashMap<String, Arc<MemStore>> =
            [("n1".to_string(), Arc::new(MemStore::new()))].into();
        let client = Arc::new(MockReplicaClient::new(stores.clone()));
        let coordinator = Coordinator::new(
            nodes[0].clone(),
            Ring::new(&nodes, 16),
            stores["n1"].clone(),
            client,
            Arc::new(HintManager::new()),
            CoordinatorConfig {
                n: 3,
                r: 2,
                w: 2,
                num_nodes: 1,
                timeout: Duration::from_millis(200),
            },
        );

        let err = coordinator.get("k").await.unwrap_err();
        assert!(matches!(err, KvError::QuorumImpossible { .. }));
    }

    #[tokio::test]
    async fn test_read_quorum_not_reached_when_peers_down() {
        let h = harness(3, 3, 2, 2);
        h.coordinator.put("k", b"v".to_vec()).await.unwrap();
        h.client.stop("n2");
        h.client.stop("n3");

        let err = h.coordinator.get("k").await.unwrap_err();
        assert!(matches!(err, KvError::ReadQuorumNotReached { .. }));
    }

    #[tokio::test]
    async fn test_get_resolves_lww_winner() {
        let h = harness(3, 3, 3, 2);
        // Seed divergent versions directly into the replica stores.
        for node in &h.nodes {
            let store = &h.stores[&node.id];
            if node.id == "n3" {
                store
                    .put_lww(Record::new("k".into(), b"v1".to_vec(), 100, "n1".into()))
                    .unwrap();
            } else {
                store
                    .put_lww(Record::new("k".into(), b"v2".to_vec(), 200, "n1".into()))
                    .unwrap();
            }
        }

        let got = h.coordinator.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, b"v2");
    }

    #[tokio::test]
    async fn test_read_repair_converges_stale_replica() {
        let h = harness(3, 3, 3, 2);
        for node in &h.nodes {
            let store = &h.stores[&node.id];
            let rec = if node.id == "n3" {
                Record::new("k".into(), b"v1".to_vec(), 100, "n1".into())
            } else {
                Record::new("k".into(), b"v2".to_vec(), 200, "n1".into())
            };
            store.put_lww(rec).unwrap();
        }

        let got = h.coordinator.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, b"v2");

        // Repair runs in the background with its own deadline.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.stores["n3"].get("k").unwrap().value, b"v2");
    }

    #[tokio::test]
    async fn test_read_repair_fills_missing_replica() {
        let h = harness(3, 3, 3, 2);
        for id in ["n1", "n2"] {
            h.stores[id]
                .put_lww(Record::new("k".into(), b"v".to_vec(), 100, "n1".into()))
                .unwrap();
        }

        let got = h.coordinator.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, b"v");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.stores["n3"].get("k").unwrap().value, b"v");
    }

    #[tokio::test]
    async fn test_equal_versions_do_not_repair() {
        let h = harness(3, 3, 3, 2);
        let rec = Record::new("k".into(), b"v".to_vec(), 100, "n1".into());
        for store in h.stores.values() {
            store.put_lww(rec.clone()).unwrap();
        }

        h.coordinator.get("k").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No write amplification: every store still holds exactly the
        // seeded version.
        for store in h.stores.values() {
            let got = store.get("k").unwrap();
            assert!(lww::same_version(&got, &rec));
        }
    }

    #[tokio::test]
    async fn test_tombstone_winner_repairs_then_reports_absent() {
        let h = harness(3, 3, 3, 2);
        for id in ["n1", "n2"] {
            h.stores[id]
                .put_lww(Record::tombstone("k".into(), 200, "n1".into()))
                .unwrap();
        }
        h.stores["n3"]
            .put_lww(Record::new("k".into(), b"stale".to_vec(), 100, "n1".into()))
            .unwrap();

        assert!(h.coordinator.get("k").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.stores["n3"].get("k").unwrap().deleted);
    }
}
