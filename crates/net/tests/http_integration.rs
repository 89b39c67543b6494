//! End-to-end tests over real HTTP.
//!
//! Boots a cluster of in-process nodes on ephemeral ports, each with its
//! own store, hint manager, and coordinator, all talking through the
//! real axum router and reqwest client. Node failure is simulated by
//! aborting a node's server task and rebinding its address later.

use driftdb_common::{base_url, NodeInfo};
use driftdb_kv::anti_entropy::{run_anti_entropy_once, AeStats};
use driftdb_kv::coordinator::{Coordinator, CoordinatorConfig};
use driftdb_kv::hint_delivery::deliver_hints_once;
use driftdb_kv::hints::HintManager;
use driftdb_kv::replica_client::ReplicaClient;
use driftdb_kv::ring::Ring;
use driftdb_net::{build_router, AppState, HttpReplicaClient, PersistInfo};
use driftdb_storage::store::MemStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const CALL_TIMEOUT: Duration = Duration::from_millis(800);

struct TestNode {
    info: NodeInfo,
    store: Arc<MemStore>,
    hints: Arc<HintManager>,
    state: Arc<AppState<HttpReplicaClient>>,
    serve: tokio::task::JoinHandle<()>,
}

struct HttpCluster {
    nodes: Vec<TestNode>,
    nodes_by_id: HashMap<String, NodeInfo>,
    http: reqwest::Client,
    replica_client: Arc<HttpReplicaClient>,
    ring: Ring,
}

impl HttpCluster {
    async fn start(num_nodes: usize, n: usize, r: usize, w: usize) -> Self {
        // Bind first so the cluster config can carry real ports.
        let mut listeners = Vec::new();
        let mut infos = Vec::new();
        for i in 0..num_nodes {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            infos.push(NodeInfo::new(format!("n{}", i + 1), addr.to_string()));
            listeners.push(listener);
        }

        let ring = Ring::new(&infos, 32);
        let replica_client = Arc::new(HttpReplicaClient::new(CALL_TIMEOUT).unwrap());

        let mut nodes = Vec::new();
        for (info, listener) in infos.iter().cloned().zip(listeners) {
            let store = Arc::new(MemStore::new());
            let hints = Arc::new(HintManager::new());
            let coordinator = Arc::new(Coordinator::new(
                info.clone(),
                ring.clone(),
                store.clone(),
                replica_client.clone(),
                hints.clone(),
                CoordinatorConfig {
                    n,
                    r,
                    w,
                    num_nodes,
                    timeout: CALL_TIMEOUT,
                },
            ));
            let state = Arc::new(AppState {
                node: info.clone(),
                store: store.clone(),
                hints: hints.clone(),
                coordinator,
                ae_stats: Arc::new(AeStats::new(false, Duration::from_millis(1500), 200)),
                persist: PersistInfo {
                    kv_wal: PathBuf::from(format!("data/kv_{}.wal", info.id)),
                    kv_snapshot: PathBuf::from(format!("data/kv_{}.snap.json", info.id)),
                    snapshot_interval: Duration::ZERO,
                },
            });
            let serve = spawn_server(listener, state.clone());
            nodes.push(TestNode {
                info,
                store,
                hints,
                state,
                serve,
            });
        }

        let nodes_by_id = nodes
            .iter()
            .map(|node| (node.info.id.clone(), node.info.clone()))
            .collect();

        Self {
            nodes,
            nodes_by_id,
            http: reqwest::Client::new(),
            replica_client,
            ring,
        }
    }

    fn node(&self, id: &str) -> &TestNode {
        self.nodes.iter().find(|node| node.info.id == id).unwrap()
    }

    fn url(&self, id: &str, path: &str) -> String {
        format!("{}{}", base_url(&self.node(id).info.addr), path)
    }

    /// Kill a node's server; its store and hints survive for restart.
    fn stop(&self, id: &str) {
        self.node(id).serve.abort();
    }

    /// Rebind the node's address and serve again with the same state.
    async fn restart(&mut self, id: &str) {
        let addr: SocketAddr = self.node(id).info.addr.parse().unwrap();
        let mut listener = None;
        for _ in 0..100 {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => {
                    listener = Some(l);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let listener = listener.expect("address should become rebindable");

        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.info.id == id)
            .unwrap();
        node.serve = spawn_server(listener, node.state.clone());
    }

    async fn handoff_cycle(&self) {
        for node in &self.nodes {
            deliver_hints_once(
                &node.hints,
                &self.nodes_by_id,
                self.replica_client.as_ref(),
                CALL_TIMEOUT,
            )
            .await;
        }
    }
}

fn spawn_server(
    listener: tokio::net::TcpListener,
    state: Arc<AppState<HttpReplicaClient>>,
) -> tokio::task::JoinHandle<()> {
    let router = build_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    })
}

// ---------------------------------------------------------------------------
// Client surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_put_get_delete_roundtrip_across_nodes() {
    let cluster = HttpCluster::start(3, 3, 2, 2).await;

    // PUT via n1.
    let resp = cluster
        .http
        .put(cluster.url("n1", "/kv/cat"))
        .body("meow")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // GET via a different node sees the value.
    let resp = cluster
        .http
        .get(cluster.url("n2", "/kv/cat"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"meow");

    // DELETE via a third node.
    let resp = cluster
        .http
        .delete(cluster.url("n3", "/kv/cat"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // Tombstoned key reads as 404 everywhere.
    for id in ["n1", "n2", "n3"] {
        let resp = cluster
            .http
            .get(cluster.url(id, "/kv/cat"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "via {}", id);
    }
}

#[tokio::test]
async fn test_missing_key_is_404_and_slashed_keys_work() {
    let cluster = HttpCluster::start(3, 3, 2, 2).await;

    let resp = cluster
        .http
        .get(cluster.url("n1", "/kv/absent"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Keys may contain slashes; the wildcard route captures them whole.
    cluster
        .http
        .put(cluster.url("n1", "/kv/user/42/name"))
        .body("alice")
        .send()
        .await
        .unwrap();
    let resp = cluster
        .http
        .get(cluster.url("n2", "/kv/user/42/name"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"alice");
}

#[tokio::test]
async fn test_binary_values_roundtrip() {
    let cluster = HttpCluster::start(3, 3, 2, 2).await;

    let payload: Vec<u8> = (0u16..256).map(|b| b as u8).collect();
    cluster
        .http
        .put(cluster.url("n1", "/kv/blob"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    let resp = cluster
        .http
        .get(cluster.url("n3", "/kv/blob"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.bytes().await.unwrap().as_ref(), payload.as_slice());
}

// ---------------------------------------------------------------------------
// Internal surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_internal_endpoints_contract() {
    let cluster = HttpCluster::start(3, 3, 2, 2).await;

    // replica put via the real client.
    let record = driftdb_storage::record::Record::new(
        "k1".into(),
        b"v1".to_vec(),
        100,
        "n9".into(),
    );
    let target = cluster.node("n2").info.clone();
    cluster
        .replica_client
        .replica_put(&target, &record, "")
        .await
        .unwrap();

    // replica get returns the raw local state.
    let got = cluster
        .replica_client
        .replica_get(&target, "k1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.value, b"v1");
    assert_eq!(got.writer_id, "n9");

    let absent = cluster
        .replica_client
        .replica_get(&target, "absent")
        .await
        .unwrap();
    assert!(absent.is_none());

    // keys metadata.
    let keys = cluster.replica_client.replica_keys(&target).await.unwrap();
    assert_eq!(keys["k1"].ts, 100);
    assert_eq!(keys["k1"].writer_id, "n9");

    // A put carrying hint_for queues a hint on the receiver.
    cluster
        .replica_client
        .replica_put(&target, &record, "n3")
        .await
        .unwrap();
    assert_eq!(cluster.node("n2").hints.count(), 1);

    // Malformed bodies are rejected, not applied.
    let resp = cluster
        .http
        .post(cluster.url("n2", "/internal/put"))
        .header("content-type", "application/json")
        .body(r#"{"record":{"ts":1,"writer_id":"x","key":""}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = cluster
        .http
        .post(cluster.url("n2", "/internal/get"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

// ---------------------------------------------------------------------------
// Debug surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_debug_endpoints() {
    let cluster = HttpCluster::start(3, 3, 2, 2).await;

    cluster
        .http
        .put(cluster.url("n1", "/kv/k1"))
        .body("v1")
        .send()
        .await
        .unwrap();

    let hints: serde_json::Value = cluster
        .http
        .get(cluster.url("n1", "/debug/hints"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(hints["count"].is_u64());
    assert!(hints["targets"].is_array());

    let ae: serde_json::Value = cluster
        .http
        .get(cluster.url("n1", "/debug/ae"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ae["enabled"], false);
    assert_eq!(ae["max_per_tick"], 200);

    let persist: serde_json::Value = cluster
        .http
        .get(cluster.url("n1", "/debug/persist"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(persist["node"], "n1");
    assert!(persist["kv_wal"].as_str().unwrap().contains("kv_n1.wal"));

    let health = cluster
        .http
        .get(cluster.url("n1", "/health"))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());
}

// ---------------------------------------------------------------------------
// Failure and convergence over real sockets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sloppy_quorum_and_handoff_over_http() {
    // N=2 of 3 so a downed preferred replica forces a hinted fallback.
    let mut cluster = HttpCluster::start(3, 2, 1, 2).await;

    let preferred = cluster.ring.replicas("cat", 2);
    let victim = preferred
        .iter()
        .find(|node| node.id != "n1")
        .unwrap_or(&preferred[0])
        .id
        .clone();
    cluster.stop(&victim);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = cluster
        .http
        .put(cluster.url("n1", "/kv/cat"))
        .body("v1")
        .send()
        .await
        .unwrap();
    assert!(
        resp.status().is_success(),
        "sloppy quorum write should succeed with one node down"
    );

    let hint_count: usize = cluster.nodes.iter().map(|n| n.hints.count()).sum();
    assert_eq!(hint_count, 1, "a hint should be queued for the downed node");

    cluster.restart(&victim).await;
    cluster.handoff_cycle().await;

    let got = cluster
        .replica_client
        .replica_get(&cluster.nodes_by_id[&victim], "cat")
        .await
        .unwrap()
        .expect("handoff should deliver the record");
    assert_eq!(got.value, b"v1");
    assert!(!got.deleted);
    assert_eq!(got.writer_id, "n1");

    let hint_count: usize = cluster.nodes.iter().map(|n| n.hints.count()).sum();
    assert_eq!(hint_count, 0);
}

#[tokio::test]
async fn test_anti_entropy_over_http() {
    let mut cluster = HttpCluster::start(3, 3, 2, 2).await;

    cluster.stop("n3");
    tokio::time::sleep(Duration::from_millis(50)).await;

    for i in 1..=20 {
        let resp = cluster
            .http
            .put(cluster.url("n1", &format!("/kv/k{}", i)))
            .body(format!("v{}", i))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    cluster.restart("n3").await;
    assert!(cluster.node("n3").store.get("k17").is_none());

    // No client reads: one anti-entropy pull pass converges n3.
    let (_, pulled, err) = run_anti_entropy_once(
        &cluster.node("n3").store,
        cluster.replica_client.as_ref(),
        &cluster.nodes_by_id["n1"],
        200,
        CALL_TIMEOUT,
    )
    .await;
    assert!(err.is_none());
    assert_eq!(pulled, 20);
    assert_eq!(cluster.node("n3").store.get("k17").unwrap().value, b"v17");
}

#[tokio::test]
async fn test_unavailable_cluster_returns_503() {
    let cluster = HttpCluster::start(3, 3, 2, 2).await;
    cluster.stop("n2");
    cluster.stop("n3");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = cluster
        .http
        .put(cluster.url("n1", "/kv/k"))
        .body("v")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    let resp = cluster
        .http
        .get(cluster.url("n1", "/kv/k"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}
