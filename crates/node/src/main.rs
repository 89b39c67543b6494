//! driftdb-node: entry point for one cluster member.
//!
//! Loads the shared cluster config, recovers the local shard from
//! snapshot + WAL, wires the coordinator over the HTTP replica client,
//! spawns the background convergence loops (handoff, anti-entropy,
//! optional snapshots), then serves the node's HTTP surface until
//! Ctrl+C.

use clap::Parser;
use driftdb_common::NodeInfo;
use driftdb_kv::anti_entropy::{spawn_anti_entropy_task, AeStats, AntiEntropyConfig};
use driftdb_kv::coordinator::{Coordinator, CoordinatorConfig};
use driftdb_kv::hint_delivery::{spawn_hint_delivery_task, HintDeliveryConfig};
use driftdb_kv::hints::HintManager;
use driftdb_kv::ring::Ring;
use driftdb_net::{build_router, AppState, HttpReplicaClient, PersistInfo};
use driftdb_storage::store::MemStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadline for coordinator operations and their replica calls.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(800);

#[derive(Parser, Debug)]
#[command(name = "driftdb-node", about = "A node of the driftdb cluster")]
struct Args {
    /// This node's id; must appear in the cluster config.
    #[arg(long, default_value = "n1")]
    id: String,

    /// Path to the cluster config (JSON).
    #[arg(long, default_value = "nodes.json")]
    config: PathBuf,

    /// Record WAL path (default data/kv_<id>.wal).
    #[arg(long)]
    kvwal: Option<PathBuf>,

    /// Snapshot path (default data/kv_<id>.snap.json).
    #[arg(long)]
    kvsnap: Option<PathBuf>,

    /// Hint WAL path (default data/hints_<id>.wal).
    #[arg(long)]
    hintwal: Option<PathBuf>,

    /// Snapshot interval in milliseconds; 0 disables. Snapshots block
    /// writes briefly.
    #[arg(long, default_value_t = 0)]
    snap_interval_ms: u64,

    /// Enable the anti-entropy background sync.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    ae: bool,

    /// Anti-entropy tick interval in milliseconds.
    #[arg(long, default_value_t = 1500)]
    ae_interval_ms: u64,

    /// Max keys pulled per anti-entropy tick.
    #[arg(long, default_value_t = 200)]
    ae_max: usize,

    /// Serve Prometheus metrics on this port.
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    driftdb_metrics::init_tracing();
    let args = Args::parse();

    let cfg = driftdb_config::load_from_file(&args.config)?;
    let self_info = cfg.find_self(&args.id)?;
    let nodes_by_id: HashMap<String, NodeInfo> = cfg
        .nodes
        .iter()
        .map(|node| (node.id.clone(), node.clone()))
        .collect();

    let ring = Ring::new(&cfg.nodes, cfg.vnodes);

    let kv_wal_path = args
        .kvwal
        .unwrap_or_else(|| PathBuf::from(format!("data/kv_{}.wal", self_info.id)));
    let kv_snap_path = args
        .kvsnap
        .unwrap_or_else(|| PathBuf::from(format!("data/kv_{}.snap.json", self_info.id)));
    let hint_wal_path = args
        .hintwal
        .unwrap_or_else(|| PathBuf::from(format!("data/hints_{}.wal", self_info.id)));

    // Snapshot first, WAL replay on top, then the WAL goes live.
    let store = Arc::new(MemStore::new());
    store.recover(&kv_snap_path, &kv_wal_path)?;
    tracing::info!(
        node = %self_info.id,
        keys = store.len(),
        wal = %kv_wal_path.display(),
        "store recovered"
    );

    let hints = Arc::new(HintManager::open(&hint_wal_path)?);
    if hints.count() > 0 {
        tracing::info!(pending = hints.count(), "hint wal replayed");
    }

    let client = Arc::new(HttpReplicaClient::new(REQUEST_TIMEOUT)?);
    let coordinator = Arc::new(Coordinator::new(
        self_info.clone(),
        ring,
        store.clone(),
        client.clone(),
        hints.clone(),
        CoordinatorConfig {
            n: cfg.n,
            r: cfg.r,
            w: cfg.w,
            num_nodes: cfg.nodes.len(),
            timeout: REQUEST_TIMEOUT,
        },
    ));

    let shutdown = CancellationToken::new();

    // Operator-scheduled snapshots.
    if args.snap_interval_ms > 0 {
        let store = store.clone();
        let snap_path = kv_snap_path.clone();
        let token = shutdown.clone();
        let mut tick = tokio::time::interval(Duration::from_millis(args.snap_interval_ms));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = store.snapshot_and_reset_wal(&snap_path) {
                            tracing::warn!(error = %e, "snapshot failed");
                        }
                    }
                }
            }
        });
    }

    spawn_hint_delivery_task(
        hints.clone(),
        nodes_by_id,
        client.clone(),
        HintDeliveryConfig::default(),
        shutdown.clone(),
    );

    let ae_stats = Arc::new(AeStats::new(
        args.ae,
        Duration::from_millis(args.ae_interval_ms),
        args.ae_max,
    ));
    if args.ae {
        let peers: Vec<NodeInfo> = cfg
            .nodes
            .iter()
            .filter(|node| node.id != self_info.id)
            .cloned()
            .collect();
        spawn_anti_entropy_task(
            store.clone(),
            peers,
            client.clone(),
            AntiEntropyConfig {
                interval: Duration::from_millis(args.ae_interval_ms),
                max_per_tick: args.ae_max,
                ..AntiEntropyConfig::default()
            },
            ae_stats.clone(),
            shutdown.clone(),
        );
    }

    if let Some(port) = args.metrics_port {
        let addr: std::net::SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        tokio::spawn(async move {
            if let Err(e) = driftdb_metrics::serve_metrics(addr).await {
                tracing::warn!(error = %e, "metrics server failed");
            }
        });
    }

    let state = Arc::new(AppState {
        node: self_info.clone(),
        store,
        hints,
        coordinator,
        ae_stats,
        persist: PersistInfo {
            kv_wal: kv_wal_path,
            kv_snapshot: kv_snap_path,
            snapshot_interval: Duration::from_millis(args.snap_interval_ms),
        },
    });
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&self_info.addr).await?;
    tracing::info!(node = %self_info.id, addr = %self_info.addr, "listening");

    let token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            token.cancel();
        })
        .await?;

    Ok(())
}
