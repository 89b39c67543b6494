//! Anti-entropy loop: background convergence for divergence that hinted
//! handoff cannot see.
//!
//! Each tick picks the next peer round-robin, fetches its key metadata,
//! and pulls any record that is absent locally or strictly newer under
//! LWW. Pull-only per tick; bidirectional convergence emerges because
//! every node runs the loop against every peer.

use crate::replica_client::{ReplicaClient, ReplicaError};
use driftdb_common::NodeInfo;
use driftdb_storage::lww;
use driftdb_storage::store::MemStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{interval, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Configuration for the anti-entropy loop.
#[derive(Debug, Clone)]
pub struct AntiEntropyConfig {
    /// Tick cadence.
    pub interval: Duration,
    /// Cap on records pulled per tick, so a rejoining node cannot
    /// saturate the network; later ticks continue the work.
    pub max_per_tick: usize,
    /// Deadline for each metadata or record fetch.
    pub fetch_timeout: Duration,
}

impl Default for AntiEntropyConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            max_per_tick: 200,
            fetch_timeout: Duration::from_millis(1200),
        }
    }
}

/// Per-tick statistics, exposed on the debug surface.
#[derive(Debug, Default)]
struct AeStatsInner {
    last_peer: String,
    last_run_unix: i64,
    last_dur_ms: u64,
    last_compared: usize,
    last_pulled: usize,
    total_pulled: usize,
    total_errors: usize,
    last_error: String,
}

#[derive(Debug)]
pub struct AeStats {
    enabled: bool,
    interval: Duration,
    max_per_tick: usize,
    inner: Mutex<AeStatsInner>,
}

/// Snapshot of [`AeStats`] for the `/debug/ae` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AeSnapshot {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_per_tick: usize,
    pub last_peer: String,
    pub last_run_unix: i64,
    pub last_dur_ms: u64,
    pub last_compared: usize,
    pub last_pulled: usize,
    pub total_pulled: usize,
    pub total_errors: usize,
    pub last_error: String,
}

impl AeStats {
    pub fn new(enabled: bool, interval: Duration, max_per_tick: usize) -> Self {
        Self {
            enabled,
            interval,
            max_per_tick,
            inner: Mutex::new(AeStatsInner::default()),
        }
    }

    fn set_run(
        &self,
        peer: &str,
        dur: Duration,
        compared: usize,
        pulled: usize,
        err: Option<&ReplicaError>,
    ) {
        let mut inner = self.inner.lock();
        inner.last_peer = peer.to_string();
        inner.last_run_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        inner.last_dur_ms = dur.as_millis() as u64;
        inner.last_compared = compared;
        inner.last_pulled = pulled;
        inner.total_pulled += pulled;
        match err {
            Some(e) => {
                inner.total_errors += 1;
                inner.last_error = e.to_string();
            }
            None => inner.last_error.clear(),
        }
    }

    pub fn snapshot(&self) -> AeSnapshot {
        let inner = self.inner.lock();
        AeSnapshot {
            enabled: self.enabled,
            interval_ms: self.interval.as_millis() as u64,
            max_per_tick: self.max_per_tick,
            last_peer: inner.last_peer.clone(),
            last_run_unix: inner.last_run_unix,
            last_dur_ms: inner.last_dur_ms,
            last_compared: inner.last_compared,
            last_pulled: inner.last_pulled,
            total_pulled: inner.total_pulled,
            total_errors: inner.total_errors,
            last_error: inner.last_error.clone(),
        }
    }
}

/// Spawn the anti-entropy loop over `peers` (self excluded by the
/// caller); runs until `shutdown` is cancelled.
pub fn spawn_anti_entropy_task<R: ReplicaClient>(
    store: Arc<MemStore>,
    peers: Vec<NodeInfo>,
    client: Arc<R>,
    config: AntiEntropyConfig,
    stats: Arc<AeStats>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if peers.is_empty() {
            return;
        }
        let mut tick = interval(config.interval);
        let mut next = 0usize;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let peer = &peers[next % peers.len()];
                    next = next.wrapping_add(1);

                    let start = Instant::now();
                    let (compared, pulled, err) = run_anti_entropy_once(
                        &store,
                        client.as_ref(),
                        peer,
                        config.max_per_tick,
                        config.fetch_timeout,
                    )
                    .await;
                    if err.is_some() {
                        driftdb_metrics::metrics().ae_errors.inc();
                    }
                    stats.set_run(&peer.id, start.elapsed(), compared, pulled, err.as_ref());
                }
            }
        }
    })
}

/// One anti-entropy pass against `peer`.
///
/// Returns (keys compared, records pulled, last error). Individual pull
/// failures do not abort the pass.
pub async fn run_anti_entropy_once<R: ReplicaClient>(
    store: &MemStore,
    client: &R,
    peer: &NodeInfo,
    max_pull: usize,
    fetch_timeout: Duration,
) -> (usize, usize, Option<ReplicaError>) {
    let peer_keys = match timeout(fetch_timeout, client.replica_keys(peer)).await {
        Ok(Ok(keys)) => keys,
        Ok(Err(e)) => return (0, 0, Some(e)),
        Err(_) => return (0, 0, Some(ReplicaError::Timeout)),
    };

    let local = store.keys_meta();
    let mut compared = 0usize;
    let mut pulled = 0usize;
    let mut last_err: Option<ReplicaError> = None;

    for (key, peer_meta) in &peer_keys {
        compared += 1;

        let need_pull = match local.get(key) {
            None => true,
            Some(local_meta) => lww::strictly_newer(
                peer_meta.ts,
                &peer_meta.writer_id,
                local_meta.ts,
                &local_meta.writer_id,
            ),
        };
        if !need_pull {
            continue;
        }

        match timeout(fetch_timeout, client.replica_get(peer, key)).await {
            Ok(Ok(Some(record))) => {
                if let Err(e) = store.put_lww(record) {
                    tracing::warn!(key = %key, error = %e, "anti-entropy apply failed");
                    continue;
                }
                driftdb_metrics::metrics().ae_pulled.inc();
                pulled += 1;
                if pulled >= max_pull {
                    break;
                }
            }
            // The key vanished between the metadata fetch and the pull.
            Ok(Ok(None)) => {}
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => last_err = Some(ReplicaError::Timeout),
        }
    }

    (compared, pulled, last_err)
}
