//! Background handoff loop: drains the hint queue to recovered peers.
//!
//! Each tick attempts every pending record once; the tick cadence is the
//! retry backoff, so an unreachable target costs one failed attempt per
//! record per tick and nothing more.

use crate::hints::HintManager;
use crate::replica_client::ReplicaClient;
use driftdb_common::NodeInfo;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Configuration for the handoff loop.
#[derive(Debug, Clone)]
pub struct HintDeliveryConfig {
    /// Tick cadence.
    pub interval: Duration,
    /// Per-record delivery deadline.
    pub attempt_timeout: Duration,
}

impl Default for HintDeliveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(400),
            attempt_timeout: Duration::from_millis(800),
        }
    }
}

/// Spawn the handoff loop; it runs until `shutdown` is cancelled.
pub fn spawn_hint_delivery_task<R: ReplicaClient>(
    hints: Arc<HintManager>,
    nodes_by_id: HashMap<String, NodeInfo>,
    client: Arc<R>,
    config: HintDeliveryConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    deliver_hints_once(&hints, &nodes_by_id, client.as_ref(), config.attempt_timeout).await;
                    if let Err(e) = hints.maybe_compact() {
                        tracing::warn!(error = %e, "hint wal compaction failed");
                    }
                }
            }
        }
    })
}

/// One handoff cycle: snapshot targets and records, try each delivery
/// once, and drop hints that arrived intact.
pub async fn deliver_hints_once<R: ReplicaClient>(
    hints: &HintManager,
    nodes_by_id: &HashMap<String, NodeInfo>,
    client: &R,
    attempt_timeout: Duration,
) {
    let mut delivered = 0usize;

    for target_id in hints.targets() {
        let Some(target) = nodes_by_id.get(&target_id) else {
            tracing::debug!(hint_target = %target_id, "hint target not in cluster config, skipping");
            continue;
        };

        for record in hints.records_for(&target_id) {
            match timeout(attempt_timeout, client.replica_put(target, &record, "")).await {
                Ok(Ok(())) => {
                    if let Err(e) = hints.delete_if_same(&target_id, &record.key, &record) {
                        tracing::warn!(error = %e, "failed to drop delivered hint");
                    }
                    driftdb_metrics::metrics().hints_delivered.inc();
                    delivered += 1;
                }
                Ok(Err(e)) => {
                    tracing::debug!(hint_target = %target_id, key = %record.key, error = %e,
                        "hint delivery failed, will retry next tick");
                }
                Err(_) => {
                    tracing::debug!(hint_target = %target_id, key = %record.key,
                        "hint delivery timed out, will retry next tick");
                }
            }
        }
    }

    if delivered > 0 {
        tracing::info!(delivered, "handoff cycle delivered hints");
    }
}
