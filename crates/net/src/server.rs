//! HTTP surface of a node.
//!
//! Three groups of routes: the client-facing `/kv/*` verbs served by the
//! coordinator, the `/internal/*` peer endpoints that operate on the
//! local store only, and the `/debug/*` introspection endpoints.

use crate::messages::{GetRequest, GetResponse, KeysResponse, PutRequest, PutResponse};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use driftdb_common::NodeInfo;
use driftdb_kv::anti_entropy::AeStats;
use driftdb_kv::coordinator::Coordinator;
use driftdb_kv::hints::HintManager;
use driftdb_kv::replica_client::ReplicaClient;
use driftdb_storage::store::MemStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where this node persists, for the debug surface.
#[derive(Debug, Clone)]
pub struct PersistInfo {
    pub kv_wal: PathBuf,
    pub kv_snapshot: PathBuf,
    pub snapshot_interval: Duration,
}

/// Shared state behind every handler.
pub struct AppState<R: ReplicaClient> {
    pub node: NodeInfo,
    pub store: Arc<MemStore>,
    pub hints: Arc<HintManager>,
    pub coordinator: Arc<Coordinator<R>>,
    pub ae_stats: Arc<AeStats>,
    pub persist: PersistInfo,
}

/// Build the node's router.
pub fn build_router<R: ReplicaClient>(state: Arc<AppState<R>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/kv/*key",
            put(kv_put::<R>).get(kv_get::<R>).delete(kv_delete::<R>),
        )
        .route("/internal/put", post(internal_put::<R>))
        .route("/internal/get", post(internal_get::<R>))
        .route("/internal/keys", post(internal_keys::<R>))
        .route("/debug/hints", get(debug_hints::<R>))
        .route("/debug/ae", get(debug_ae::<R>))
        .route("/debug/persist", get(debug_persist::<R>))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------------
// Client-facing KV
// ---------------------------------------------------------------------------

async fn kv_put<R: ReplicaClient>(
    State(state): State<Arc<AppState<R>>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    driftdb_metrics::metrics().kv_puts.inc();
    let _timer = driftdb_metrics::start_kv_timer("put");

    match state.coordinator.put(&key, body.to_vec()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn kv_get<R: ReplicaClient>(
    State(state): State<Arc<AppState<R>>>,
    Path(key): Path<String>,
) -> Response {
    driftdb_metrics::metrics().kv_gets.inc();
    let _timer = driftdb_metrics::start_kv_timer("get");

    match state.coordinator.get(&key).await {
        Ok(Some(record)) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            record.value,
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "not found").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn kv_delete<R: ReplicaClient>(
    State(state): State<Arc<AppState<R>>>,
    Path(key): Path<String>,
) -> Response {
    driftdb_metrics::metrics().kv_deletes.inc();
    let _timer = driftdb_metrics::start_kv_timer("delete");

    match state.coordinator.delete(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Internal peer endpoints
// ---------------------------------------------------------------------------

async fn internal_put<R: ReplicaClient>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<PutRequest>,
) -> Response {
    if req.record.key.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing record.key").into_response();
    }

    if let Err(e) = state.store.put_lww(req.record.clone()) {
        // An unpersisted write must not be acknowledged; the caller
        // counts this node as a failed participant.
        tracing::error!(key = %req.record.key, error = %e, "replica put not persisted");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    if !req.hint_for.is_empty() {
        if let Err(e) = state.hints.add(&req.hint_for, req.record) {
            tracing::warn!(hint_for = %req.hint_for, error = %e, "failed to store hint");
        }
    }

    Json(PutResponse { ok: true }).into_response()
}

async fn internal_get<R: ReplicaClient>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<GetRequest>,
) -> Response {
    if req.key.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing key").into_response();
    }

    let record = state.store.get(&req.key);
    Json(GetResponse {
        found: record.is_some(),
        record,
    })
    .into_response()
}

async fn internal_keys<R: ReplicaClient>(State(state): State<Arc<AppState<R>>>) -> Response {
    Json(KeysResponse {
        keys: state.store.keys_meta(),
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Debug endpoints
// ---------------------------------------------------------------------------

async fn debug_hints<R: ReplicaClient>(State(state): State<Arc<AppState<R>>>) -> Response {
    Json(serde_json::json!({
        "count": state.hints.count(),
        "targets": state.hints.targets(),
        "wal": state.hints.wal_path(),
    }))
    .into_response()
}

async fn debug_ae<R: ReplicaClient>(State(state): State<Arc<AppState<R>>>) -> Response {
    Json(state.ae_stats.snapshot()).into_response()
}

async fn debug_persist<R: ReplicaClient>(State(state): State<Arc<AppState<R>>>) -> Response {
    let (wal_ops, wal_bytes) = state.store.wal_stats();
    Json(serde_json::json!({
        "node": state.node.id,
        "kv_wal": state.persist.kv_wal,
        "kv_snapshot": state.persist.kv_snapshot,
        "wal_ops": wal_ops,
        "wal_bytes": wal_bytes,
        "snapshot_tick_ms": state.persist.snapshot_interval.as_millis() as u64,
    }))
    .into_response()
}
