//! HTTP implementation of the `ReplicaClient` trait.

use crate::client::{HttpClient, NetError};
use crate::messages::{GetRequest, GetResponse, KeysRequest, KeysResponse, PutRequest, PutResponse};
use driftdb_common::{base_url, NodeInfo};
use driftdb_kv::replica_client::{ReplicaClient, ReplicaError};
use driftdb_storage::record::{Meta, Record};
use std::collections::HashMap;
use std::time::Duration;

/// Talks to peers via their `/internal/*` endpoints.
#[derive(Debug, Clone)]
pub struct HttpReplicaClient {
    client: HttpClient,
}

impl HttpReplicaClient {
    pub fn new(timeout: Duration) -> Result<Self, NetError> {
        Ok(Self {
            client: HttpClient::new(timeout)?,
        })
    }
}

fn to_replica_err(e: NetError) -> ReplicaError {
    match e {
        NetError::Http(e) if e.is_timeout() => ReplicaError::Timeout,
        NetError::Http(e) => ReplicaError::Transport(e.to_string()),
        NetError::Status { url, status } => ReplicaError::Status { url, status },
    }
}

fn count_call(call_type: &str) {
    let m = driftdb_metrics::metrics();
    m.replica_calls_sent.inc();
    m.replica_calls_sent_by_type
        .with_label_values(&[call_type])
        .inc();
}

#[async_trait::async_trait]
impl ReplicaClient for HttpReplicaClient {
    async fn replica_put(
        &self,
        target: &NodeInfo,
        record: &Record,
        hint_for: &str,
    ) -> Result<(), ReplicaError> {
        count_call("put");
        let url = format!("{}/internal/put", base_url(&target.addr));
        let req = PutRequest {
            record: record.clone(),
            hint_for: hint_for.to_string(),
        };
        let resp: PutResponse = self
            .client
            .post_json(&url, &req)
            .await
            .map_err(to_replica_err)?;
        if !resp.ok {
            return Err(ReplicaError::Transport(format!("{} refused the record", target.id)));
        }
        Ok(())
    }

    async fn replica_get(
        &self,
        target: &NodeInfo,
        key: &str,
    ) -> Result<Option<Record>, ReplicaError> {
        count_call("get");
        let url = format!("{}/internal/get", base_url(&target.addr));
        let req = GetRequest {
            key: key.to_string(),
        };
        let resp: GetResponse = self
            .client
            .post_json(&url, &req)
            .await
            .map_err(to_replica_err)?;
        if !resp.found {
            return Ok(None);
        }
        // A found response without a record is a malformed payload and
        // counts as a failed participant.
        resp.record.map(Some).ok_or_else(|| {
            ReplicaError::Transport(format!("{} sent found=true without a record", target.id))
        })
    }

    async fn replica_keys(
        &self,
        target: &NodeInfo,
    ) -> Result<HashMap<String, Meta>, ReplicaError> {
        count_call("keys");
        let url = format!("{}/internal/keys", base_url(&target.addr));
        let resp: KeysResponse = self
            .client
            .post_json(&url, &KeysRequest::default())
            .await
            .map_err(to_replica_err)?;
        Ok(resp.keys)
    }
}
