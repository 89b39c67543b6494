//! driftdb-common: shared types for the driftdb cluster.
//!
//! Provides the `NodeInfo` identity type plus the couple of helpers
//! (URL normalization, coordinator timestamps) every other crate needs.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A physical node in the statically-configured cluster.
///
/// `id` is the stable cluster-unique identifier; `addr` is the HTTP
/// listen address, with or without a scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub addr: String,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

/// Normalize a configured address into a base URL.
///
/// Addresses may omit the scheme; plain HTTP is assumed.
pub fn base_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// Wall-clock nanoseconds since the Unix epoch.
///
/// Record timestamps are assigned by the originating coordinator; skew
/// between node clocks is an accepted LWW tradeoff.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
