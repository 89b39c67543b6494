//! Cluster configuration schema and loader for driftdb nodes.
//!
//! The cluster is static: every node loads the same JSON file listing all
//! members, the virtual-node count, and the N/R/W quorum settings.

use driftdb_common::NodeInfo;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level cluster configuration, shared by every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// All cluster members.
    pub nodes: Vec<NodeInfo>,

    /// Virtual nodes per physical node on the hash ring.
    pub vnodes: usize,

    /// Replication factor (N).
    pub n: usize,

    /// Read quorum (R).
    pub r: usize,

    /// Write quorum (W).
    pub w: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("node id {0:?} not found in config")]
    UnknownNode(String),
}

impl ClusterConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("config has 0 nodes".into()));
        }
        for (i, a) in self.nodes.iter().enumerate() {
            if a.id.is_empty() {
                return Err(ConfigError::Invalid(format!("node {} has empty id", i)));
            }
            if self.nodes[i + 1..].iter().any(|b| b.id == a.id) {
                return Err(ConfigError::Invalid(format!("duplicate node id {:?}", a.id)));
            }
        }
        if self.vnodes == 0 {
            return Err(ConfigError::Invalid("vnodes must be > 0".into()));
        }
        if self.n == 0 || self.n > self.nodes.len() {
            return Err(ConfigError::Invalid(format!(
                "bad n={} (nodes={})",
                self.n,
                self.nodes.len()
            )));
        }
        if self.r == 0 || self.r > self.n {
            return Err(ConfigError::Invalid(format!(
                "bad quorum r={} for n={}",
                self.r, self.n
            )));
        }
        if self.w == 0 || self.w > self.n {
            return Err(ConfigError::Invalid(format!(
                "bad quorum w={} for n={}",
                self.w, self.n
            )));
        }
        Ok(())
    }

    /// Look up this process's own entry by node id.
    pub fn find_self(&self, id: &str) -> Result<NodeInfo, ConfigError> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownNode(id.to_string()))
    }
}

/// Load a `ClusterConfig` from a JSON file path.
pub fn load_from_file(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `ClusterConfig` from a JSON string.
pub fn load_from_str(json: &str) -> Result<ClusterConfig, ConfigError> {
    let config: ClusterConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}
