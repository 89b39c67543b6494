//! Consistent-hash ring: maps a key to its ordered replica set.
//!
//! Each physical node owns a fixed number of virtual nodes; vnode tokens
//! are FNV-1a 64 hashes of `"<node_id>#<vindex>"`. Lookups walk the
//! sorted token sequence clockwise from the key's hash, collecting
//! distinct physical nodes.

use driftdb_common::NodeInfo;
use fnv::FnvHasher;
use std::collections::HashSet;
use std::hash::Hasher;

/// One virtual position on the ring.
#[derive(Debug, Clone)]
pub struct VNode {
    pub token: u64,
    pub node: NodeInfo,
    pub vindex: usize,
}

/// The ring itself: a token-sorted sequence of vnodes. Immutable after
/// construction; identical config yields an identical ring on every node.
#[derive(Debug, Clone)]
pub struct Ring {
    vnodes: Vec<VNode>,
}

impl Ring {
    /// Build a ring with `vnodes_per_node` virtual nodes per member.
    pub fn new(nodes: &[NodeInfo], vnodes_per_node: usize) -> Self {
        let mut vnodes = Vec::with_capacity(nodes.len() * vnodes_per_node);
        for node in nodes {
            for vindex in 0..vnodes_per_node {
                vnodes.push(VNode {
                    token: hash64(&format!("{}#{}", node.id, vindex)),
                    node: node.clone(),
                    vindex,
                });
            }
        }
        vnodes.sort_by(|a, b| {
            a.token
                .cmp(&b.token)
                .then_with(|| a.node.id.cmp(&b.node.id))
                .then(a.vindex.cmp(&b.vindex))
        });
        Self { vnodes }
    }

    /// The first `n` distinct physical nodes responsible for `key`,
    /// walking clockwise from the key's token. Returns fewer than `n`
    /// only when the cluster itself is smaller.
    pub fn replicas(&self, key: &str, n: usize) -> Vec<NodeInfo> {
        if self.vnodes.is_empty() || n == 0 {
            return Vec::new();
        }

        let start = self.search(hash64(key));
        let mut seen: HashSet<&str> = HashSet::with_capacity(n);
        let mut out = Vec::with_capacity(n);

        for i in 0..self.vnodes.len() {
            if out.len() >= n {
                break;
            }
            let vn = &self.vnodes[(start + i) % self.vnodes.len()];
            if seen.insert(&vn.node.id) {
                out.push(vn.node.clone());
            }
        }
        out
    }

    /// Index of the first vnode with token >= target, wrapping to 0.
    fn search(&self, target: u64) -> usize {
        let i = self.vnodes.partition_point(|v| v.token < target);
        if i == self.vnodes.len() {
            0
        } else {
            i
        }
    }

    pub fn len(&self) -> usize {
        self.vnodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }
}

fn hash64(s: &str) -> u64 {
    let mut h = FnvHasher::default();
    h.write(s.as_bytes());
    h.finish()
}
