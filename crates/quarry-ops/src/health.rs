// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Cached node liveness.
//!
//! Placement never consults this cache (store state is authoritative),
//! but operations use it to avoid addressing backend commands to nodes
//! that failed their last probe.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::gauge;
use tokio::task::JoinSet;
use tracing::debug;
use uuid::Uuid;

use quarry_core::error::Result;
use quarry_core::Node;
use quarry_store::{Reader, Store};

use crate::executor::Executor;

/// Result of the most recent probe of one node.
#[derive(Debug, Clone, Copy)]
pub struct NodeHealth {
    /// Whether the probe succeeded.
    pub up: bool,
    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
}

/// Last-known probe results, keyed by node id.
#[derive(Default)]
pub struct NodeHealthCache {
    nodes: DashMap<Uuid, NodeHealth>,
}

impl NodeHealthCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last probe result for a node, if it has been probed.
    #[must_use]
    pub fn is_up(&self, node_id: Uuid) -> Option<bool> {
        self.nodes.get(&node_id).map(|h| h.up)
    }

    /// Records a probe result.
    pub fn mark(&self, node_id: Uuid, up: bool) {
        self.nodes.insert(node_id, NodeHealth { up, checked_at: Utc::now() });
    }

    /// Drops a node from the cache.
    pub fn forget(&self, node_id: Uuid) {
        self.nodes.remove(&node_id);
    }

    /// Nodes whose last probe failed. Placement excludes these via
    /// [`quarry_placement::ClusterDeviceSource::with_health`].
    #[must_use]
    pub fn down_nodes(&self) -> HashSet<Uuid> {
        self.nodes.iter().filter(|e| !e.value().up).map(|e| *e.key()).collect()
    }

    /// Probes every known node's management endpoint concurrently and
    /// refreshes the cache. Returns the number of nodes that answered.
    pub async fn refresh(&self, store: &Store, executor: Arc<dyn Executor>) -> Result<usize> {
        let nodes: Vec<Node> = store.view(|tx| tx.list())?;

        let mut probes = JoinSet::new();
        for node in nodes {
            let executor = executor.clone();
            probes.spawn(async move {
                let up = executor.probe(&node.manage_host).await.is_ok();
                (node.id, up)
            });
        }

        let mut up_count = 0;
        while let Some(joined) = probes.join_next().await {
            if let Ok((node_id, up)) = joined {
                debug!(node = %node_id, up, "node probe");
                self.mark(node_id, up);
                if up {
                    up_count += 1;
                }
            }
        }
        gauge!("quarry_nodes_up").set(up_count as f64);
        Ok(up_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::Cluster;

    use crate::mock::MockExecutor;

    #[tokio::test]
    async fn test_refresh_probes_all_nodes() {
        let store = Store::open_in_memory().unwrap();
        let cluster = Cluster::new();
        store
            .update(|tx| {
                for i in 0..3 {
                    let node =
                        Node::new(cluster.id, 1, &format!("mgmt-{i}"), &format!("stor-{i}"));
                    tx.put(&node)?;
                }
                tx.put(&cluster)
            })
            .unwrap();

        let exec = Arc::new(MockExecutor::new());
        let cache = NodeHealthCache::new();
        let up = cache.refresh(&store, exec.clone()).await.unwrap();
        assert_eq!(up, 3);
        assert_eq!(exec.call_count("probe"), 3);
    }

    #[tokio::test]
    async fn test_refresh_marks_down_nodes() {
        let store = Store::open_in_memory().unwrap();
        let cluster = Cluster::new();
        let node = Node::new(cluster.id, 1, "mgmt-0", "stor-0");
        let node_id = node.id;
        store
            .update(|tx| {
                tx.put(&node)?;
                tx.put(&cluster)
            })
            .unwrap();

        let exec = Arc::new(MockExecutor::new());
        exec.fail("probe", "unreachable");
        let cache = NodeHealthCache::new();
        let up = cache.refresh(&store, exec).await.unwrap();
        assert_eq!(up, 0);
        assert_eq!(cache.is_up(node_id), Some(false));
        assert_eq!(cache.down_nodes(), HashSet::from([node_id]));
    }

    #[test]
    fn test_mark_and_forget() {
        let cache = NodeHealthCache::new();
        let id = Uuid::new_v4();
        assert_eq!(cache.is_up(id), None);
        cache.mark(id, true);
        assert_eq!(cache.is_up(id), Some(true));
        cache.forget(id);
        assert_eq!(cache.is_up(id), None);
    }
}
