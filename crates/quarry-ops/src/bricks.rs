// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Concurrent brick create/destroy against storage nodes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use quarry_core::error::{Error, Result};
use quarry_core::{Brick, Node};
use quarry_store::Reader;

use crate::executor::Executor;

/// A brick paired with the hosts needed to act on it.
#[derive(Debug, Clone)]
pub(crate) struct BrickTarget {
    pub brick: Brick,
    pub manage_host: String,
    pub storage_host: String,
}

impl BrickTarget {
    /// Backend brick name, `host:path`.
    pub fn name(&self) -> String {
        self.brick.brick_name(&self.storage_host)
    }
}

/// Resolves node hosts for a batch of bricks.
pub(crate) fn brick_targets<R: Reader>(tx: &R, bricks: &[Brick]) -> Result<Vec<BrickTarget>> {
    use std::collections::hash_map::Entry;

    let mut nodes: HashMap<Uuid, Node> = HashMap::new();
    let mut targets = Vec::with_capacity(bricks.len());
    for brick in bricks {
        let node = match nodes.entry(brick.node_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(tx.get(brick.node_id)?),
        };
        targets.push(BrickTarget {
            brick: brick.clone(),
            manage_host: node.manage_host.clone(),
            storage_host: node.storage_host.clone(),
        });
    }
    Ok(targets)
}

/// Creates all bricks concurrently. On any failure the bricks that did
/// get created are destroyed again before the error is returned.
pub(crate) async fn create_bricks(
    executor: Arc<dyn Executor>,
    targets: &[BrickTarget],
) -> Result<()> {
    let mut set = JoinSet::new();
    for target in targets.iter().cloned() {
        let executor = executor.clone();
        set.spawn(async move {
            let outcome = executor.create_brick(&target.manage_host, &target.brick).await;
            (target, outcome)
        });
    }

    let mut created = Vec::new();
    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((target, Ok(()))) => created.push(target),
            Ok((target, Err(e))) => {
                warn!(brick = %target.brick.id, host = %target.manage_host, error = %e,
                    "brick create failed");
                first_err.get_or_insert(e);
            }
            Err(e) => {
                first_err.get_or_insert(Error::Executor(e.to_string()));
            }
        }
    }

    match first_err {
        None => Ok(()),
        Some(e) => {
            if let Err(ce) = destroy_bricks(executor, &created).await {
                warn!(error = %ce, "compensating brick destroy failed");
            }
            Err(e)
        }
    }
}

/// Destroys one brick, downgrading the failure when the node itself no
/// longer answers probes. An unreachable host is presumed gone and its
/// space reported unreclaimed; a responsive host refusing the destroy
/// keeps the error, since accepting it would silently corrupt capacity
/// accounting.
pub(crate) async fn destroy_brick_checked(
    executor: &Arc<dyn Executor>,
    target: &BrickTarget,
) -> Result<bool> {
    match executor.destroy_brick(&target.manage_host, &target.brick).await {
        Ok(freed) => Ok(freed),
        Err(e) => {
            if executor.probe(&target.manage_host).await.is_ok() {
                return Err(e);
            }
            warn!(brick = %target.brick.id, host = %target.manage_host, error = %e,
                "brick destroy failed on unresponsive host, presumed gone");
            Ok(false)
        }
    }
}

/// Destroys bricks concurrently, returning which bricks actually
/// reclaimed space on their device. Failures on unresponsive hosts are
/// reported as not reclaimed; any other failure fails the batch.
pub(crate) async fn destroy_bricks(
    executor: Arc<dyn Executor>,
    targets: &[BrickTarget],
) -> Result<HashMap<Uuid, bool>> {
    let mut set = JoinSet::new();
    for target in targets.iter().cloned() {
        let executor = executor.clone();
        set.spawn(async move {
            let outcome = destroy_brick_checked(&executor, &target).await;
            (target, outcome)
        });
    }

    let mut reclaimed = HashMap::new();
    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((target, Ok(freed))) => {
                reclaimed.insert(target.brick.id, freed);
            }
            Ok((target, Err(e))) => {
                warn!(brick = %target.brick.id, host = %target.manage_host, error = %e,
                    "brick destroy failed");
                first_err.get_or_insert(e);
            }
            Err(e) => {
                first_err.get_or_insert(Error::Executor(e.to_string()));
            }
        }
    }

    match first_err {
        None => Ok(reclaimed),
        Some(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::types::GB;
    use quarry_core::Device;

    use crate::mock::MockExecutor;

    fn targets(n: usize) -> Vec<BrickTarget> {
        (0..n)
            .map(|i| {
                let mut dev = Device::new(Uuid::new_v4(), "/dev/sdb");
                dev.storage_set(100 * GB);
                let brick = dev.new_brick(GB, 1.0, 0, Uuid::new_v4()).unwrap();
                BrickTarget {
                    brick,
                    manage_host: format!("mgmt-{i}"),
                    storage_host: format!("stor-{i}"),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_all() {
        let exec = Arc::new(MockExecutor::new());
        let targets = targets(3);
        create_bricks(exec.clone(), &targets).await.unwrap();
        assert_eq!(exec.call_count("create_brick"), 3);
    }

    #[tokio::test]
    async fn test_create_failure_compensates() {
        let exec = Arc::new(MockExecutor::new());
        let targets = targets(3);
        exec.fail("create_brick", "no space on node");

        let err = create_bricks(exec.clone(), &targets).await.unwrap_err();
        assert!(matches!(err, Error::Executor(_)));
        // Nothing was created, so nothing to compensate.
        assert_eq!(exec.call_count("destroy_brick"), 0);
    }

    #[tokio::test]
    async fn test_destroy_on_dead_host_reports_not_reclaimed() {
        let exec = Arc::new(MockExecutor::new());
        let targets = targets(2);
        // The node answers neither the destroy nor the probe.
        exec.fail("destroy_brick", "connection refused");
        exec.fail("probe", "connection refused");

        let reclaimed = destroy_bricks(exec.clone(), &targets).await.unwrap();
        assert_eq!(reclaimed.len(), 2);
        assert!(reclaimed.values().all(|r| !r));
    }

    #[tokio::test]
    async fn test_destroy_failure_on_live_host_is_fatal() {
        let exec = Arc::new(MockExecutor::new());
        let targets = targets(2);
        // The node is up but refuses the destroy; swallowing that would
        // leak the space accounting.
        exec.fail("destroy_brick", "lv busy");

        assert!(destroy_bricks(exec.clone(), &targets).await.is_err());
        assert!(exec.called("probe"));
    }
}
