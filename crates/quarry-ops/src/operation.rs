// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! The operation lifecycle.
//!
//! Every mutating request runs as an [`Operation`] with four phases:
//!
//! ```text
//!   build ──► exec ──► finalize
//!     │         │
//!     │         └─ error ──► rollback (clean + clean_done)
//!     └─ records a PendingOperation entry in the same transaction
//!        that allocates metadata
//! ```
//!
//! `build` and `finalize` are pure metadata transactions; `exec` does
//! only remote work. A crash between phases leaves the pending entry
//! behind for [`crate::cleaner::OperationCleaner`] to roll back or
//! forward at the next startup.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{error, info, warn};

use quarry_core::error::{Error, Result};
use quarry_core::Node;
use quarry_store::{Reader, Store};

use crate::executor::Executor;

/// A multi-phase operation against cluster metadata and storage nodes.
#[async_trait]
pub trait Operation: Send {
    /// Short label for logs and metrics.
    fn label(&self) -> &'static str;

    /// Identifier of the resource being operated on, for logs.
    fn resource_url(&self) -> String;

    /// How many extra attempts the driver may make when the operation
    /// fails for lack of space.
    fn max_retries(&self) -> u32 {
        0
    }

    /// Records intent and allocates metadata in one transaction.
    fn build(&mut self, store: &Store) -> Result<()>;

    /// Performs the remote work. Metadata writes happen only when the
    /// operation records progress, such as a replacement allocation or a
    /// child operation.
    async fn exec(&mut self, executor: Arc<dyn Executor>) -> Result<()>;

    /// Undoes a failed exec. The default runs the crash-recovery path.
    async fn rollback(&mut self, executor: Arc<dyn Executor>, store: &Store) -> Result<()> {
        self.clean(executor).await?;
        self.clean_done(store)
    }

    /// Commits results and removes the pending entry.
    fn finalize(&mut self, store: &Store) -> Result<()>;

    /// Remote part of crash recovery. Idempotent.
    async fn clean(&mut self, executor: Arc<dyn Executor>) -> Result<()>;

    /// Metadata part of crash recovery. Idempotent.
    fn clean_done(&mut self, store: &Store) -> Result<()>;
}

/// Picks the management host operations address for a cluster, skipping
/// offline nodes.
pub(crate) fn exec_host<R: Reader>(tx: &R, cluster_id: uuid::Uuid) -> Result<String> {
    let cluster: quarry_core::Cluster = tx.get(cluster_id)?;
    for node_id in &cluster.nodes {
        let node: Node = tx.get(*node_id)?;
        if node.is_online() {
            return Ok(node.manage_host);
        }
    }
    Err(Error::conflict(format!("cluster {cluster_id} has no online nodes")))
}

/// Runs an operation through build, exec, and finalize, rolling back on
/// exec failure.
///
/// Space exhaustion during build is retried up to `max_retries` times;
/// concurrent operations may have released space in between.
///
/// # Errors
///
/// Returns the first non-retryable error from any phase. When exec
/// fails, rollback runs first and the exec error is returned; a rollback
/// failure is logged and leaves the pending entry for the cleaner.
pub async fn run_operation(
    op: &mut dyn Operation,
    store: &Store,
    executor: Arc<dyn Executor>,
) -> Result<()> {
    let label = op.label();
    let mut attempt = 0;
    loop {
        info!(op = label, resource = %op.resource_url(), attempt, "building operation");
        match op.build(store) {
            Ok(()) => {}
            Err(e) if e.is_retryable_placement() && attempt < op.max_retries() => {
                warn!(op = label, error = %e, "build failed for lack of space, retrying");
                counter!("quarry_ops_build_retries_total", "op" => label).increment(1);
                attempt += 1;
                continue;
            }
            Err(e) => {
                counter!("quarry_ops_failed_total", "op" => label).increment(1);
                return Err(e);
            }
        }
        counter!("quarry_ops_started_total", "op" => label).increment(1);

        match op.exec(executor.clone()).await {
            Ok(()) => {
                op.finalize(store)?;
                counter!("quarry_ops_completed_total", "op" => label).increment(1);
                info!(op = label, resource = %op.resource_url(), "operation completed");
                return Ok(());
            }
            Err(e) => {
                warn!(op = label, resource = %op.resource_url(), error = %e,
                    "operation exec failed, rolling back");
                if let Err(re) = op.rollback(executor.clone(), store).await {
                    // The pending entry stays behind for the startup cleaner.
                    error!(op = label, error = %re, "rollback failed");
                    counter!("quarry_ops_rollback_failures_total", "op" => label).increment(1);
                }
                counter!("quarry_ops_failed_total", "op" => label).increment(1);
                if e.is_retryable_placement() && attempt < op.max_retries() {
                    attempt += 1;
                    continue;
                }
                return Err(e);
            }
        }
    }
}
