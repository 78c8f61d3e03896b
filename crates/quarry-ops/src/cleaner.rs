// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Startup recovery of pending operations.
//!
//! On boot every pending entry belongs to a process that no longer
//! exists. The cleaner marks them all stale, then walks the non-child
//! entries and runs each operation's clean/clean_done pair. An entry
//! whose cleanup fails is marked failed and left for an operator.

use std::sync::Arc;

use metrics::{counter, gauge};
use tracing::{error, info};

use quarry_core::error::Result;
use quarry_core::{OpStatus, OpType, PendingOperation};
use quarry_store::{Reader, Store};

use crate::brick_evict::BrickEvictOperation;
use crate::device_remove::DeviceRemoveOperation;
use crate::executor::Executor;
use crate::operation::Operation;
use crate::volume_ops::{VolumeCreateOperation, VolumeDeleteOperation, VolumeExpandOperation};

/// Outcome counts of one cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanStats {
    /// Entries cleaned and removed.
    pub cleaned: usize,
    /// Child or already-failed entries left alone.
    pub skipped: usize,
    /// Entries whose cleanup failed; now marked failed.
    pub failed: usize,
}

/// Recovers pending operation entries left by a previous process.
pub struct OperationCleaner {
    store: Arc<Store>,
}

impl OperationCleaner {
    /// Creates a cleaner over the given store.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Marks every live entry stale. Run once, before serving requests.
    pub fn mark_stale(&self) -> Result<usize> {
        let marked = self.store.update(|tx| {
            let mut marked = 0;
            for mut entry in tx.list::<PendingOperation>()? {
                if entry.status == OpStatus::New {
                    entry.status = OpStatus::Stale;
                    tx.put(&entry)?;
                    marked += 1;
                }
            }
            Ok(marked)
        })?;
        if marked > 0 {
            info!(marked, "marked pending operations stale");
        }
        gauge!("quarry_ops_pending_entries").set(marked as f64);
        Ok(marked)
    }

    /// Cleans all stale entries. Children are skipped here; their parent
    /// operation recovers them.
    pub async fn clean_all(&self, executor: Arc<dyn Executor>) -> Result<CleanStats> {
        let entries = self.store.view(|tx| tx.list::<PendingOperation>())?;
        let mut stats = CleanStats::default();

        for entry in entries {
            if entry.is_child() || entry.status == OpStatus::Failed {
                stats.skipped += 1;
                continue;
            }
            let entry_id = entry.id;
            let op_type = entry.op_type;
            match self.clean_one(entry, executor.clone()).await {
                Ok(()) => {
                    counter!("quarry_ops_cleaned_total").increment(1);
                    stats.cleaned += 1;
                }
                Err(e) => {
                    error!(entry = %entry_id, ?op_type, error = %e,
                        "pending operation cleanup failed");
                    counter!("quarry_ops_clean_failures_total").increment(1);
                    self.mark_failed(entry_id)?;
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn clean_one(&self, entry: PendingOperation, executor: Arc<dyn Executor>) -> Result<()> {
        let mut op = self.load_operation(entry)?;
        op.clean(executor).await?;
        op.clean_done(&self.store)
    }

    /// Reconstructs the typed operation behind a pending entry.
    fn load_operation(&self, entry: PendingOperation) -> Result<Box<dyn Operation>> {
        Ok(match entry.op_type {
            OpType::VolumeCreate => Box::new(VolumeCreateOperation::from_entry(&self.store, entry)?),
            OpType::VolumeExpand => Box::new(VolumeExpandOperation::from_entry(&self.store, entry)?),
            OpType::VolumeDelete => Box::new(VolumeDeleteOperation::from_entry(&self.store, entry)?),
            OpType::DeviceRemove => {
                Box::new(DeviceRemoveOperation::from_entry(self.store.clone(), entry)?)
            }
            OpType::BrickEvict => {
                Box::new(BrickEvictOperation::from_entry(self.store.clone(), entry)?)
            }
        })
    }

    fn mark_failed(&self, entry_id: uuid::Uuid) -> Result<()> {
        self.store.update(|tx| {
            if let Some(mut entry) = tx.try_get::<PendingOperation>(entry_id)? {
                entry.status = OpStatus::Failed;
                tx.put(&entry)?;
            }
            Ok(())
        })
    }
}
