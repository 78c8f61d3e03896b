// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Device removal: evict every brick on a device, then fail the device.
//!
//! Each brick moves through a child [`BrickEvictOperation`] whose entry
//! is linked under the parent in the same transaction that records it.
//! A crash mid-removal leaves at most one child entry behind; the parent
//! cleans it through the child's own recovery path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use quarry_core::error::{Error, Result};
use quarry_core::{Brick, Device, EntryState, OpType, PendingChange, PendingOperation, Volume};
use quarry_store::{Reader, Store};

use crate::brick_evict::{BrickEvictOperation, HealCheck};
use crate::executor::Executor;
use crate::operation::Operation;

/// Removes a device from service by draining its bricks.
pub struct DeviceRemoveOperation {
    store: Arc<Store>,
    device_id: Uuid,
    entry: PendingOperation,
    heal_check: HealCheck,
    noop: bool,
    cleaned_child: Option<BrickEvictOperation>,
}

impl DeviceRemoveOperation {
    /// Prepares the removal of `device_id`. The device must already be
    /// offline so no new bricks land on it; build refuses an online one.
    #[must_use]
    pub fn new(store: Arc<Store>, device_id: Uuid) -> Self {
        Self {
            store,
            device_id,
            entry: PendingOperation::new(OpType::DeviceRemove),
            heal_check: HealCheck::Enforce,
            noop: false,
            cleaned_child: None,
        }
    }

    /// Overrides the heal verification policy of the child evictions.
    #[must_use]
    pub fn with_heal_check(mut self, heal_check: HealCheck) -> Self {
        self.heal_check = heal_check;
        self
    }

    /// Rebuilds the operation from a recovered pending entry.
    pub(crate) fn from_entry(store: Arc<Store>, entry: PendingOperation) -> Result<Self> {
        let device_id = entry
            .ids_for(PendingChange::RemoveDevice)
            .first()
            .copied()
            .ok_or_else(|| Error::Malformed(format!("entry {} has no device action", entry.id)))?;
        Ok(Self {
            store,
            device_id,
            entry,
            heal_check: HealCheck::Enforce,
            noop: false,
            cleaned_child: None,
        })
    }

    /// Runs one child eviction: build linked under the parent, exec,
    /// finalize with the parent link cleared, all metadata writes shared
    /// with the parent entry's transactions.
    async fn evict_one(&mut self, executor: Arc<dyn Executor>, brick_id: Uuid) -> Result<()> {
        let parent_id = self.entry.id;
        let mut child = BrickEvictOperation::new(self.store.clone(), brick_id)
            .with_heal_check(self.heal_check);

        let parent = self.store.update(|tx| {
            let mut parent: PendingOperation = tx.get(parent_id)?;
            child.build_in(tx, Some(&mut parent))?;
            tx.put(&parent)?;
            Ok(parent)
        })?;
        self.entry = parent;

        match child.exec(executor.clone()).await {
            Ok(()) => {
                let parent = self.store.update(|tx| {
                    let mut parent: PendingOperation = tx.get(parent_id)?;
                    child.finalize_in(tx, Some(&mut parent))?;
                    tx.put(&parent)?;
                    Ok(parent)
                })?;
                self.entry = parent;
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.device_id, brick = %brick_id, error = %e,
                    "child eviction failed");
                // The child's own recovery path also unlinks it from us.
                if let Err(re) = child.rollback(executor, &self.store).await {
                    error!(brick = %brick_id, error = %re, "child rollback failed");
                } else if let Some(entry) =
                    self.store.view(|tx| tx.try_get::<PendingOperation>(parent_id))?
                {
                    self.entry = entry;
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Operation for DeviceRemoveOperation {
    fn label(&self) -> &'static str {
        "device_remove"
    }

    fn resource_url(&self) -> String {
        format!("/devices/{}/remove", self.device_id)
    }

    fn build(&mut self, store: &Store) -> Result<()> {
        let device_id = self.device_id;
        let mut entry = PendingOperation::new(OpType::DeviceRemove);
        let noop = store.update(|tx| {
            let mut device: Device = tx.get(device_id)?;
            if device.state == EntryState::Online {
                // Placement would keep landing replacements right back
                // on the device being drained.
                return Err(Error::conflict(format!(
                    "device {device_id} is online; take it offline before removal"
                )));
            }
            if device.bricks.is_empty() {
                // Nothing to drain; the whole removal happens here.
                device.state = EntryState::Failed;
                tx.put(&device)?;
                info!(device = %device_id, "empty device removed");
                return Ok(true);
            }
            for brick_id in &device.bricks {
                let brick: Brick = tx.get(*brick_id)?;
                if brick.pending_id.is_some() {
                    return Err(Error::conflict(format!(
                        "brick {brick_id} on device {device_id} has a pending change"
                    )));
                }
                let volume: Volume = tx.get(brick.volume_id)?;
                if volume.pending_id.is_some() {
                    return Err(Error::conflict(format!(
                        "volume {} on device {device_id} has a pending change",
                        volume.id
                    )));
                }
            }
            entry.record_remove_device(device_id);
            tx.put(&entry)?;
            Ok(false)
        })?;
        self.noop = noop;
        self.entry = entry;
        Ok(())
    }

    async fn exec(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        if self.noop {
            return Ok(());
        }
        loop {
            let next = self.store.view(|tx| {
                let device: Device = tx.get(self.device_id)?;
                Ok(device.bricks.first().copied())
            })?;
            let Some(brick_id) = next else {
                return Ok(());
            };
            self.evict_one(executor.clone(), brick_id).await?;
        }
    }

    fn finalize(&mut self, store: &Store) -> Result<()> {
        if self.noop {
            return Ok(());
        }
        let entry_id = self.entry.id;
        store.update(|tx| {
            let mut device: Device = tx.get(self.device_id)?;
            device.state = EntryState::Failed;
            tx.put(&device)?;
            tx.delete::<PendingOperation>(entry_id)
        })
    }

    async fn clean(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        let Some(child_id) = self.entry.child_id() else {
            return Ok(());
        };
        let child_entry = self.store.view(|tx| tx.try_get::<PendingOperation>(child_id))?;
        if let Some(child_entry) = child_entry {
            let mut child = BrickEvictOperation::from_entry(self.store.clone(), child_entry)?;
            child.clean(executor).await?;
            self.cleaned_child = Some(child);
        }
        Ok(())
    }

    fn clean_done(&mut self, store: &Store) -> Result<()> {
        if let Some(mut child) = self.cleaned_child.take() {
            // Also clears our link to it.
            child.clean_done(store)?;
        }
        // The device stays offline rather than failed: the removal did
        // not finish, so the operator re-issues it.
        let entry_id = self.entry.id;
        store.update(|tx| {
            if tx.try_get::<PendingOperation>(entry_id)?.is_some() {
                tx.delete::<PendingOperation>(entry_id)?;
            }
            Ok(())
        })
    }
}
