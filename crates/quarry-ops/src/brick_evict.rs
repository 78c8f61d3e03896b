// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Brick eviction: move one brick of a live volume to another device.
//!
//! Eviction runs in three exec phases: verify the brick is healed,
//! allocate a replacement at the same set position, then swap the bricks
//! on the backend. Crash recovery inspects the backend's brick list to
//! decide whether the swap happened and rolls the metadata forward or
//! back to match.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use quarry_core::error::{Error, Result};
use quarry_core::{Brick, OpType, PendingChange, PendingOperation, Volume};
use quarry_placement::{alloc_brick_replacement, BrickSet, ClusterDeviceSource};
use quarry_store::{Reader, Store, WriteTx};

use crate::bricks::{brick_targets, destroy_brick_checked, BrickTarget};
use crate::executor::Executor;
use crate::operation::{exec_host, Operation};
use crate::volume_ops::drop_brick;

/// Whether an eviction verifies the brick is fully healed before moving
/// it. Skipping the check risks data loss on the last good copy and is
/// only meant for bricks whose device is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealCheck {
    /// Refuse to evict a brick with unhealed entries.
    #[default]
    Enforce,
    /// Evict without consulting heal status.
    Disable,
}

/// What crash recovery observed on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanOutcome {
    /// The backend already serves the replacement; roll forward.
    Accept,
    /// The backend still serves the old brick; roll back.
    Revert,
    /// No replacement was ever allocated; just release the evict mark.
    NeverStarted,
}

/// State an eviction needs outside the store transaction it was loaded in.
struct EvictState {
    volume: Volume,
    old: BrickTarget,
    new: Option<BrickTarget>,
    host: String,
}

/// Evicts one brick from its device onto a replacement elsewhere.
pub struct BrickEvictOperation {
    store: Arc<Store>,
    brick_id: Uuid,
    entry: PendingOperation,
    heal_check: HealCheck,
    outcome: Option<CleanOutcome>,
    // Whether the destroyed brick actually gave its space back; a brick
    // presumed lost with its host keeps its device reservation.
    old_reclaimed: bool,
    new_reclaimed: bool,
}

impl BrickEvictOperation {
    /// Prepares the eviction of `brick_id`.
    #[must_use]
    pub fn new(store: Arc<Store>, brick_id: Uuid) -> Self {
        Self {
            store,
            brick_id,
            entry: PendingOperation::new(OpType::BrickEvict),
            heal_check: HealCheck::Enforce,
            outcome: None,
            old_reclaimed: true,
            new_reclaimed: true,
        }
    }

    /// Overrides the heal verification policy.
    #[must_use]
    pub fn with_heal_check(mut self, heal_check: HealCheck) -> Self {
        self.heal_check = heal_check;
        self
    }

    /// Rebuilds the operation from a recovered pending entry.
    pub(crate) fn from_entry(store: Arc<Store>, entry: PendingOperation) -> Result<Self> {
        let brick_id = entry
            .ids_for(PendingChange::EvictBrick)
            .first()
            .copied()
            .ok_or_else(|| Error::Malformed(format!("entry {} has no evict action", entry.id)))?;
        Ok(Self {
            store,
            brick_id,
            entry,
            heal_check: HealCheck::Enforce,
            outcome: None,
            old_reclaimed: true,
            new_reclaimed: true,
        })
    }

    /// Id of the pending entry backing this operation.
    #[must_use]
    pub fn entry_id(&self) -> Uuid {
        self.entry.id
    }

    /// Records intent in the given transaction, optionally linking the
    /// entry under a parent operation.
    pub(crate) fn build_in(
        &mut self,
        tx: &WriteTx,
        parent: Option<&mut PendingOperation>,
    ) -> Result<()> {
        let mut brick: Brick = tx.get(self.brick_id)?;
        if brick.pending_id.is_some() {
            return Err(Error::conflict(format!("brick {} has a pending change", brick.id)));
        }
        let volume: Volume = tx.get(brick.volume_id)?;
        if volume.pending_id.is_some() {
            return Err(Error::conflict(format!("volume {} has a pending change", volume.id)));
        }
        for sibling_id in &volume.bricks {
            if *sibling_id == brick.id {
                continue;
            }
            let sibling: Brick = tx.get(*sibling_id)?;
            if sibling.pending_id.is_some() {
                return Err(Error::conflict(format!(
                    "brick {sibling_id} in volume {} has a pending change",
                    volume.id
                )));
            }
        }

        let mut entry = PendingOperation::new(OpType::BrickEvict);
        entry.record_evict_brick(&mut brick);
        if let Some(parent) = parent {
            parent.record_child(&mut entry);
        }
        tx.put(&brick)?;
        tx.put(&entry)?;
        self.entry = entry;
        Ok(())
    }

    /// Commits an eviction in the given transaction: the volume points at
    /// the replacement, the old brick is released, the entry removed.
    pub(crate) fn finalize_in(
        &self,
        tx: &WriteTx,
        parent: Option<&mut PendingOperation>,
    ) -> Result<()> {
        let entry: PendingOperation = tx.get(self.entry.id)?;
        let new_id = entry.ids_for(PendingChange::AddBrick).first().copied().ok_or_else(|| {
            Error::Malformed(format!("entry {} has no replacement brick", entry.id))
        })?;

        let mut new_brick: Brick = tx.get(new_id)?;
        let mut volume: Volume = tx.get(new_brick.volume_id)?;
        if let Some(slot) = volume.bricks.iter().position(|b| *b == self.brick_id) {
            volume.bricks[slot] = new_id;
        }
        tx.put(&volume)?;
        new_brick.pending_id = None;
        tx.put(&new_brick)?;
        drop_brick(tx, self.brick_id, self.old_reclaimed)?;

        if let Some(parent) = parent {
            parent.clear_child(entry.id);
        }
        tx.delete::<PendingOperation>(entry.id)
    }

    fn load_state(&self) -> Result<EvictState> {
        self.store.view(|tx| {
            let old: Brick = tx.get(self.brick_id)?;
            let volume: Volume = tx.get(old.volume_id)?;
            let old_target = brick_targets(tx, std::slice::from_ref(&old))?
                .pop()
                .ok_or_else(|| Error::Malformed(format!("brick {} has no node", old.id)))?;
            let new = match self.entry.ids_for(PendingChange::AddBrick).first() {
                Some(id) => match tx.try_get::<Brick>(*id)? {
                    Some(brick) => brick_targets(tx, std::slice::from_ref(&brick))?.pop(),
                    None => None,
                },
                None => None,
            };
            let host = exec_host(tx, volume.cluster_id)?;
            Ok(EvictState { volume, old: old_target, new, host })
        })
    }

    /// Allocates the replacement brick at the evicted brick's set
    /// position, recording it on the pending entry.
    fn allocate_replacement(&mut self) -> Result<BrickTarget> {
        let entry_id = self.entry.id;
        let brick_id = self.brick_id;
        let (entry, target) = self.store.update(|tx| {
            let mut entry: PendingOperation = tx.get(entry_id)?;
            let old: Brick = tx.get(brick_id)?;
            let volume: Volume = tx.get(old.volume_id)?;

            let set_size = volume.durability.bricks_in_set();
            let pos = volume.bricks.iter().position(|b| *b == old.id).ok_or_else(|| {
                Error::Malformed(format!("brick {} not in volume {}", old.id, volume.id))
            })?;
            let set_start = pos - pos % set_size;
            let members = volume.bricks.get(set_start..set_start + set_size).ok_or_else(|| {
                Error::Malformed(format!("volume {} has a truncated brick set", volume.id))
            })?;
            let mut set = BrickSet::new(set_size);
            for id in members {
                set.add(tx.get(*id)?);
            }
            let index = pos % set_size;

            let mut src = ClusterDeviceSource::new(tx, volume.cluster_id)?;
            let result = alloc_brick_replacement(&mut src, &volume, old.size, &set, index)?;
            let mut new_brick = result.brick_sets[0].bricks[index].clone();
            entry.record_add_brick(&mut new_brick);
            tx.put(&new_brick)?;
            for device in src.cached_devices() {
                tx.put(device)?;
            }
            tx.put(&entry)?;

            let target = brick_targets(tx, std::slice::from_ref(&new_brick))?
                .pop()
                .ok_or_else(|| Error::Malformed(format!("brick {} has no node", new_brick.id)))?;
            Ok((entry, target))
        })?;
        self.entry = entry;
        Ok(target)
    }
}

#[async_trait]
impl Operation for BrickEvictOperation {
    fn label(&self) -> &'static str {
        "brick_evict"
    }

    fn resource_url(&self) -> String {
        format!("/bricks/{}/evict", self.brick_id)
    }

    fn build(&mut self, store: &Store) -> Result<()> {
        store.update(|tx| self.build_in(tx, None))
    }

    async fn exec(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        // Phase I: the brick must be fully healed before it can move.
        let state = self.load_state()?;
        let old_name = state.old.name();
        if self.heal_check == HealCheck::Enforce {
            let heal = executor.heal_status(&state.host, &state.volume.name).await?;
            if !heal.brick_healed(&old_name) {
                return Err(Error::conflict(format!(
                    "brick {} has unhealed entries, retry later",
                    self.brick_id
                )));
            }
        }

        // Phase II: allocate and record the replacement.
        let new_target = self.allocate_replacement()?;
        debug!(old = %self.brick_id, new = %new_target.brick.id, "replacement allocated");

        // Phase III: swap on the backend.
        executor.create_brick(&new_target.manage_host, &new_target.brick).await?;
        executor
            .replace_brick(&state.host, &state.volume.name, &old_name, &new_target.name())
            .await?;
        self.old_reclaimed = destroy_brick_checked(&executor, &state.old).await?;
        Ok(())
    }

    fn finalize(&mut self, store: &Store) -> Result<()> {
        store.update(|tx| self.finalize_in(tx, None))
    }

    async fn clean(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        let state = self.load_state()?;
        let outcome = match &state.new {
            None => CleanOutcome::NeverStarted,
            Some(new_target) => {
                let info = executor.volume_info(&state.host, &state.volume.name).await?;
                let old_name = state.old.name();
                let new_name = new_target.name();
                if info.bricks.contains(&new_name) {
                    CleanOutcome::Accept
                } else if info.bricks.contains(&old_name) {
                    CleanOutcome::Revert
                } else {
                    return Err(Error::Malformed(format!(
                        "volume {} lists neither {old_name} nor {new_name}",
                        state.volume.name
                    )));
                }
            }
        };

        match (outcome, &state.new) {
            (CleanOutcome::Accept, _) => {
                self.old_reclaimed = destroy_brick_checked(&executor, &state.old).await?;
            }
            (CleanOutcome::Revert, Some(new_target)) => {
                self.new_reclaimed = destroy_brick_checked(&executor, new_target).await?;
            }
            _ => {}
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    fn clean_done(&mut self, store: &Store) -> Result<()> {
        let Some(outcome) = self.outcome else {
            return Err(Error::Malformed(format!(
                "evict entry {} cleaned without an observed outcome",
                self.entry.id
            )));
        };
        let entry = self.entry.clone();
        store.update(|tx| {
            if tx.try_get::<PendingOperation>(entry.id)?.is_none() {
                return Ok(());
            }
            match outcome {
                CleanOutcome::Accept => {
                    // finalize_in unlinks from the parent itself below.
                    let parent = load_parent(tx, &entry)?;
                    match parent {
                        Some(mut parent) => {
                            self.finalize_in(tx, Some(&mut parent))?;
                            tx.put(&parent)?;
                        }
                        None => self.finalize_in(tx, None)?,
                    }
                    return Ok(());
                }
                CleanOutcome::Revert => {
                    if let Some(new_id) = entry.ids_for(PendingChange::AddBrick).first() {
                        drop_brick(tx, *new_id, self.new_reclaimed)?;
                    }
                    release_evict_mark(tx, self.brick_id)?;
                }
                CleanOutcome::NeverStarted => {
                    release_evict_mark(tx, self.brick_id)?;
                }
            }
            if let Some(mut parent) = load_parent(tx, &entry)? {
                parent.clear_child(entry.id);
                tx.put(&parent)?;
            }
            tx.delete::<PendingOperation>(entry.id)
        })
    }
}

fn load_parent(tx: &WriteTx, entry: &PendingOperation) -> Result<Option<PendingOperation>> {
    match entry.parent_id {
        Some(id) => tx.try_get(id),
        None => Ok(None),
    }
}

fn release_evict_mark(tx: &WriteTx, brick_id: Uuid) -> Result<()> {
    if let Some(mut brick) = tx.try_get::<Brick>(brick_id)? {
        brick.pending_id = None;
        tx.put(&brick)?;
    }
    Ok(())
}
