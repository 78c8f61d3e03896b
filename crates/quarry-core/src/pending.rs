// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Pending operation entries.
//!
//! Every multi-step operation records its intent as a `PendingOperation`
//! in the same transaction that allocates metadata. If the process dies
//! between that transaction and finalize, the entry is what the startup
//! cleaner uses to decide whether to roll the work forward or back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Brick, Volume};

/// The kind of change one action records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingChange {
    /// A volume is being created.
    AddVolume,
    /// A volume is being deleted.
    DeleteVolume,
    /// A volume is being expanded; delta carries the added size.
    ExpandVolume,
    /// A brick is being created.
    AddBrick,
    /// A brick is being deleted.
    DeleteBrick,
    /// A brick is being evicted from its device.
    EvictBrick,
    /// A device is being removed from service.
    RemoveDevice,
    /// Another pending operation runs as a child of this one.
    ChildOperation,
}

/// One recorded intent within a pending operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    /// What is changing.
    pub change: PendingChange,
    /// The entity (or child operation) the change applies to.
    pub id: Uuid,
    /// Size delta for expand actions; zero otherwise.
    pub delta: u64,
}

/// Type tag of a pending operation. The set is closed: an entry that
/// fails to deserialize to one of these cannot be cleaned automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// Volume creation.
    VolumeCreate,
    /// Volume expansion.
    VolumeExpand,
    /// Volume deletion.
    VolumeDelete,
    /// Device removal (evicts all bricks, then fails the device).
    DeviceRemove,
    /// Single brick eviction.
    BrickEvict,
}

/// Lifecycle status of a pending operation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    /// Entry belongs to a live operation.
    New,
    /// Entry survived a restart; owner process is gone.
    Stale,
    /// Automatic cleanup failed; operator attention needed.
    Failed,
}

/// A persisted record of an in-flight operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation id; entities touched by the operation carry it
    /// in their `pending_id`.
    pub id: Uuid,
    /// When the operation was recorded.
    pub timestamp: DateTime<Utc>,
    /// Operation kind.
    pub op_type: OpType,
    /// Lifecycle status.
    pub status: OpStatus,
    /// Recorded intents.
    pub actions: Vec<PendingAction>,
    /// Set when this operation runs as a child of another.
    pub parent_id: Option<Uuid>,
}

impl PendingOperation {
    /// Creates a new entry of the given kind.
    #[must_use]
    pub fn new(op_type: OpType) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            op_type,
            status: OpStatus::New,
            actions: Vec::new(),
            parent_id: None,
        }
    }

    fn push(&mut self, change: PendingChange, id: Uuid, delta: u64) {
        self.actions.push(PendingAction { change, id, delta });
    }

    fn remove(&mut self, change: PendingChange, id: Uuid) {
        self.actions.retain(|a| !(a.change == change && a.id == id));
    }

    /// Records the creation of `volume` and marks it pending.
    pub fn record_add_volume(&mut self, volume: &mut Volume) {
        volume.pending_id = Some(self.id);
        self.push(PendingChange::AddVolume, volume.id, 0);
    }

    /// Records the deletion of `volume` and marks it pending.
    pub fn record_delete_volume(&mut self, volume: &mut Volume) {
        volume.pending_id = Some(self.id);
        self.push(PendingChange::DeleteVolume, volume.id, 0);
    }

    /// Records an expansion of `volume` by `delta` and marks it pending.
    pub fn record_expand_volume(&mut self, volume: &mut Volume, delta: u64) {
        volume.pending_id = Some(self.id);
        self.push(PendingChange::ExpandVolume, volume.id, delta);
    }

    /// Records the creation of `brick` and marks it pending.
    pub fn record_add_brick(&mut self, brick: &mut Brick) {
        brick.pending_id = Some(self.id);
        self.push(PendingChange::AddBrick, brick.id, 0);
    }

    /// Records the deletion of `brick` and marks it pending.
    pub fn record_delete_brick(&mut self, brick: &mut Brick) {
        brick.pending_id = Some(self.id);
        self.push(PendingChange::DeleteBrick, brick.id, 0);
    }

    /// Records the eviction of `brick` and marks it pending.
    pub fn record_evict_brick(&mut self, brick: &mut Brick) {
        brick.pending_id = Some(self.id);
        self.push(PendingChange::EvictBrick, brick.id, 0);
    }

    /// Records the removal of a device.
    pub fn record_remove_device(&mut self, device_id: Uuid) {
        self.push(PendingChange::RemoveDevice, device_id, 0);
    }

    /// Clears the pending mark from `volume`.
    pub fn finalize_volume(&mut self, volume: &mut Volume) {
        volume.pending_id = None;
    }

    /// Clears the pending mark from `brick`.
    pub fn finalize_brick(&mut self, brick: &mut Brick) {
        brick.pending_id = None;
    }

    /// Links `child` as a child operation of this entry.
    pub fn record_child(&mut self, child: &mut PendingOperation) {
        child.parent_id = Some(self.id);
        self.push(PendingChange::ChildOperation, child.id, 0);
    }

    /// Removes the link to the given child operation.
    pub fn clear_child(&mut self, child_id: Uuid) {
        self.remove(PendingChange::ChildOperation, child_id);
    }

    /// True if this entry has linked child operations.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.actions.iter().any(|a| a.change == PendingChange::ChildOperation)
    }

    /// True if this entry runs under a parent operation.
    #[must_use]
    pub const fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Id of the first linked child operation, if any.
    #[must_use]
    pub fn child_id(&self) -> Option<Uuid> {
        self.actions.iter().find(|a| a.change == PendingChange::ChildOperation).map(|a| a.id)
    }

    /// Ids recorded with the given change kind, in recording order.
    #[must_use]
    pub fn ids_for(&self, change: PendingChange) -> Vec<Uuid> {
        self.actions.iter().filter(|a| a.change == change).map(|a| a.id).collect()
    }
}
