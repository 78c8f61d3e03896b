// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Volume create, expand, and delete operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use quarry_core::error::{Error, Result};
use quarry_core::{Brick, Cluster, Device, OpType, PendingChange, PendingOperation, Volume};
use quarry_placement::{alloc_bricks_in_cluster, ClusterDeviceSource};
use quarry_store::{Reader, Store, WriteTx};

use crate::bricks::{brick_targets, create_bricks, destroy_bricks, BrickTarget};
use crate::executor::{Executor, VolumeRequest};
use crate::operation::{exec_host, Operation};

/// How many times volume create and expand retry after a transient
/// space shortage.
const VOLUME_SPACE_RETRIES: u32 = 2;

fn persist_source(tx: &WriteTx, src: &ClusterDeviceSource<'_, WriteTx>) -> Result<()> {
    for device in src.cached_devices() {
        tx.put(device)?;
    }
    Ok(())
}

/// Removes a brick's metadata and releases its device reservation.
/// Missing entities are skipped so cleanup stays idempotent.
pub(crate) fn drop_brick(tx: &WriteTx, brick_id: Uuid, reclaim: bool) -> Result<()> {
    let Some(brick) = tx.try_get::<Brick>(brick_id)? else {
        return Ok(());
    };
    if let Some(mut device) = tx.try_get::<Device>(brick.device_id)? {
        device.brick_remove(brick.id);
        if reclaim {
            device.storage_free(brick.total_size());
        }
        tx.put(&device)?;
    }
    tx.delete::<Brick>(brick.id)
}

/// Creates a volume: allocates bricks, provisions them on nodes, and
/// assembles the backend volume.
pub struct VolumeCreateOperation {
    volume: Volume,
    entry: PendingOperation,
    targets: Vec<BrickTarget>,
    host: Option<String>,
}

impl VolumeCreateOperation {
    /// Prepares a create operation for `volume`.
    #[must_use]
    pub fn new(volume: Volume) -> Self {
        Self {
            volume,
            entry: PendingOperation::new(OpType::VolumeCreate),
            targets: Vec::new(),
            host: None,
        }
    }

    /// Rebuilds the operation from a recovered pending entry.
    pub(crate) fn from_entry(store: &Store, entry: PendingOperation) -> Result<Self> {
        let volume_id = entry
            .ids_for(PendingChange::AddVolume)
            .first()
            .copied()
            .ok_or_else(|| Error::Malformed(format!("entry {} has no volume action", entry.id)))?;
        store.view(|tx| {
            let volume: Volume = tx.get(volume_id)?;
            let bricks = load_bricks(tx, &entry.ids_for(PendingChange::AddBrick))?;
            let targets = brick_targets(tx, &bricks)?;
            let host = exec_host(tx, volume.cluster_id).ok();
            Ok(Self { volume, entry, targets, host })
        })
    }

    /// Id of the volume being created.
    #[must_use]
    pub fn volume_id(&self) -> Uuid {
        self.volume.id
    }
}

fn load_bricks<R: Reader>(tx: &R, ids: &[Uuid]) -> Result<Vec<Brick>> {
    ids.iter().filter_map(|id| tx.try_get::<Brick>(*id).transpose()).collect()
}

#[async_trait]
impl Operation for VolumeCreateOperation {
    fn label(&self) -> &'static str {
        "volume_create"
    }

    fn resource_url(&self) -> String {
        format!("/volumes/{}", self.volume.id)
    }

    fn max_retries(&self) -> u32 {
        VOLUME_SPACE_RETRIES
    }

    fn build(&mut self, store: &Store) -> Result<()> {
        let mut entry = PendingOperation::new(OpType::VolumeCreate);
        let mut volume = self.volume.clone();
        volume.bricks.clear();

        let (bricks, targets, host) = store.update(|tx| {
            let mut src = ClusterDeviceSource::new(tx, volume.cluster_id)?;
            let result = alloc_bricks_in_cluster(&mut src, &volume, volume.size)?;
            let mut bricks: Vec<Brick> = result.bricks().cloned().collect();
            for brick in &mut bricks {
                entry.record_add_brick(brick);
                volume.bricks.push(brick.id);
                tx.put(brick)?;
            }
            entry.record_add_volume(&mut volume);
            tx.put(&volume)?;
            persist_source(tx, &src)?;
            tx.put(&entry)?;

            let targets = brick_targets(tx, &bricks)?;
            let host = exec_host(tx, volume.cluster_id)?;
            Ok((bricks, targets, host))
        })?;

        debug!(volume = %volume.id, bricks = bricks.len(), "volume create recorded");
        self.volume = volume;
        self.entry = entry;
        self.targets = targets;
        self.host = Some(host);
        Ok(())
    }

    async fn exec(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        create_bricks(executor.clone(), &self.targets).await?;
        let host = self.host.as_deref().unwrap_or_default();
        let req = VolumeRequest {
            name: self.volume.name.clone(),
            bricks: self.targets.iter().map(BrickTarget::name).collect(),
            durability: self.volume.durability,
            arbiter: self.volume.arbiter,
            gid: self.volume.gid,
        };
        executor.create_volume(host, &req).await
    }

    fn finalize(&mut self, store: &Store) -> Result<()> {
        let entry = self.entry.clone();
        store.update(|tx| {
            let mut entry = entry;
            let mut volume: Volume = tx.get(self.volume.id)?;
            for brick_id in entry.ids_for(PendingChange::AddBrick) {
                let mut brick: Brick = tx.get(brick_id)?;
                entry.finalize_brick(&mut brick);
                tx.put(&brick)?;
            }
            entry.finalize_volume(&mut volume);
            tx.put(&volume)?;

            let mut cluster: Cluster = tx.get(volume.cluster_id)?;
            if !cluster.volumes.contains(&volume.id) {
                cluster.volumes.push(volume.id);
                tx.put(&cluster)?;
            }
            tx.delete::<PendingOperation>(entry.id)
        })
    }

    async fn clean(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        let host = self.host.as_deref().unwrap_or_default();
        // The backend volume may or may not exist; failure here only
        // matters if bricks cannot be destroyed either.
        if let Err(e) = executor.delete_volume(host, &self.volume.name).await {
            debug!(volume = %self.volume.name, error = %e, "volume delete during clean");
        }
        destroy_bricks(executor, &self.targets).await?;
        Ok(())
    }

    fn clean_done(&mut self, store: &Store) -> Result<()> {
        let entry = self.entry.clone();
        store.update(|tx| {
            for brick_id in entry.ids_for(PendingChange::AddBrick) {
                drop_brick(tx, brick_id, true)?;
            }
            if tx.try_get::<Volume>(self.volume.id)?.is_some() {
                tx.delete::<Volume>(self.volume.id)?;
            }
            if tx.try_get::<PendingOperation>(entry.id)?.is_some() {
                tx.delete::<PendingOperation>(entry.id)?;
            }
            Ok(())
        })
    }
}

/// Grows a volume by allocating and attaching additional brick sets.
pub struct VolumeExpandOperation {
    volume_id: Uuid,
    delta: u64,
    volume_name: String,
    entry: PendingOperation,
    targets: Vec<BrickTarget>,
    host: Option<String>,
}

impl VolumeExpandOperation {
    /// Prepares an expansion of `volume_id` by `delta` KiB.
    #[must_use]
    pub fn new(volume_id: Uuid, delta: u64) -> Self {
        Self {
            volume_id,
            delta,
            volume_name: String::new(),
            entry: PendingOperation::new(OpType::VolumeExpand),
            targets: Vec::new(),
            host: None,
        }
    }

    pub(crate) fn from_entry(store: &Store, entry: PendingOperation) -> Result<Self> {
        let volume_id = entry
            .ids_for(PendingChange::ExpandVolume)
            .first()
            .copied()
            .ok_or_else(|| Error::Malformed(format!("entry {} has no expand action", entry.id)))?;
        let delta = entry
            .actions
            .iter()
            .find(|a| a.change == PendingChange::ExpandVolume)
            .map_or(0, |a| a.delta);
        store.view(|tx| {
            let volume: Volume = tx.get(volume_id)?;
            let bricks = load_bricks(tx, &entry.ids_for(PendingChange::AddBrick))?;
            let targets = brick_targets(tx, &bricks)?;
            let host = exec_host(tx, volume.cluster_id).ok();
            Ok(Self { volume_id, delta, volume_name: volume.name, entry, targets, host })
        })
    }
}

#[async_trait]
impl Operation for VolumeExpandOperation {
    fn label(&self) -> &'static str {
        "volume_expand"
    }

    fn resource_url(&self) -> String {
        format!("/volumes/{}/expand", self.volume_id)
    }

    fn max_retries(&self) -> u32 {
        VOLUME_SPACE_RETRIES
    }

    fn build(&mut self, store: &Store) -> Result<()> {
        let mut entry = PendingOperation::new(OpType::VolumeExpand);
        let delta = self.delta;
        let volume_id = self.volume_id;

        let (name, targets, host) = store.update(|tx| {
            let mut volume: Volume = tx.get(volume_id)?;
            if volume.pending_id.is_some() {
                return Err(Error::conflict(format!("volume {volume_id} has a pending change")));
            }
            let mut src = ClusterDeviceSource::new(tx, volume.cluster_id)?;
            let result = alloc_bricks_in_cluster(&mut src, &volume, delta)?;
            let mut bricks: Vec<Brick> = result.bricks().cloned().collect();
            for brick in &mut bricks {
                entry.record_add_brick(brick);
                tx.put(brick)?;
            }
            entry.record_expand_volume(&mut volume, delta);
            tx.put(&volume)?;
            persist_source(tx, &src)?;
            tx.put(&entry)?;

            let targets = brick_targets(tx, &bricks)?;
            let host = exec_host(tx, volume.cluster_id)?;
            Ok((volume.name, targets, host))
        })?;

        self.volume_name = name;
        self.entry = entry;
        self.targets = targets;
        self.host = Some(host);
        Ok(())
    }

    async fn exec(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        create_bricks(executor.clone(), &self.targets).await?;
        let host = self.host.as_deref().unwrap_or_default();
        let names: Vec<String> = self.targets.iter().map(BrickTarget::name).collect();
        executor.expand_volume(host, &self.volume_name, &names).await
    }

    fn finalize(&mut self, store: &Store) -> Result<()> {
        let entry = self.entry.clone();
        store.update(|tx| {
            let mut entry = entry;
            let mut volume: Volume = tx.get(self.volume_id)?;
            for brick_id in entry.ids_for(PendingChange::AddBrick) {
                let mut brick: Brick = tx.get(brick_id)?;
                entry.finalize_brick(&mut brick);
                tx.put(&brick)?;
                volume.bricks.push(brick_id);
            }
            volume.size += self.delta;
            entry.finalize_volume(&mut volume);
            tx.put(&volume)?;
            tx.delete::<PendingOperation>(entry.id)
        })
    }

    async fn clean(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        destroy_bricks(executor, &self.targets).await?;
        Ok(())
    }

    fn clean_done(&mut self, store: &Store) -> Result<()> {
        let entry = self.entry.clone();
        store.update(|tx| {
            for brick_id in entry.ids_for(PendingChange::AddBrick) {
                drop_brick(tx, brick_id, true)?;
            }
            if let Some(mut volume) = tx.try_get::<Volume>(self.volume_id)? {
                volume.pending_id = None;
                tx.put(&volume)?;
            }
            if tx.try_get::<PendingOperation>(entry.id)?.is_some() {
                tx.delete::<PendingOperation>(entry.id)?;
            }
            Ok(())
        })
    }
}

/// Tears a volume down: deletes it from the backend, destroys its
/// bricks, and releases all metadata.
pub struct VolumeDeleteOperation {
    volume_id: Uuid,
    volume_name: String,
    cluster_id: Uuid,
    entry: PendingOperation,
    targets: Vec<BrickTarget>,
    host: Option<String>,
    reclaimed: HashMap<Uuid, bool>,
}

impl VolumeDeleteOperation {
    /// Prepares the deletion of `volume_id`.
    #[must_use]
    pub fn new(volume_id: Uuid) -> Self {
        Self {
            volume_id,
            volume_name: String::new(),
            cluster_id: Uuid::nil(),
            entry: PendingOperation::new(OpType::VolumeDelete),
            targets: Vec::new(),
            host: None,
            reclaimed: HashMap::new(),
        }
    }

    pub(crate) fn from_entry(store: &Store, entry: PendingOperation) -> Result<Self> {
        let volume_id = entry
            .ids_for(PendingChange::DeleteVolume)
            .first()
            .copied()
            .ok_or_else(|| Error::Malformed(format!("entry {} has no delete action", entry.id)))?;
        store.view(|tx| {
            let volume: Volume = tx.get(volume_id)?;
            let bricks = load_bricks(tx, &entry.ids_for(PendingChange::DeleteBrick))?;
            let targets = brick_targets(tx, &bricks)?;
            let host = exec_host(tx, volume.cluster_id).ok();
            Ok(Self {
                volume_id,
                volume_name: volume.name,
                cluster_id: volume.cluster_id,
                entry,
                targets,
                host,
                reclaimed: HashMap::new(),
            })
        })
    }
}

#[async_trait]
impl Operation for VolumeDeleteOperation {
    fn label(&self) -> &'static str {
        "volume_delete"
    }

    fn resource_url(&self) -> String {
        format!("/volumes/{}", self.volume_id)
    }

    fn build(&mut self, store: &Store) -> Result<()> {
        let mut entry = PendingOperation::new(OpType::VolumeDelete);
        let volume_id = self.volume_id;

        let (name, cluster_id, targets, host) = store.update(|tx| {
            let mut volume: Volume = tx.get(volume_id)?;
            if volume.pending_id.is_some() {
                return Err(Error::conflict(format!("volume {volume_id} has a pending change")));
            }
            let mut bricks = Vec::with_capacity(volume.bricks.len());
            for brick_id in &volume.bricks {
                let mut brick: Brick = tx.get(*brick_id)?;
                if brick.pending_id.is_some() {
                    return Err(Error::conflict(format!("brick {brick_id} has a pending change")));
                }
                entry.record_delete_brick(&mut brick);
                tx.put(&brick)?;
                bricks.push(brick);
            }
            entry.record_delete_volume(&mut volume);
            tx.put(&volume)?;
            tx.put(&entry)?;

            let targets = brick_targets(tx, &bricks)?;
            let host = exec_host(tx, volume.cluster_id)?;
            Ok((volume.name.clone(), volume.cluster_id, targets, host))
        })?;

        self.volume_name = name;
        self.cluster_id = cluster_id;
        self.entry = entry;
        self.targets = targets;
        self.host = Some(host);
        Ok(())
    }

    async fn exec(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        let host = self.host.as_deref().unwrap_or_default();
        executor.delete_volume(host, &self.volume_name).await?;
        self.reclaimed = destroy_bricks(executor, &self.targets).await?;
        Ok(())
    }

    fn finalize(&mut self, store: &Store) -> Result<()> {
        let entry = self.entry.clone();
        let reclaimed = self.reclaimed.clone();
        store.update(|tx| {
            for brick_id in entry.ids_for(PendingChange::DeleteBrick) {
                let reclaim = reclaimed.get(&brick_id).copied().unwrap_or(true);
                drop_brick(tx, brick_id, reclaim)?;
            }
            if let Some(mut cluster) = tx.try_get::<Cluster>(self.cluster_id)? {
                cluster.volumes.retain(|v| *v != self.volume_id);
                tx.put(&cluster)?;
            }
            if tx.try_get::<Volume>(self.volume_id)?.is_some() {
                tx.delete::<Volume>(self.volume_id)?;
            }
            if tx.try_get::<PendingOperation>(entry.id)?.is_some() {
                tx.delete::<PendingOperation>(entry.id)?;
            }
            Ok(())
        })
    }

    async fn clean(&mut self, executor: Arc<dyn Executor>) -> Result<()> {
        // Deletion rolls forward: redo the remote teardown.
        self.exec(executor).await
    }

    fn clean_done(&mut self, store: &Store) -> Result<()> {
        self.finalize(store)
    }
}
