// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Brick placers.
//!
//! A placer walks ring candidates and fills brick sets position by
//! position. For every position it skips devices whose node already
//! hosts a member of the set, devices rejected by the caller's filter,
//! and devices without capacity; the first acceptable device wins. A
//! position with no acceptable device fails the placement with
//! `NoSpace`, and a failed placement releases every reservation it made.

use tracing::debug;
use uuid::Uuid;

use quarry_core::error::{Error, Result};
use quarry_core::tags::merge_tags;
use quarry_core::types::Tags;
use quarry_core::Device;

use crate::ring::Ring;
use crate::sets::{BrickSet, DeviceSet, PlacementResult};
use crate::source::DeviceSource;

/// Parameters for one placement run.
#[derive(Debug, Clone)]
pub struct PlacementOpts {
    /// Usable size of each data brick.
    pub brick_size: u64,
    /// Thin pool snapshot reserve factor.
    pub snap_factor: f64,
    /// Bricks per set.
    pub set_size: usize,
    /// Number of sets to place.
    pub set_count: usize,
    /// Expected average file size; drives the arbiter brick discount.
    pub average_file_size: u64,
    /// Filesystem gid for new bricks.
    pub gid: i64,
    /// Owning volume id stamped on new bricks.
    pub volume_id: Uuid,
}

/// Caller-supplied device acceptance test. Receives the set under
/// construction, the candidate device, and the merged node+device tags.
pub type DeviceFilter<'a> = &'a dyn Fn(&BrickSet, &Device, &Tags) -> bool;

/// Placement strategy for a volume's bricks.
pub trait BrickPlacer {
    /// Places all brick sets for a volume.
    fn place_all(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
    ) -> Result<PlacementResult>;

    /// Places a replacement for position `index` of an existing set.
    /// The returned result holds a single set pair: the input set with
    /// the replacement brick at `index`.
    fn replace(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
        set: &BrickSet,
        index: usize,
    ) -> Result<PlacementResult>;
}

/// Attempts to put a brick of `brick_size` at `index` on `device_id`.
/// Returns `Ok(false)` when the device is unsuitable and the scan
/// should move on.
pub(crate) fn try_place_on_device(
    src: &mut dyn DeviceSource,
    filter: Option<DeviceFilter<'_>>,
    opts: &PlacementOpts,
    brick_size: u64,
    bs: &mut BrickSet,
    ds: &mut DeviceSet,
    index: usize,
    device_id: Uuid,
) -> Result<bool> {
    let node_id = src.device(device_id)?.node_id;

    // One brick per node per set. The brick at `index` itself is
    // exempt: on replace the outgoing brick may share its node with
    // the replacement.
    for (i, b) in bs.bricks.iter().enumerate() {
        if i != index && b.node_id == node_id {
            return Ok(false);
        }
    }

    let node_tags = src.node(node_id)?.tags.clone();
    {
        let device = src.device(device_id)?;
        if let Some(f) = filter {
            let merged = merge_tags([&node_tags, &device.tags]);
            if !f(bs, device, &merged) {
                return Ok(false);
            }
        }
    }

    let device = src.device_mut(device_id)?;
    let Some(brick) = device.new_brick(brick_size, opts.snap_factor, opts.gid, opts.volume_id)
    else {
        return Ok(false);
    };
    device.brick_add(brick.id);
    debug!(device_id = %device_id, brick_id = %brick.id, index, "placed brick");
    bs.insert(index, brick);
    ds.insert(index, device_id);
    Ok(true)
}

/// Releases every reservation the given sets hold: storage goes back to
/// the devices and the bricks leave the device brick lists.
pub(crate) fn release_bricks(src: &mut dyn DeviceSource, sets: &[BrickSet]) -> Result<()> {
    for bs in sets {
        for b in &bs.bricks {
            let device = src.device_mut(b.device_id)?;
            device.storage_free(b.total_size());
            device.brick_remove(b.id);
        }
    }
    Ok(())
}

/// The default placer: all positions are equivalent data bricks.
#[derive(Debug, Default)]
pub struct StandardPlacer;

impl StandardPlacer {
    /// Creates a standard placer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn place_set(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
    ) -> Result<(BrickSet, DeviceSet)> {
        let mut bs = BrickSet::new(opts.set_size);
        let mut ds = DeviceSet::new(opts.set_size);

        let seed = Uuid::new_v4();
        for device_id in Ring::from_source(src)?.candidates(seed) {
            if bs.full() {
                break;
            }
            let index = bs.bricks.len();
            try_place_on_device(src, filter, opts, opts.brick_size, &mut bs, &mut ds, index, device_id)?;
        }

        if !bs.full() {
            debug!(placed = bs.bricks.len(), wanted = opts.set_size, "brick set unplaceable");
            release_bricks(src, std::slice::from_ref(&bs))?;
            return Err(Error::NoSpace);
        }
        Ok((bs, ds))
    }
}

impl BrickPlacer for StandardPlacer {
    fn place_all(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
    ) -> Result<PlacementResult> {
        let mut result = PlacementResult::new();
        for set_num in 0..opts.set_count {
            debug!(set = set_num, "allocating brick set");
            match self.place_set(src, opts, filter) {
                Ok((bs, ds)) => {
                    result.brick_sets.push(bs);
                    result.device_sets.push(ds);
                }
                Err(e) => {
                    release_bricks(src, &result.brick_sets)?;
                    return Err(e);
                }
            }
        }
        Ok(result)
    }

    fn replace(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
        set: &BrickSet,
        index: usize,
    ) -> Result<PlacementResult> {
        if index >= set.bricks.len() {
            return Err(Error::InvalidRequest(format!(
                "replace index {index} out of bounds (set has {})",
                set.bricks.len()
            )));
        }

        let mut wbs = BrickSet::new(set.set_size());
        let mut wds = DeviceSet::new(set.set_size());
        for (i, b) in set.bricks.iter().enumerate() {
            wbs.insert(i, b.clone());
            wds.insert(i, b.device_id);
        }

        let seed = Uuid::new_v4();
        for device_id in Ring::from_source(src)?.candidates(seed) {
            if try_place_on_device(
                src, filter, opts, opts.brick_size, &mut wbs, &mut wds, index, device_id,
            )? {
                return Ok(PlacementResult { brick_sets: vec![wbs], device_sets: vec![wds] });
            }
        }
        Err(Error::NoSpace)
    }
}
