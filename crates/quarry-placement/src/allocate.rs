// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Cluster-level brick allocation.
//!
//! Turns a volume size into placed brick sets: a durability-specific
//! generator proposes `(set_count, brick_size)` pairs with progressively
//! smaller bricks, and each proposal is handed to the volume's placer
//! until one fits or the minimum brick size is reached.

use metrics::counter;
use tracing::{debug, info};

use quarry_core::error::{Error, Result};
use quarry_core::types::BRICK_MAX_NUM;
use quarry_core::Volume;

use crate::arbiter::{ArbiterPlacer, ARBITER_AVERAGE_FILE_SIZE};
use crate::placer::{BrickPlacer, PlacementOpts, StandardPlacer};
use crate::rule::TagMatchingRule;
use crate::sets::PlacementResult;
use crate::source::DeviceSource;

/// Returns the placer matching the volume's configuration.
#[must_use]
pub fn placer_for_volume(volume: &Volume) -> Box<dyn BrickPlacer> {
    if volume.arbiter {
        Box::new(ArbiterPlacer::new())
    } else {
        Box::new(StandardPlacer::new())
    }
}

fn placement_opts(volume: &Volume, set_count: usize, brick_size: u64) -> PlacementOpts {
    PlacementOpts {
        brick_size,
        snap_factor: volume.snapshot_factor,
        set_size: volume.durability.bricks_in_set(),
        set_count,
        average_file_size: ARBITER_AVERAGE_FILE_SIZE,
        gid: volume.gid,
        volume_id: volume.id,
    }
}

/// Allocates `size` KiB worth of brick sets for `volume` within the
/// source's cluster.
///
/// # Errors
///
/// - [`Error::MinimumBrickSize`] when no proposal fits above the
///   minimum brick size.
/// - [`Error::MaxBricksExceeded`] when a proposal would push the volume
///   past [`BRICK_MAX_NUM`] bricks.
/// - Any placement error other than `NoSpace` aborts immediately;
///   `NoSpace` retries the next (smaller) proposal.
pub fn alloc_bricks_in_cluster(
    src: &mut dyn DeviceSource,
    volume: &Volume,
    size: u64,
) -> Result<PlacementResult> {
    let placer = placer_for_volume(volume);
    let rules = TagMatchingRule::parse_all(&volume.placement_rules)?;
    let filter = |_bs: &crate::sets::BrickSet,
                  _d: &quarry_core::Device,
                  tags: &quarry_core::Tags| rules.iter().all(|r| r.test(tags));

    let mut gen = volume.durability.size_generator(size);
    loop {
        let (set_count, brick_size) = gen.next_proposal()?;
        let num_bricks = set_count as usize * volume.durability.bricks_in_set();
        if num_bricks + volume.bricks.len() > BRICK_MAX_NUM {
            return Err(Error::MaxBricksExceeded);
        }

        debug!(volume_id = %volume.id, set_count, brick_size, "trying brick size proposal");
        let opts = placement_opts(volume, set_count as usize, brick_size);
        match placer.place_all(src, &opts, Some(&filter)) {
            Ok(result) => {
                info!(volume_id = %volume.id, sets = result.brick_sets.len(), brick_size,
                    "placed brick sets");
                return Ok(result);
            }
            Err(Error::NoSpace) => {
                counter!("quarry_placement_retries_total").increment(1);
                debug!(volume_id = %volume.id, brick_size, "no space, retrying smaller bricks");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Allocates a replacement brick for position `index` of the given set,
/// using the same constraints as the original placement.
///
/// # Errors
///
/// Returns [`Error::NoReplacement`] when no device can host the brick.
pub fn alloc_brick_replacement(
    src: &mut dyn DeviceSource,
    volume: &Volume,
    brick_size: u64,
    set: &crate::sets::BrickSet,
    index: usize,
) -> Result<PlacementResult> {
    let placer = placer_for_volume(volume);
    let rules = TagMatchingRule::parse_all(&volume.placement_rules)?;
    let filter = |_bs: &crate::sets::BrickSet,
                  _d: &quarry_core::Device,
                  tags: &quarry_core::Tags| rules.iter().all(|r| r.test(tags));

    let opts = placement_opts(volume, 1, brick_size);
    match placer.replace(src, &opts, Some(&filter), set, index) {
        Ok(result) => Ok(result),
        Err(Error::NoSpace) => Err(Error::NoReplacement),
        Err(e) => Err(e),
    }
}
