// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Arbiter-aware brick placement.
//!
//! An arbiter volume stores full data on all but one position of each
//! replica set; the remaining position holds a metadata-only arbiter
//! brick. The placer keeps two candidate rings: devices that may host
//! arbiter bricks and devices that may host data bricks, derived from
//! the merged `arbiter` tag. Devices tagged `required` are dedicated to
//! arbiter bricks and are ordered ahead of `supported` devices in the
//! arbiter ring, so a dedicated device always wins the arbiter slot
//! when it has capacity.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use quarry_core::error::{Error, Result};
use quarry_core::tags::merge_tags;
use quarry_core::types::KB;
use quarry_core::ArbiterTag;

use crate::placer::{
    release_bricks, try_place_on_device, BrickPlacer, DeviceFilter, PlacementOpts,
};
use crate::ring::Ring;
use crate::sets::{BrickSet, DeviceSet, PlacementResult};
use crate::source::DeviceSource;

/// Default expected average file size used for the arbiter discount.
pub const ARBITER_AVERAGE_FILE_SIZE: u64 = 64 * KB;

/// Position of the arbiter brick within each set.
pub const ARBITER_INDEX: usize = 0;

/// Placer for volumes with an arbiter position per set.
pub struct ArbiterPlacer {
    // injectable for tests
    can_host_arbiter: fn(ArbiterTag) -> bool,
    can_host_data: fn(ArbiterTag) -> bool,
}

impl Default for ArbiterPlacer {
    fn default() -> Self {
        Self::new()
    }
}

struct ScanRings {
    arbiter: Vec<Uuid>,
    data: Vec<Uuid>,
}

impl ArbiterPlacer {
    /// Creates a placer with the standard arbiter tag rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            can_host_arbiter: ArbiterTag::can_host_arbiter,
            can_host_data: ArbiterTag::can_host_data,
        }
    }

    /// Arbiter brick size: the data brick size divided by the expected
    /// number of KiB per directory entry.
    fn discounted_size(&self, opts: &PlacementOpts) -> Result<u64> {
        let discount = if opts.average_file_size == 0 {
            ARBITER_AVERAGE_FILE_SIZE
        } else {
            opts.average_file_size
        };
        if opts.brick_size < discount {
            return Err(Error::InvalidRequest(format!(
                "brick size {} too small for arbiter discount {}",
                opts.brick_size, discount
            )));
        }
        Ok(opts.brick_size / discount)
    }

    fn scan_rings(&self, src: &mut dyn DeviceSource) -> Result<ScanRings> {
        let mut arbiter_ring = Ring::new();
        let mut data_ring = Ring::new();
        let mut required = HashSet::new();

        for dan in src.devices()? {
            let node_tags = src.node(dan.node_id)?.tags.clone();
            let device_tags = src.device(dan.device_id)?.tags.clone();
            let tag = ArbiterTag::from_tags(&merge_tags([&node_tags, &device_tags]));

            // A supported device appears in both rings.
            if (self.can_host_arbiter)(tag) {
                arbiter_ring.add(dan.zone, dan.node_id, dan.device_id);
                if tag == ArbiterTag::Required {
                    required.insert(dan.device_id);
                }
            }
            if (self.can_host_data)(tag) {
                data_ring.add(dan.zone, dan.node_id, dan.device_id);
            }
        }

        let seed = Uuid::new_v4();
        let mut arbiter: Vec<Uuid> = arbiter_ring.candidates(seed).collect();
        // Stable: dedicated arbiter devices first, ring order otherwise.
        arbiter.sort_by_key(|id| !required.contains(id));
        let data = data_ring.candidates(seed).collect();
        Ok(ScanRings { arbiter, data })
    }

    fn place_position(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
        rings: &ScanRings,
        bs: &mut BrickSet,
        ds: &mut DeviceSet,
        index: usize,
    ) -> Result<()> {
        let (brick_size, candidates) = if index == ARBITER_INDEX {
            let size = self.discounted_size(opts)?;
            debug!(size, "placing arbiter brick with discounted size");
            (size, &rings.arbiter)
        } else {
            (opts.brick_size, &rings.data)
        };

        for &device_id in candidates {
            if try_place_on_device(src, filter, opts, brick_size, bs, ds, index, device_id)? {
                return Ok(());
            }
        }
        debug!(index, "no device for brick position");
        Err(Error::NoSpace)
    }

    fn place_set(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
    ) -> Result<(BrickSet, DeviceSet)> {
        let rings = self.scan_rings(src)?;
        let mut bs = BrickSet::new(opts.set_size);
        let mut ds = DeviceSet::new(opts.set_size);

        for index in 0..opts.set_size {
            if let Err(e) = self.place_position(src, opts, filter, &rings, &mut bs, &mut ds, index)
            {
                release_bricks(src, std::slice::from_ref(&bs))?;
                return Err(e);
            }
        }
        Ok((bs, ds))
    }
}

impl BrickPlacer for ArbiterPlacer {
    fn place_all(
        &self,
        src: &mut dyn DeviceSource,
        opts: &PlacementOpts,
        filter: Option<DeviceFilter<'_>>,
    ) -> Result<PlacementResult> {
        let mut result = PlacementResult::new();
        for set_num in 0..opts.set_count {
            debug!(set = set_num, "allocating arbiter brick set");
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

        let rings = self.scan_rings(src)?;
        self.place_position(src, opts, filter, &rings, &mut wbs, &mut wds, index)?;
        Ok(PlacementResult { brick_sets: vec![wbs], device_sets: vec![wds] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use quarry_core::types::GB;
    use quarry_core::{Cluster, Device, Node};
    use quarry_store::Store;

    use crate::source::ClusterDeviceSource;

    // Three single-device nodes; returns (cluster, [device ids]).
    fn seed_cluster(store: &Store, arbiter_tags: &[Option<&str>]) -> (Uuid, Vec<Uuid>) {
        let mut cluster = Cluster::new();
        let mut device_ids = Vec::new();
        store
            .update(|tx| {
                for (i, tag) in arbiter_tags.iter().enumerate() {
                    let mut node = Node::new(
                        cluster.id,
                        i as u32 + 1,
                        &format!("mgmt-{i}"),
                        &format!("stor-{i}"),
                    );
                    let mut device = Device::new(node.id, "/dev/sdb");
                    device.storage_set(500 * GB);
                    if let Some(value) = tag {
                        device.tags.insert("arbiter".into(), (*value).into());
                    }
                    node.devices.push(device.id);
                    device_ids.push(device.id);
                    cluster.nodes.push(node.id);
                    tx.put(&device)?;
                    tx.put(&node)?;
                }
                tx.put(&cluster)
            })
            .unwrap();
        (cluster.id, device_ids)
    }

    fn opts(brick_size: u64, set_count: usize) -> PlacementOpts {
        PlacementOpts {
            brick_size,
            snap_factor: 1.0,
            set_size: 3,
            set_count,
            average_file_size: ARBITER_AVERAGE_FILE_SIZE,
            gid: 0,
            volume_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_required_device_owns_arbiter_position() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, devices) =
            seed_cluster(&store, &[Some("required"), Some("supported"), Some("supported")]);
        let required = devices[0];

        // The volume seed is random per placement; repeat to cover
        // different ring rotations.
        for _ in 0..20 {
            store
                .view(|tx| {
                    let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                    let result =
                        ArbiterPlacer::new().place_all(&mut src, &opts(10 * GB, 1), None)?;
                    let ds = &result.device_sets[0];
                    assert_eq!(ds.devices[ARBITER_INDEX], required);
                    assert_ne!(ds.devices[1], required);
                    assert_ne!(ds.devices[2], required);
                    Ok(())
                })
                .unwrap();
        }
    }

    #[test]
    fn test_arbiter_brick_is_discounted() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, _) = seed_cluster(&store, &[None, None, None]);

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                let o = opts(64 * GB, 1);
                let result = ArbiterPlacer::new().place_all(&mut src, &o, None)?;
                let bs = &result.brick_sets[0];
                assert_eq!(bs.bricks[ARBITER_INDEX].size, 64 * GB / ARBITER_AVERAGE_FILE_SIZE);
                assert_eq!(bs.bricks[1].size, 64 * GB);
                assert_eq!(bs.bricks[2].size, 64 * GB);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_disabled_device_never_hosts_arbiter() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, devices) =
            seed_cluster(&store, &[Some("disabled"), None, None, None]);
        let disabled = devices[0];

        for _ in 0..20 {
            store
                .view(|tx| {
                    let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                    let result =
                        ArbiterPlacer::new().place_all(&mut src, &opts(10 * GB, 1), None)?;
                    assert_ne!(result.device_sets[0].devices[ARBITER_INDEX], disabled);
                    Ok(())
                })
                .unwrap();
        }
    }

    #[test]
    fn test_required_only_cluster_cannot_host_data() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, _) =
            seed_cluster(&store, &[Some("required"), Some("required"), Some("required")]);

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                let err = ArbiterPlacer::new()
                    .place_all(&mut src, &opts(10 * GB, 1), None)
                    .unwrap_err();
                assert!(matches!(err, Error::NoSpace));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_replace_arbiter_position_stays_on_arbiter_device() {
        let store = Store::open_in_memory().unwrap();
        // Two arbiter-capable devices so the replacement has a target.
        let (cluster_id, devices) = seed_cluster(
            &store,
            &[Some("required"), Some("supported"), Some("supported"), Some("required")],
        );

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                let placer = ArbiterPlacer::new();
                let o = opts(10 * GB, 1);
                let placed = placer.place_all(&mut src, &o, None)?;
                let set = &placed.brick_sets[0];

                let replaced = placer.replace(&mut src, &o, None, set, ARBITER_INDEX)?;
                let new_device = replaced.device_sets[0].devices[ARBITER_INDEX];
                // Only the two required devices can take the slot; the
                // original one is exempt from the node check but the
                // other required device is the expected winner.
                assert!(new_device == devices[0] || new_device == devices[3]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_node_level_arbiter_tag_is_inherited() {
        let store = Store::open_in_memory().unwrap();
        let mut cluster = Cluster::new();
        let mut device_ids = Vec::new();
        store
            .update(|tx| {
                for i in 0..3u32 {
                    let mut node =
                        Node::new(cluster.id, i + 1, &format!("m{i}"), &format!("s{i}"));
                    if i == 0 {
                        node.tags.insert("arbiter".into(), "required".into());
                    }
                    let mut device = Device::new(node.id, "/dev/sdb");
                    device.storage_set(500 * GB);
                    node.devices.push(device.id);
                    device_ids.push(device.id);
                    cluster.nodes.push(node.id);
                    tx.put(&device)?;
                    tx.put(&node)?;
                }
                tx.put(&cluster)
            })
            .unwrap();

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::new(tx, cluster.id)?;
                let result = ArbiterPlacer::new().place_all(&mut src, &opts(10 * GB, 1), None)?;
                assert_eq!(result.device_sets[0].devices[ARBITER_INDEX], device_ids[0]);
                Ok(())
            })
            .unwrap();
    }
}
