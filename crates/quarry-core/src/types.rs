// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Core entity types for the cluster topology.
//!
//! All sizes are expressed in KiB unless noted otherwise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One KiB, the base size unit.
pub const KB: u64 = 1;
/// One MiB in KiB.
pub const MB: u64 = KB * 1024;
/// One GiB in KiB.
pub const GB: u64 = MB * 1024;
/// One TiB in KiB.
pub const TB: u64 = GB * 1024;

/// Smallest brick the allocator will create.
pub const BRICK_MIN_SIZE: u64 = GB;
/// Largest brick the allocator will create.
pub const BRICK_MAX_SIZE: u64 = 4 * TB;
/// Maximum number of bricks per volume.
pub const BRICK_MAX_NUM: usize = 32;
/// Default physical extent size for thin pool rounding.
pub const DEFAULT_EXTENT_SIZE: u64 = 4096 * KB;
/// Default thin pool snapshot reserve factor.
pub const DEFAULT_SNAPSHOT_FACTOR: f64 = 1.0;

/// Administrative state of a node or device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Entry participates in placement.
    Online,
    /// Entry is administratively disabled; existing bricks remain.
    Offline,
    /// Entry is permanently removed from service.
    Failed,
}

/// Free-form key/value tags attached to nodes and devices.
pub type Tags = BTreeMap<String, String>;

/// A storage cluster: the outermost placement boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique cluster id.
    pub id: Uuid,
    /// Member node ids.
    pub nodes: Vec<Uuid>,
    /// Volumes hosted by this cluster.
    pub volumes: Vec<Uuid>,
}

impl Cluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), nodes: Vec::new(), volumes: Vec::new() }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

/// A storage node. Nodes group devices and define the failure domain
/// within a zone: a replica set never places two bricks on one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id.
    pub id: Uuid,
    /// Owning cluster.
    pub cluster_id: Uuid,
    /// Zone number; zones are the coarsest failure domain.
    pub zone: u32,
    /// Hostname used for management operations.
    pub manage_host: String,
    /// Hostname advertised in brick paths.
    pub storage_host: String,
    /// Administrative state.
    pub state: EntryState,
    /// Node-level tags; device tags override these.
    pub tags: Tags,
    /// Devices attached to this node.
    pub devices: Vec<Uuid>,
}

impl Node {
    /// Creates a node in the given cluster and zone.
    #[must_use]
    pub fn new(cluster_id: Uuid, zone: u32, manage_host: &str, storage_host: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster_id,
            zone,
            manage_host: manage_host.to_string(),
            storage_host: storage_host.to_string(),
            state: EntryState::Online,
            tags: Tags::new(),
            devices: Vec::new(),
        }
    }

    /// Returns true if the node may receive new bricks.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state == EntryState::Online
    }
}

/// Space accounting for a device. `free + used == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    /// Total capacity.
    pub total: u64,
    /// Unallocated capacity.
    pub free: u64,
    /// Allocated capacity.
    pub used: u64,
}

/// A block device attached to a node. Devices are the unit of brick
/// placement and carry the space accounting for their bricks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device id.
    pub id: Uuid,
    /// Owning node.
    pub node_id: Uuid,
    /// Device path on the node, e.g. `/dev/sdb`.
    pub name: String,
    /// Administrative state.
    pub state: EntryState,
    /// Device-level tags; these override node tags.
    pub tags: Tags,
    /// Space accounting.
    pub storage: Storage,
    /// Physical extent size used for thin pool metadata rounding.
    pub extent_size: u64,
    /// Bricks hosted on this device.
    pub bricks: Vec<Uuid>,
}

impl Device {
    /// Creates a device on the given node.
    #[must_use]
    pub fn new(node_id: Uuid, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id,
            name: name.to_string(),
            state: EntryState::Online,
            tags: Tags::new(),
            storage: Storage::default(),
            extent_size: DEFAULT_EXTENT_SIZE,
            bricks: Vec::new(),
        }
    }

    /// Returns true if the device may receive new bricks.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state == EntryState::Online
    }

    /// Initializes the space counters to a freshly provisioned device.
    pub fn storage_set(&mut self, total: u64) {
        self.storage = Storage { total, free: total, used: 0 };
    }

    /// Reserves `amount` from free space.
    pub fn storage_allocate(&mut self, amount: u64) -> Result<()> {
        if self.storage.free < amount {
            return Err(Error::NoSpace);
        }
        self.storage.free -= amount;
        self.storage.used += amount;
        Ok(())
    }

    /// Returns `amount` to free space.
    pub fn storage_free(&mut self, amount: u64) {
        let amount = amount.min(self.storage.used);
        self.storage.free += amount;
        self.storage.used -= amount;
    }

    /// Thin pool metadata reservation: 0.5 % of the pool size, rounded up
    /// to the extent size.
    #[must_use]
    pub fn pool_metadata_size(&self, tp_size: u64) -> u64 {
        let mut size = tp_size / 200;
        let rem = size % self.extent_size;
        if rem != 0 {
            size += self.extent_size - rem;
        }
        size
    }

    /// Builds a brick of `amount` KiB on this device, reserving the thin
    /// pool and metadata space. Returns `None` if the device lacks the
    /// free space for the full reservation.
    pub fn new_brick(
        &mut self,
        amount: u64,
        snap_factor: f64,
        gid: i64,
        volume_id: Uuid,
    ) -> Option<Brick> {
        let tp_size = (amount as f64 * snap_factor) as u64;
        let metadata = self.pool_metadata_size(tp_size);
        let total = tp_size + metadata;
        if self.storage.free < total {
            return None;
        }
        // Infallible after the check above.
        self.storage.free -= total;
        self.storage.used += total;
        Some(Brick {
            id: Uuid::new_v4(),
            device_id: self.id,
            node_id: self.node_id,
            volume_id,
            size: amount,
            tp_size,
            pool_metadata_size: metadata,
            gid,
            pending_id: None,
        })
    }

    /// Records a brick on this device.
    pub fn brick_add(&mut self, brick_id: Uuid) {
        if !self.bricks.contains(&brick_id) {
            self.bricks.push(brick_id);
        }
    }

    /// Removes a brick from this device's list.
    pub fn brick_remove(&mut self, brick_id: Uuid) {
        self.bricks.retain(|b| *b != brick_id);
    }

    /// Checks the device can be deleted: no bricks may remain.
    pub fn check_delete(&self) -> Result<()> {
        if self.bricks.is_empty() {
            Ok(())
        } else {
            Err(Error::conflict(format!(
                "device {} still hosts {} brick(s)",
                self.id,
                self.bricks.len()
            )))
        }
    }
}

/// A brick: one replica's slice of a volume, hosted on one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brick {
    /// Unique brick id.
    pub id: Uuid,
    /// Hosting device.
    pub device_id: Uuid,
    /// Hosting node, denormalized for failure-domain checks.
    pub node_id: Uuid,
    /// Owning volume.
    pub volume_id: Uuid,
    /// Usable brick size.
    pub size: u64,
    /// Thin pool size backing the brick.
    pub tp_size: u64,
    /// Thin pool metadata reservation.
    pub pool_metadata_size: u64,
    /// Filesystem gid applied on creation.
    pub gid: i64,
    /// In-flight operation holding this brick, if any.
    pub pending_id: Option<Uuid>,
}

impl Brick {
    /// Total space this brick reserves on its device.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.tp_size + self.pool_metadata_size
    }

    /// Mount path of the brick directory on its node.
    #[must_use]
    pub fn path(&self) -> String {
        format!(
            "/var/lib/quarry/mounts/vg_{}/brick_{}/brick",
            self.device_id.simple(),
            self.id.simple()
        )
    }

    /// Backend brick name, `host:path`, as it appears in volume info.
    #[must_use]
    pub fn brick_name(&self, storage_host: &str) -> String {
        format!("{}:{}", storage_host, self.path())
    }
}

/// Durability scheme of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// No redundancy; each brick is a distinct distribute unit.
    Distribute,
    /// Synchronous replication with `replica` copies per set.
    Replicate {
        /// Copies per replica set.
        replica: usize,
    },
    /// Erasure coding with `data` + `redundancy` bricks per set.
    Disperse {
        /// Data bricks per set.
        data: usize,
        /// Redundancy bricks per set.
        redundancy: usize,
    },
}

impl Durability {
    /// Number of bricks each set requires.
    #[must_use]
    pub const fn bricks_in_set(&self) -> usize {
        match self {
            Self::Distribute => 1,
            Self::Replicate { replica } => *replica,
            Self::Disperse { data, redundancy } => *data + *redundancy,
        }
    }

    /// Returns the brick size proposal generator for a volume of `size`.
    #[must_use]
    pub const fn size_generator(&self, size: u64) -> SizeGenerator {
        let shards = match self {
            Self::Disperse { data, .. } => *data as u64,
            _ => 1,
        };
        SizeGenerator { size, sets: 1, shards }
    }
}

/// Yields `(set_count, brick_size)` proposals in decreasing brick-size
/// order. The set count doubles on each call; the caller retries smaller
/// bricks until placement succeeds or the minimum size is reached.
#[derive(Debug)]
pub struct SizeGenerator {
    size: u64,
    sets: u64,
    shards: u64,
}

impl SizeGenerator {
    /// Returns the next `(set_count, brick_size)` proposal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MinimumBrickSize`] when the next proposal would
    /// drop below [`BRICK_MIN_SIZE`].
    pub fn next_proposal(&mut self) -> Result<(u64, u64)> {
        loop {
            self.sets *= 2;
            let brick_size = self.size / self.sets / self.shards;
            if brick_size < BRICK_MIN_SIZE {
                return Err(Error::MinimumBrickSize);
            }
            if brick_size <= BRICK_MAX_SIZE {
                return Ok((self.sets, brick_size));
            }
        }
    }
}

/// A volume: a named filesystem spanning one or more brick sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Unique volume id.
    pub id: Uuid,
    /// Hosting cluster.
    pub cluster_id: Uuid,
    /// Backend volume name.
    pub name: String,
    /// Usable size.
    pub size: u64,
    /// Durability scheme.
    pub durability: Durability,
    /// True when one brick per set is a metadata-only arbiter.
    pub arbiter: bool,
    /// Device tag matching rules constraining placement, e.g. `tier=fast`.
    pub placement_rules: Vec<String>,
    /// Snapshot reserve factor for thin pools.
    pub snapshot_factor: f64,
    /// Filesystem gid for bricks.
    pub gid: i64,
    /// Member bricks, grouped into consecutive sets of
    /// `durability.bricks_in_set()` entries.
    pub bricks: Vec<Uuid>,
    /// In-flight operation holding this volume, if any.
    pub pending_id: Option<Uuid>,
}

impl Volume {
    /// Creates a volume of `size` KiB in the given cluster.
    #[must_use]
    pub fn new(cluster_id: Uuid, size: u64, durability: Durability) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            cluster_id,
            name: format!("vol_{}", id.simple()),
            size,
            durability,
            arbiter: false,
            placement_rules: Vec::new(),
            snapshot_factor: DEFAULT_SNAPSHOT_FACTOR,
            gid: 0,
            bricks: Vec::new(),
            pending_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_accounting() {
        let mut d = Device::new(Uuid::new_v4(), "/dev/sdb");
        d.storage_set(100 * GB);
        assert_eq!(d.storage.free + d.storage.used, d.storage.total);

        d.storage_allocate(30 * GB).unwrap();
        assert_eq!(d.storage.used, 30 * GB);
        assert_eq!(d.storage.free + d.storage.used, d.storage.total);

        d.storage_free(10 * GB);
        assert_eq!(d.storage.used, 20 * GB);
        assert_eq!(d.storage.free + d.storage.used, d.storage.total);

        assert!(matches!(d.storage_allocate(200 * GB), Err(Error::NoSpace)));
        // Failed allocation must not change the counters.
        assert_eq!(d.storage.free + d.storage.used, d.storage.total);
    }

    #[test]
    fn test_new_brick_reserves_pool_and_metadata() {
        let mut d = Device::new(Uuid::new_v4(), "/dev/sdb");
        d.storage_set(100 * GB);

        let vol = Uuid::new_v4();
        let b = d.new_brick(10 * GB, 1.5, 0, vol).unwrap();
        assert_eq!(b.size, 10 * GB);
        assert_eq!(b.tp_size, 15 * GB);
        assert_eq!(b.pool_metadata_size, d.pool_metadata_size(15 * GB));
        assert_eq!(d.storage.used, b.total_size());
        assert_eq!(d.storage.free + d.storage.used, d.storage.total);
    }

    #[test]
    fn test_new_brick_refuses_without_space() {
        let mut d = Device::new(Uuid::new_v4(), "/dev/sdb");
        d.storage_set(5 * GB);
        assert!(d.new_brick(10 * GB, 1.0, 0, Uuid::new_v4()).is_none());
        assert_eq!(d.storage.used, 0);
    }

    #[test]
    fn test_pool_metadata_rounds_to_extent() {
        let d = Device::new(Uuid::new_v4(), "/dev/sdb");
        let m = d.pool_metadata_size(10 * GB);
        assert_eq!(m % d.extent_size, 0);
        assert!(m >= 10 * GB / 200);
    }

    #[test]
    fn test_device_check_delete() {
        let mut d = Device::new(Uuid::new_v4(), "/dev/sdb");
        assert!(d.check_delete().is_ok());
        d.brick_add(Uuid::new_v4());
        assert!(matches!(d.check_delete(), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_size_generator_halves() {
        let mut gen = Durability::Replicate { replica: 3 }.size_generator(100 * GB);
        assert_eq!(gen.next_proposal().unwrap(), (2, 50 * GB));
        assert_eq!(gen.next_proposal().unwrap(), (4, 25 * GB));
        assert_eq!(gen.next_proposal().unwrap(), (8, 100 * GB / 8));
    }

    #[test]
    fn test_size_generator_minimum() {
        let mut gen = Durability::Distribute.size_generator(2 * GB);
        assert_eq!(gen.next_proposal().unwrap(), (2, GB));
        assert!(matches!(gen.next_proposal(), Err(Error::MinimumBrickSize)));
    }

    #[test]
    fn test_size_generator_skips_oversized() {
        // 16 TiB volume: a 2-way split is over the max brick size, so the
        // first proposal skips ahead to 4 sets.
        let mut gen = Durability::Replicate { replica: 2 }.size_generator(16 * TB);
        assert_eq!(gen.next_proposal().unwrap(), (4, 4 * TB));
    }

    #[test]
    fn test_disperse_divides_by_data_shards() {
        let mut gen = Durability::Disperse { data: 4, redundancy: 2 }.size_generator(80 * GB);
        assert_eq!(gen.next_proposal().unwrap(), (2, 10 * GB));
    }

    #[test]
    fn test_brick_name() {
        let mut d = Device::new(Uuid::new_v4(), "/dev/sdb");
        d.storage_set(100 * GB);
        let b = d.new_brick(10 * GB, 1.0, 0, Uuid::new_v4()).unwrap();
        let name = b.brick_name("host-1");
        assert!(name.starts_with("host-1:/var/lib/quarry/mounts/vg_"));
        assert!(name.ends_with("/brick"));
    }
}
