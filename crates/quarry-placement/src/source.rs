// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Device sources: the placer's view of cluster topology.
//!
//! A placement run works against one request-scoped source. The source
//! reads entities through a cache and hands out mutable references to
//! the cached copies, so space reserved by one brick is visible to the
//! next placement decision in the same run. A cached entry is never
//! overwritten by a later read; the cache is the authority for the
//! whole request.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use quarry_core::error::Result;
use quarry_core::{Cluster, Device, Node};
use quarry_store::Reader;

/// A device paired with its hosting node's identity and zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAndNode {
    /// Device id.
    pub device_id: Uuid,
    /// Hosting node id.
    pub node_id: Uuid,
    /// The node's zone.
    pub zone: u32,
}

/// Topology access for placers.
pub trait DeviceSource {
    /// Returns the online devices of online nodes.
    fn devices(&mut self) -> Result<Vec<DeviceAndNode>>;

    /// Returns the device with the given id.
    fn device(&mut self, id: Uuid) -> Result<&Device>;

    /// Returns a mutable reference to the device with the given id.
    /// Mutations stay in the request cache until explicitly persisted.
    fn device_mut(&mut self, id: Uuid) -> Result<&mut Device>;

    /// Returns the node with the given id.
    fn node(&mut self, id: Uuid) -> Result<&Node>;
}

/// A read-through device source scoped to one cluster and one store
/// transaction.
pub struct ClusterDeviceSource<'a, R: Reader> {
    tx: &'a R,
    cluster: Cluster,
    down_nodes: HashSet<Uuid>,
    nodes: HashMap<Uuid, Node>,
    devices: HashMap<Uuid, Device>,
}

impl<'a, R: Reader> ClusterDeviceSource<'a, R> {
    /// Creates a source for `cluster_id`, loading the cluster entry.
    pub fn new(tx: &'a R, cluster_id: Uuid) -> Result<Self> {
        Self::with_health(tx, cluster_id, HashSet::new())
    }

    /// Creates a source that also excludes `down_nodes` from placement.
    /// A node marked administratively online but failing its liveness
    /// probes should not receive new bricks.
    pub fn with_health(tx: &'a R, cluster_id: Uuid, down_nodes: HashSet<Uuid>) -> Result<Self> {
        let cluster: Cluster = tx.get(cluster_id)?;
        Ok(Self { tx, cluster, down_nodes, nodes: HashMap::new(), devices: HashMap::new() })
    }

    /// The cluster this source serves.
    #[must_use]
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// All devices read (and possibly mutated) during this request.
    /// Callers persist these in the transaction that commits the
    /// placement.
    pub fn cached_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

impl<R: Reader> DeviceSource for ClusterDeviceSource<'_, R> {
    fn devices(&mut self) -> Result<Vec<DeviceAndNode>> {
        let node_ids = self.cluster.nodes.clone();
        let mut out = Vec::new();
        for node_id in node_ids {
            if self.down_nodes.contains(&node_id) {
                continue;
            }
            let (zone, device_ids) = {
                let node = self.node(node_id)?;
                if !node.is_online() {
                    continue;
                }
                (node.zone, node.devices.clone())
            };
            for device_id in device_ids {
                let device = self.device(device_id)?;
                if device.is_online() {
                    out.push(DeviceAndNode { device_id, node_id, zone });
                }
            }
        }
        Ok(out)
    }

    fn device(&mut self, id: Uuid) -> Result<&Device> {
        match self.devices.entry(id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(self.tx.get(id)?)),
        }
    }

    fn device_mut(&mut self, id: Uuid) -> Result<&mut Device> {
        match self.devices.entry(id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(self.tx.get(id)?)),
        }
    }

    fn node(&mut self, id: Uuid) -> Result<&Node> {
        match self.nodes.entry(id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(self.tx.get(id)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::types::GB;
    use quarry_core::EntryState;
    use quarry_store::Store;

    fn seed_cluster(store: &Store, zones: &[(u32, usize)]) -> (Uuid, Vec<Uuid>) {
        let mut cluster = Cluster::new();
        let mut device_ids = Vec::new();
        store
            .update(|tx| {
                for (zone, ndev) in zones {
                    let mut node =
                        Node::new(cluster.id, *zone, &format!("mgmt-{zone}"), &format!("stor-{zone}"));
                    for i in 0..*ndev {
                        let mut device = Device::new(node.id, &format!("/dev/sd{i}"));
                        device.storage_set(100 * GB);
                        node.devices.push(device.id);
                        device_ids.push(device.id);
                        tx.put(&device)?;
                    }
                    cluster.nodes.push(node.id);
                    tx.put(&node)?;
                }
                tx.put(&cluster)
            })
            .unwrap();
        (cluster.id, device_ids)
    }

    #[test]
    fn test_devices_skips_offline() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, device_ids) = seed_cluster(&store, &[(1, 2), (2, 1)]);

        // Take one device offline.
        store
            .update(|tx| {
                let mut d: Device = tx.get(device_ids[0])?;
                d.state = EntryState::Offline;
                tx.put(&d)
            })
            .unwrap();

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                let devices = src.devices()?;
                assert_eq!(devices.len(), 2);
                assert!(devices.iter().all(|d| d.device_id != device_ids[0]));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_devices_skips_probed_down_nodes() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, device_ids) = seed_cluster(&store, &[(1, 1), (2, 1)]);

        let down_node = store
            .view(|tx| {
                let d: Device = tx.get(device_ids[0])?;
                Ok(d.node_id)
            })
            .unwrap();

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::with_health(
                    tx,
                    cluster_id,
                    HashSet::from([down_node]),
                )?;
                let devices = src.devices()?;
                assert_eq!(devices.len(), 1);
                assert_ne!(devices[0].node_id, down_node);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_cache_is_never_overwritten() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, device_ids) = seed_cluster(&store, &[(1, 1)]);
        let id = device_ids[0];

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                src.device_mut(id)?.storage_allocate(10 * GB)?;

                // A later read-through must return the mutated entry,
                // not a fresh copy from the store.
                let d = src.device(id)?;
                assert_eq!(d.storage.used, 10 * GB);

                let listed = src.devices()?;
                assert_eq!(listed.len(), 1);
                let d = src.device(id)?;
                assert_eq!(d.storage.used, 10 * GB);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_cached_devices_reflect_mutations() {
        let store = Store::open_in_memory().unwrap();
        let (cluster_id, device_ids) = seed_cluster(&store, &[(1, 2)]);

        store
            .view(|tx| {
                let mut src = ClusterDeviceSource::new(tx, cluster_id)?;
                src.device_mut(device_ids[0])?.storage_allocate(GB)?;
                let used: u64 = src.cached_devices().map(|d| d.storage.used).sum();
                assert_eq!(used, GB);
                Ok(())
            })
            .unwrap();
    }
}
