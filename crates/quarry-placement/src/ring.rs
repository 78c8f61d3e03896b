// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! The balanced device ring.
//!
//! Devices are arranged into a list that interleaves zones, and nodes
//! within each zone, so that walking the list crosses failure domains
//! as fast as possible. For a given brick id the walk starts at
//! `ring_hash(brick_id) % len`, which makes candidate order
//! deterministic per brick while spreading different bricks around the
//! ring.
//!
//! The ring is rebuilt from the device source on every allocation, so
//! it always reflects the topology of the enclosing transaction and
//! there is no registry state to drift or lock.

use std::collections::BTreeMap;

use uuid::Uuid;

use quarry_core::error::Result;

use crate::hash::ring_hash;
use crate::source::DeviceSource;

/// A balanced ring of candidate devices.
#[derive(Debug, Default)]
pub struct Ring {
    // zone -> node -> devices, in insertion order per node
    zones: BTreeMap<u32, BTreeMap<Uuid, Vec<Uuid>>>,
}

impl Ring {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ring from the online devices of a source.
    pub fn from_source(src: &mut dyn DeviceSource) -> Result<Self> {
        let mut ring = Self::new();
        for dan in src.devices()? {
            ring.add(dan.zone, dan.node_id, dan.device_id);
        }
        Ok(ring)
    }

    /// Adds a device under its zone and node.
    pub fn add(&mut self, zone: u32, node_id: Uuid, device_id: Uuid) {
        self.zones.entry(zone).or_default().entry(node_id).or_default().push(device_id);
    }

    /// Number of devices in the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.values().flat_map(BTreeMap::values).map(Vec::len).sum()
    }

    /// True if the ring holds no devices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The balanced list: round-robin across zones, and across nodes
    /// within each zone.
    #[must_use]
    pub fn balanced_list(&self) -> Vec<Uuid> {
        let zone_lists: Vec<Vec<Uuid>> =
            self.zones.values().map(|nodes| interleave(nodes.values())).collect();
        interleave(zone_lists.iter())
    }

    /// Candidate devices for `brick_id`: the balanced list rotated by
    /// the brick's ring hash.
    #[must_use]
    pub fn candidates(&self, brick_id: Uuid) -> CandidateDevices {
        let mut list = self.balanced_list();
        if !list.is_empty() {
            let start = (ring_hash(brick_id) % list.len() as u64) as usize;
            list.rotate_left(start);
        }
        CandidateDevices { inner: list.into_iter() }
    }

    /// True if any device of `node_id` is in the ring.
    #[must_use]
    pub fn has_node(&self, node_id: Uuid) -> bool {
        self.zones.values().any(|nodes| nodes.contains_key(&node_id))
    }

    /// True if `device_id` is in the ring.
    #[must_use]
    pub fn has_device(&self, device_id: Uuid) -> bool {
        self.zones
            .values()
            .flat_map(BTreeMap::values)
            .any(|devices| devices.contains(&device_id))
    }
}

// Round-robin merge: one element from each list per round until all
// lists are exhausted.
fn interleave<'a, I>(lists: I) -> Vec<Uuid>
where
    I: Iterator<Item = &'a Vec<Uuid>> + Clone,
{
    let mut out = Vec::new();
    let mut round = 0;
    loop {
        let mut any = false;
        for list in lists.clone() {
            if let Some(id) = list.get(round) {
                out.push(*id);
                any = true;
            }
        }
        if !any {
            return out;
        }
        round += 1;
    }
}

/// A pull-based iterator over ring candidates for one brick.
#[derive(Debug)]
pub struct CandidateDevices {
    inner: std::vec::IntoIter<Uuid>,
}

impl Iterator for CandidateDevices {
    type Item = Uuid;

    fn next(&mut self) -> Option<Uuid> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for CandidateDevices {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_ring(zones: &[(u32, usize, usize)]) -> (Ring, HashMap<Uuid, u32>) {
        // (zone, nodes, devices per node)
        let mut ring = Ring::new();
        let mut zone_of = HashMap::new();
        for (zone, nodes, devs) in zones {
            for _ in 0..*nodes {
                let node_id = Uuid::new_v4();
                for _ in 0..*devs {
                    let device_id = Uuid::new_v4();
                    ring.add(*zone, node_id, device_id);
                    zone_of.insert(device_id, *zone);
                }
            }
        }
        (ring, zone_of)
    }

    #[test]
    fn test_balanced_list_contains_all_devices() {
        let (ring, zone_of) = make_ring(&[(1, 2, 3), (2, 1, 4), (3, 3, 1)]);
        let list = ring.balanced_list();
        assert_eq!(list.len(), ring.len());
        assert_eq!(list.len(), zone_of.len());
    }

    #[test]
    fn test_balanced_list_interleaves_zones() {
        let (ring, zone_of) = make_ring(&[(1, 1, 4), (2, 1, 4), (3, 1, 4)]);
        let list = ring.balanced_list();
        // With equal zone sizes, consecutive entries always differ in zone.
        for pair in list.windows(2) {
            assert_ne!(zone_of[&pair[0]], zone_of[&pair[1]]);
        }
    }

    #[test]
    fn test_candidates_deterministic_per_brick() {
        let (ring, _) = make_ring(&[(1, 2, 2), (2, 2, 2)]);
        let brick = Uuid::new_v4();
        let a: Vec<Uuid> = ring.candidates(brick).collect();
        let b: Vec<Uuid> = ring.candidates(brick).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_candidates_rotate_across_bricks() {
        let (ring, _) = make_ring(&[(1, 4, 4)]);
        let first: Vec<Uuid> = (0..64)
            .map(|_| ring.candidates(Uuid::new_v4()).next().unwrap())
            .collect();
        // 64 random bricks over 16 devices: first candidates must vary.
        let distinct: std::collections::HashSet<_> = first.iter().collect();
        assert!(distinct.len() > 1, "every brick started at the same device");
    }

    #[test]
    fn test_membership_checks() {
        let mut ring = Ring::new();
        let node = Uuid::new_v4();
        let device = Uuid::new_v4();
        ring.add(1, node, device);

        assert!(ring.has_node(node));
        assert!(ring.has_device(device));
        assert!(!ring.has_node(Uuid::new_v4()));
        assert!(!ring.has_device(Uuid::new_v4()));
    }

    #[test]
    fn test_empty_ring_yields_nothing() {
        let ring = Ring::new();
        assert!(ring.is_empty());
        assert_eq!(ring.candidates(Uuid::new_v4()).count(), 0);
    }
}
