// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size positional sets of bricks and devices.
//!
//! A brick set holds the members of one replica set; the paired device
//! set holds the id of the device backing each position. Position `i` in
//! both collections always refers to the same replica.

use quarry_core::Brick;
use uuid::Uuid;

/// The bricks of one replica set, in position order.
#[derive(Debug, Clone)]
pub struct BrickSet {
    set_size: usize,
    /// Member bricks; `bricks.len() <= set_size`.
    pub bricks: Vec<Brick>,
}

impl BrickSet {
    /// Creates an empty set for `set_size` positions.
    #[must_use]
    pub fn new(set_size: usize) -> Self {
        Self { set_size, bricks: Vec::with_capacity(set_size) }
    }

    /// Number of positions this set holds when full.
    #[must_use]
    pub const fn set_size(&self) -> usize {
        self.set_size
    }

    /// True when every position is filled.
    #[must_use]
    pub fn full(&self) -> bool {
        self.bricks.len() == self.set_size
    }

    /// Appends a brick at the next free position.
    ///
    /// # Panics
    ///
    /// Panics if the set is already full; callers must check
    /// [`BrickSet::full`] first.
    pub fn add(&mut self, brick: Brick) {
        assert!(!self.full(), "add on a full brick set");
        self.bricks.push(brick);
    }

    /// Places a brick at `index`: appends when `index` is the next free
    /// position, replaces an existing member otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `index` is past the next free position.
    pub fn insert(&mut self, index: usize, brick: Brick) {
        if index == self.bricks.len() {
            assert!(index < self.set_size, "insert past set size");
            self.bricks.push(brick);
        } else if index < self.bricks.len() {
            self.bricks[index] = brick;
        } else {
            panic!("insert at {} skips unfilled positions (len {})", index, self.bricks.len());
        }
    }

    /// Removes the brick at `index`. Later members shift down, so
    /// positions are not preserved.
    pub fn drop_at(&mut self, index: usize) -> Brick {
        self.bricks.remove(index)
    }
}

/// The device ids backing one replica set, in position order.
#[derive(Debug, Clone)]
pub struct DeviceSet {
    set_size: usize,
    /// Backing device ids; `devices.len() <= set_size`.
    pub devices: Vec<Uuid>,
}

impl DeviceSet {
    /// Creates an empty set for `set_size` positions.
    #[must_use]
    pub fn new(set_size: usize) -> Self {
        Self { set_size, devices: Vec::with_capacity(set_size) }
    }

    /// Number of positions this set holds when full.
    #[must_use]
    pub const fn set_size(&self) -> usize {
        self.set_size
    }

    /// True when every position is filled.
    #[must_use]
    pub fn full(&self) -> bool {
        self.devices.len() == self.set_size
    }

    /// Appends a device at the next free position.
    ///
    /// # Panics
    ///
    /// Panics if the set is already full.
    pub fn add(&mut self, device_id: Uuid) {
        assert!(!self.full(), "add on a full device set");
        self.devices.push(device_id);
    }

    /// Places a device at `index`: appends when `index` is the next free
    /// position, replaces an existing member otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `index` is past the next free position.
    pub fn insert(&mut self, index: usize, device_id: Uuid) {
        if index == self.devices.len() {
            assert!(index < self.set_size, "insert past set size");
            self.devices.push(device_id);
        } else if index < self.devices.len() {
            self.devices[index] = device_id;
        } else {
            panic!("insert at {} skips unfilled positions (len {})", index, self.devices.len());
        }
    }

    /// Removes the device at `index`. Later members shift down, so
    /// positions are not preserved.
    pub fn drop_at(&mut self, index: usize) -> Uuid {
        self.devices.remove(index)
    }
}

/// The outcome of a placement: positionally aligned brick and device
/// sets. `device_sets[i].devices[j]` hosts `brick_sets[i].bricks[j]`.
#[derive(Debug, Default)]
pub struct PlacementResult {
    /// New brick sets.
    pub brick_sets: Vec<BrickSet>,
    /// Backing device sets.
    pub device_sets: Vec<DeviceSet>,
}

impl PlacementResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All bricks across all sets, in set order.
    pub fn bricks(&self) -> impl Iterator<Item = &Brick> {
        self.brick_sets.iter().flat_map(|bs| bs.bricks.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::types::GB;
    use quarry_core::Device;

    fn make_brick() -> Brick {
        let mut d = Device::new(Uuid::new_v4(), "/dev/sdb");
        d.storage_set(100 * GB);
        d.new_brick(GB, 1.0, 0, Uuid::new_v4()).unwrap()
    }

    #[test]
    fn test_add_until_full() {
        let mut bs = BrickSet::new(3);
        for _ in 0..3 {
            assert!(!bs.full());
            bs.add(make_brick());
        }
        assert!(bs.full());
    }

    #[test]
    #[should_panic(expected = "add on a full brick set")]
    fn test_add_past_full_panics() {
        let mut bs = BrickSet::new(1);
        bs.add(make_brick());
        bs.add(make_brick());
    }

    #[test]
    fn test_insert_appends_and_replaces() {
        let mut bs = BrickSet::new(3);
        let first = make_brick();
        let first_id = first.id;
        bs.insert(0, first);
        bs.insert(1, make_brick());

        let replacement = make_brick();
        let replacement_id = replacement.id;
        bs.insert(0, replacement);
        assert_eq!(bs.bricks[0].id, replacement_id);
        assert_ne!(bs.bricks[0].id, first_id);
        assert_eq!(bs.bricks.len(), 2);
    }

    #[test]
    #[should_panic(expected = "skips unfilled positions")]
    fn test_insert_with_gap_panics() {
        let mut bs = BrickSet::new(3);
        bs.insert(2, make_brick());
    }

    #[test]
    fn test_drop_shifts_positions() {
        let mut ds = DeviceSet::new(3);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            ds.add(*id);
        }
        let dropped = ds.drop_at(1);
        assert_eq!(dropped, ids[1]);
        assert_eq!(ds.devices, vec![ids[0], ids[2]]);
        assert!(!ds.full());
    }
}
