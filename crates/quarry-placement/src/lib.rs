// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Brick placement for quarry volumes.
//!
//! Given a cluster of nodes and devices, this crate decides which
//! devices host the bricks of a volume while spreading replicas across
//! failure domains:
//!
//! ```text
//!             ┌────────────┐   proposals    ┌──────────────┐
//!  Volume ──► │ allocate   │ ─────────────► │ BrickPlacer  │
//!             │ (size gen) │                │ std / arbiter│
//!             └────────────┘                └──────┬───────┘
//!                                                  │ candidates
//!                                           ┌──────▼───────┐
//!                                           │ Ring         │
//!                                           │ zone ▸ node  │
//!                                           └──────────────┘
//! ```
//!
//! Devices are read through a [`source::DeviceSource`], which caches
//! entries for the duration of one allocation so reservations made for
//! early sets are visible when placing later ones.

#![warn(missing_docs)]

pub mod allocate;
pub mod arbiter;
pub mod hash;
pub mod placer;
pub mod ring;
pub mod rule;
pub mod sets;
pub mod source;

pub use allocate::{alloc_brick_replacement, alloc_bricks_in_cluster, placer_for_volume};
pub use arbiter::ArbiterPlacer;
pub use placer::{BrickPlacer, DeviceFilter, PlacementOpts, StandardPlacer};
pub use ring::Ring;
pub use rule::TagMatchingRule;
pub use sets::{BrickSet, DeviceSet, PlacementResult};
pub use source::{ClusterDeviceSource, DeviceAndNode, DeviceSource};
