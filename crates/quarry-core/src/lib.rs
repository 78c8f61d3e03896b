// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Core entity model and error types for the quarry cluster orchestrator.
//!
//! Quarry manages clusters of storage nodes, the block devices attached
//! to them, and the replicated volumes carved out of those devices. This
//! crate defines the persisted entities and shared primitives every
//! other quarry crate builds on:
//!
//! ```text
//! Cluster ──► Node ──► Device ──► Brick ◄── Volume
//!                        │                    │
//!                        └── Storage counters └── Durability / sets
//! ```
//!
//! Higher layers:
//! - `quarry-store` persists these entities in an embedded store
//! - `quarry-placement` picks devices for new bricks
//! - `quarry-ops` drives multi-step operations against remote nodes

#![warn(missing_docs)]

pub mod error;
pub mod pending;
pub mod tags;
pub mod types;

pub use error::{Error, Result};
pub use pending::{OpStatus, OpType, PendingAction, PendingChange, PendingOperation};
pub use tags::{merge_tags, ArbiterTag};
pub use types::{
    Brick, Cluster, Device, Durability, EntryState, Node, SizeGenerator, Storage, Tags, Volume,
};
