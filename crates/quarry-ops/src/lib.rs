// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Pending-operation state machine for quarry.
//!
//! Mutating requests run as multi-phase operations against the metadata
//! store and the remote [`executor::Executor`]:
//!
//! ```text
//!            ┌───────┐    ┌──────┐     ┌──────────┐
//!  request ─►│ build │ ─► │ exec │ ──► │ finalize │
//!            └───┬───┘    └──┬───┘     └──────────┘
//!                │           └ failure ► rollback
//!                ▼
//!       PendingOperation entry  ─ crash ─►  OperationCleaner
//! ```
//!
//! Build records intent and allocates metadata atomically; exec does the
//! remote work; finalize commits. A crash at any point leaves a pending
//! entry that [`cleaner::OperationCleaner`] rolls forward or back at the
//! next startup.

#![warn(missing_docs)]

pub mod brick_evict;
mod bricks;
pub mod cleaner;
pub mod device_remove;
pub mod executor;
pub mod health;
pub mod mock;
pub mod operation;
pub mod volume_ops;

pub use brick_evict::{BrickEvictOperation, HealCheck};
pub use cleaner::{CleanStats, OperationCleaner};
pub use device_remove::DeviceRemoveOperation;
pub use executor::{
    BrickHeal, Executor, GeoAction, GeoSession, GeoStatus, HealStatus, VolumeInfo, VolumeRequest,
};
pub use health::{NodeHealth, NodeHealthCache};
pub use mock::MockExecutor;
pub use operation::{run_operation, Operation};
pub use volume_ops::{VolumeCreateOperation, VolumeDeleteOperation, VolumeExpandOperation};
