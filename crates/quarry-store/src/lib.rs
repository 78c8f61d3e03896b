// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Embedded transactional metadata store for quarry.
//!
//! All cluster topology and operation state lives in a single redb
//! database. The store exposes typed access per entity kind and a
//! closure-based transaction API so callers can group multi-entity
//! changes atomically.

#![warn(missing_docs)]

mod store;

pub use store::{Entity, ReadTx, Reader, Store, WriteTx};
