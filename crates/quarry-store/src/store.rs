// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! redb-backed entity store.
//!
//! Each entity kind lives in its own table keyed by the entity's UUID
//! bytes, with bincode-serialized values. Access goes through the
//! [`Store::view`] / [`Store::update`] closure API: an update closure
//! that returns an error aborts the whole transaction, so a multi-entity
//! change is either fully persisted or not at all.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use quarry_core::error::{Error, Result};
use quarry_core::{Brick, Cluster, Device, Node, PendingOperation, Volume};

/// Entity kinds persisted by the store, in table-initialization order.
const KINDS: [&str; 6] = ["clusters", "nodes", "devices", "bricks", "volumes", "pending_ops"];

/// A persistable entity with a stable kind name and UUID identity.
pub trait Entity: Serialize + DeserializeOwned {
    /// Table name for this entity kind.
    const KIND: &'static str;

    /// The entity's unique id, used as the table key.
    fn id(&self) -> Uuid;
}

impl Entity for Cluster {
    const KIND: &'static str = "clusters";
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Node {
    const KIND: &'static str = "nodes";
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Device {
    const KIND: &'static str = "devices";
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Brick {
    const KIND: &'static str = "bricks";
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Volume {
    const KIND: &'static str = "volumes";
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for PendingOperation {
    const KIND: &'static str = "pending_ops";
    fn id(&self) -> Uuid {
        self.id
    }
}

const fn table_for(kind: &'static str) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    TableDefinition::new(kind)
}

/// Convert any error with Display to our Error type.
fn db_err(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}

/// Read access shared by read and write transactions.
pub trait Reader {
    /// Loads an entity, or `None` if absent.
    fn try_get<E: Entity>(&self, id: Uuid) -> Result<Option<E>>;

    /// Loads all entities of a kind.
    fn list<E: Entity>(&self) -> Result<Vec<E>>;

    /// Loads an entity, failing with `NotFound` if absent.
    fn get<E: Entity>(&self, id: Uuid) -> Result<E> {
        self.try_get(id)?.ok_or_else(|| Error::not_found(E::KIND, id))
    }
}

/// A read-only transaction.
pub struct ReadTx {
    txn: ReadTransaction,
}

impl Reader for ReadTx {
    fn try_get<E: Entity>(&self, id: Uuid) -> Result<Option<E>> {
        let table = self.txn.open_table(table_for(E::KIND)).map_err(db_err)?;
        let Some(value) = table.get(id.as_bytes().as_slice()).map_err(db_err)? else {
            return Ok(None);
        };
        let entity = bincode::deserialize(value.value()).map_err(db_err)?;
        Ok(Some(entity))
    }

    fn list<E: Entity>(&self) -> Result<Vec<E>> {
        let table = self.txn.open_table(table_for(E::KIND)).map_err(db_err)?;
        let mut entities = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, value) = entry.map_err(db_err)?;
            entities.push(bincode::deserialize(value.value()).map_err(db_err)?);
        }
        Ok(entities)
    }
}

/// A read-write transaction. Writes become visible only after the
/// enclosing [`Store::update`] closure returns `Ok`.
pub struct WriteTx {
    txn: WriteTransaction,
}

impl Reader for WriteTx {
    fn try_get<E: Entity>(&self, id: Uuid) -> Result<Option<E>> {
        let table = self.txn.open_table(table_for(E::KIND)).map_err(db_err)?;
        let Some(value) = table.get(id.as_bytes().as_slice()).map_err(db_err)? else {
            return Ok(None);
        };
        let entity = bincode::deserialize(value.value()).map_err(db_err)?;
        Ok(Some(entity))
    }

    fn list<E: Entity>(&self) -> Result<Vec<E>> {
        let table = self.txn.open_table(table_for(E::KIND)).map_err(db_err)?;
        let mut entities = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, value) = entry.map_err(db_err)?;
            entities.push(bincode::deserialize(value.value()).map_err(db_err)?);
        }
        Ok(entities)
    }
}

impl WriteTx {
    /// Inserts or replaces an entity.
    pub fn put<E: Entity>(&self, entity: &E) -> Result<()> {
        let serialized = bincode::serialize(entity).map_err(db_err)?;
        let mut table = self.txn.open_table(table_for(E::KIND)).map_err(db_err)?;
        table
            .insert(entity.id().as_bytes().as_slice(), serialized.as_slice())
            .map_err(db_err)?;
        Ok(())
    }

    /// Deletes an entity, failing with `NotFound` if absent.
    pub fn delete<E: Entity>(&self, id: Uuid) -> Result<()> {
        let mut table = self.txn.open_table(table_for(E::KIND)).map_err(db_err)?;
        let removed = table.remove(id.as_bytes().as_slice()).map_err(db_err)?;
        if removed.is_none() {
            return Err(Error::not_found(E::KIND, id));
        }
        Ok(())
    }
}

/// The embedded metadata store.
pub struct Store {
    db: Database,
    read_only: bool,
}

impl Store {
    /// Opens (creating if needed) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        debug!(?path, "opening metadata store");
        let db = Database::create(path).map_err(db_err)?;
        Self::init_tables(&db)?;
        Ok(Self { db, read_only: false })
    }

    /// Opens an existing store without allowing writes. `update` calls
    /// fail with [`Error::ReadOnlyStore`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        debug!(?path, "opening metadata store read-only");
        let db = Database::open(path).map_err(db_err)?;
        Ok(Self { db, read_only: true })
    }

    /// Opens an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(db_err)?;
        Self::init_tables(&db)?;
        Ok(Self { db, read_only: false })
    }

    // Tables must exist before the first read transaction opens them.
    fn init_tables(db: &Database) -> Result<()> {
        let txn = db.begin_write().map_err(db_err)?;
        for kind in KINDS {
            let _ = txn.open_table(table_for(kind)).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }

    /// Runs a read-only closure against a consistent snapshot.
    pub fn view<T>(&self, f: impl FnOnce(&ReadTx) -> Result<T>) -> Result<T> {
        let tx = ReadTx { txn: self.db.begin_read().map_err(db_err)? };
        f(&tx)
    }

    /// Runs a read-write closure in one transaction. The transaction
    /// commits only when the closure returns `Ok`; any error aborts it.
    pub fn update<T>(&self, f: impl FnOnce(&WriteTx) -> Result<T>) -> Result<T> {
        if self.read_only {
            return Err(Error::ReadOnlyStore);
        }
        let tx = WriteTx { txn: self.db.begin_write().map_err(db_err)? };
        match f(&tx) {
            Ok(value) => {
                tx.txn.commit().map_err(db_err)?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.txn.abort();
                Err(e)
            }
        }
    }
}
