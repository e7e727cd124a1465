//! Storage engine abstraction.
//!
//! These traits mirror the object model of an indexed, versioned object store:
//! a [`Backend`] opens versioned databases, a [`Connection`] starts transactions,
//! a [`Transaction`] hands out [`ObjectStore`] handles, and stores open
//! [`Cursor`]s. Implementations exist for:
//!
//! - **Memory**: in-process engine with the same semantics (`MemoryBackend`)
//! - **IndexedDB**: browser storage via web-sys (separate crate, WASM only)
//!
//! Every request is a future. The futures are not `Send`: engine handles are
//! single-threaded, as browser handles are.

// Futures are intentionally !Send; see module docs.
#![allow(async_fn_in_trait)]

pub mod memory;

use crate::error::Result;
use crate::key::{Direction, Key, KeyRange, Record};
use crate::schema::{DataStoreDescriptor, IndexSpec, KeyConfig};

pub use memory::{
    MemoryBackend, MemoryConnection, MemoryCursor, MemoryObjectStore, MemoryTransaction,
};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// What the upgrade step decided while a database was being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeAction {
    /// Fresh database: object store and indexes were created.
    Created,
    /// A different version was already stored. Nothing was touched; the caller
    /// must delete the database and open it again.
    Rebuild { old_version: u32 },
}

/// Schema mutations available inside an upgrade.
pub trait SchemaTarget {
    fn has_object_store(&self, name: &str) -> bool;

    fn create_object_store(&mut self, name: &str, key_config: &KeyConfig) -> Result<()>;

    fn create_index(&mut self, store_name: &str, index: &IndexSpec) -> Result<()>;
}

/// Owned upgrade instructions handed to [`Backend::open`]. Engines call
/// [`UpgradePlan::apply`] when the open needs a version change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    pub version: u32,
    pub store_name: String,
    pub key_config: KeyConfig,
    pub indexes: Vec<IndexSpec>,
}

impl UpgradePlan {
    pub fn new(descriptor: &DataStoreDescriptor) -> Self {
        Self {
            version: descriptor.version,
            store_name: descriptor.store_name.clone(),
            key_config: descriptor.key_config.clone(),
            indexes: descriptor.index_specs(),
        }
    }

    /// Decide what to do for a database currently at `old_version`.
    pub fn decide(&self, old_version: u32) -> UpgradeAction {
        if old_version > 0 && old_version != self.version {
            UpgradeAction::Rebuild { old_version }
        } else {
            UpgradeAction::Created
        }
    }

    /// Run the upgrade step against `target`.
    pub fn apply<T: SchemaTarget + ?Sized>(
        &self,
        old_version: u32,
        target: &mut T,
    ) -> Result<UpgradeAction> {
        let action = self.decide(old_version);
        if action != UpgradeAction::Created {
            return Ok(action);
        }

        if !target.has_object_store(&self.store_name) {
            target.create_object_store(&self.store_name, &self.key_config)?;
            for index in &self.indexes {
                target.create_index(&self.store_name, index)?;
            }
            tracing::info!(
                store = %self.store_name,
                version = self.version,
                indexes = self.indexes.len(),
                "created object store"
            );
        }
        Ok(action)
    }
}

/// Result of [`Backend::open`].
#[derive(Debug)]
pub struct Opened<C> {
    pub connection: C,
    /// `None` when the stored version already matched.
    pub upgrade: Option<UpgradeAction>,
}

/// Factory for versioned databases.
pub trait Backend {
    type Connection: Connection;

    /// Whether a storage-capable runtime is present.
    fn is_available(&self) -> bool;

    /// Open `name` at `version`, running `plan` if the stored version is older.
    async fn open(&self, name: &str, plan: &UpgradePlan) -> Result<Opened<Self::Connection>>;

    /// Delete the whole database. Deleting a missing database succeeds.
    async fn delete_database(&self, name: &str) -> Result<()>;
}

/// An open database handle.
pub trait Connection {
    type Transaction: Transaction;

    fn transaction(&self, store_name: &str, mode: TransactionMode) -> Result<Self::Transaction>;

    /// Close the connection. Calling it more than once has no further effect.
    fn close(&self);
}

/// A transaction scoped to one object store.
pub trait Transaction {
    type Store: ObjectStore;

    fn object_store(&self, name: &str) -> Result<Self::Store>;

    /// Resolve once the transaction commits; fail if it aborted.
    async fn done(&self) -> Result<()>;
}

/// An object-store handle bound to a transaction.
pub trait ObjectStore {
    type Cursor: Cursor;

    /// Insert a record; a colliding key fails with `AlreadyExists`.
    async fn add(&self, record: &Record) -> Result<Key>;

    async fn delete(&self, key: &Key) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    /// First record (by index key, then primary key) whose index key equals `value`.
    async fn get_by_index(&self, index: &str, value: &Key) -> Result<Option<Record>>;

    /// Open a cursor; `None` when no record is in range.
    async fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
    ) -> Result<Option<Self::Cursor>>;
}

/// Positioned cursor over an object store.
pub trait Cursor: Sized {
    fn primary_key(&self) -> &Key;

    fn value(&self) -> &Record;

    /// Replace the record under the cursor.
    async fn update(&self, record: &Record) -> Result<()>;

    /// Advance; `None` once the range is exhausted.
    async fn advance(self) -> Result<Option<Self>>;
}
