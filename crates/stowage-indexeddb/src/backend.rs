//! Engine trait implementations over browser IndexedDB.

use std::cell::Cell;

use js_sys::Promise;
use stowage_core::engine::{
    Backend, Connection, Cursor, ObjectStore, Opened, Transaction, TransactionMode, UpgradePlan,
};
use stowage_core::{Direction, Key, KeyRange, Record, Result, StoreError};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{IdbCursorWithValue, IdbDatabase, IdbObjectStore, IdbRequest, IdbTransactionMode};

use crate::convert::{
    direction_to_js, key_from_js, key_range_to_js, key_to_js, record_from_js, record_to_js,
};
use crate::error::IndexedDbError;
use crate::idb;

/// Storage engine backed by the global `indexedDB` factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedDbBackend;

impl IndexedDbBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for IndexedDbBackend {
    type Connection = IndexedDbConnection;

    fn is_available(&self) -> bool {
        idb::idb_factory().is_ok()
    }

    async fn open(&self, name: &str, plan: &UpgradePlan) -> Result<Opened<IndexedDbConnection>> {
        let (db, upgrade) = idb::open_database(name, plan).await?;
        tracing::debug!(database = %name, version = plan.version, upgrade = ?upgrade, "indexedDB opened");
        let on_version_change = idb::close_on_version_change(&db, name);
        Ok(Opened {
            connection: IndexedDbConnection {
                db,
                name: name.to_string(),
                closed: Cell::new(false),
                _on_version_change: on_version_change,
            },
            upgrade,
        })
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        idb::delete_database(name).await?;
        Ok(())
    }
}

/// Open `IDBDatabase` handle. Closed on drop, and whenever another context
/// upgrades or deletes the database.
#[derive(Debug)]
pub struct IndexedDbConnection {
    db: IdbDatabase,
    name: String,
    closed: Cell<bool>,
    _on_version_change: idb::VersionChangeClosure,
}

impl IndexedDbConnection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &IdbDatabase {
        &self.db
    }
}

impl Connection for IndexedDbConnection {
    type Transaction = IndexedDbTransaction;

    fn transaction(&self, store_name: &str, mode: TransactionMode) -> Result<IndexedDbTransaction> {
        let mode = match mode {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        };
        let tx = idb::begin_transaction(&self.db, store_name, mode)?;
        let completion = idb::transaction_to_promise(&tx);
        Ok(IndexedDbTransaction { tx, completion })
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            self.db.set_onversionchange(None);
            self.db.close();
            tracing::debug!(database = %self.name, "indexedDB connection closed");
        }
    }
}

impl Drop for IndexedDbConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// `IDBTransaction` plus its completion promise.
#[derive(Debug)]
pub struct IndexedDbTransaction {
    tx: web_sys::IdbTransaction,
    completion: Promise,
}

impl Transaction for IndexedDbTransaction {
    type Store = IndexedDbObjectStore;

    fn object_store(&self, name: &str) -> Result<IndexedDbObjectStore> {
        let store = self
            .tx
            .object_store(name)
            .map_err(IndexedDbError::from_dom)?;
        Ok(IndexedDbObjectStore { store })
    }

    async fn done(&self) -> Result<()> {
        idb::await_transaction(&self.completion).await?;
        Ok(())
    }
}

/// Object store bound to an [`IndexedDbTransaction`].
#[derive(Debug, Clone)]
pub struct IndexedDbObjectStore {
    store: IdbObjectStore,
}

async fn run(request: std::result::Result<IdbRequest, JsValue>) -> Result<JsValue> {
    let request = request.map_err(IndexedDbError::from_dom)?;
    Ok(idb::await_request(&request).await?)
}

impl ObjectStore for IndexedDbObjectStore {
    type Cursor = IndexedDbCursor;

    async fn add(&self, record: &Record) -> Result<Key> {
        let value = record_to_js(record)?;
        match run(self.store.add(&value)).await {
            Ok(key) => Ok(key_from_js(&key)?),
            // Unique indexes share this error name; a key collision is the common case
            Err(StoreError::Constraint(msg)) => Err(StoreError::AlreadyExists(msg)),
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        run(self.store.delete(&key_to_js(key))).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        run(self.store.clear()).await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count = run(self.store.count()).await?;
        count
            .as_f64()
            .map(|n| n as u64)
            .ok_or_else(|| StoreError::Request("count did not return a number".into()))
    }

    async fn get_by_index(&self, index: &str, value: &Key) -> Result<Option<Record>> {
        let idx = self
            .store
            .index(index)
            .map_err(|_| StoreError::UnknownIndex(index.to_string()))?;
        let found = run(idx.get(&key_to_js(value))).await?;
        if found.is_undefined() {
            return Ok(None);
        }
        Ok(Some(record_from_js(found)?))
    }

    async fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
    ) -> Result<Option<IndexedDbCursor>> {
        let range = match range {
            Some(range) => JsValue::from(key_range_to_js(range)?),
            None => JsValue::NULL,
        };
        let request = self
            .store
            .open_cursor_with_range_and_direction(&range, direction_to_js(direction))
            .map_err(IndexedDbError::from_dom)?;
        let first = idb::await_request(&request).await?;
        IndexedDbCursor::at(request, first)
    }
}

/// `IDBCursorWithValue` with its current key and record decoded.
#[derive(Debug)]
pub struct IndexedDbCursor {
    request: IdbRequest,
    cursor: IdbCursorWithValue,
    key: Key,
    value: Record,
}

impl IndexedDbCursor {
    /// Decode a cursor request result; `null` means the range is exhausted.
    fn at(request: IdbRequest, result: JsValue) -> Result<Option<Self>> {
        if result.is_null() || result.is_undefined() {
            return Ok(None);
        }
        let cursor: IdbCursorWithValue = result
            .dyn_into()
            .map_err(|_| StoreError::Request("cursor result is not IDBCursorWithValue".into()))?;
        let key = cursor.primary_key().map_err(IndexedDbError::from_dom)?;
        let value = cursor.value().map_err(IndexedDbError::from_dom)?;
        Ok(Some(Self {
            request,
            key: key_from_js(&key)?,
            value: record_from_js(value)?,
            cursor,
        }))
    }
}

impl Cursor for IndexedDbCursor {
    fn primary_key(&self) -> &Key {
        &self.key
    }

    fn value(&self) -> &Record {
        &self.value
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let value = record_to_js(record)?;
        run(self.cursor.update(&value)).await?;
        Ok(())
    }

    async fn advance(self) -> Result<Option<IndexedDbCursor>> {
        self.cursor.continue_().map_err(IndexedDbError::from_dom)?;
        let next = idb::await_request(&self.request).await?;
        IndexedDbCursor::at(self.request, next)
    }
}
