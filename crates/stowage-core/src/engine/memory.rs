//! In-memory storage engine
//!
//! A single-threaded engine with object-store semantics: versioned databases,
//! ordered keys, key generators, unique indexes, cursors in every direction, and
//! transactions that roll back when a request fails. Used natively and in tests.
//! Nothing is persisted beyond the lifetime of the [`MemoryBackend`] value (and its
//! clones, which share state).

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use crate::engine::{
    Backend, Connection, Cursor, ObjectStore, Opened, SchemaTarget, Transaction,
    TransactionMode, UpgradePlan,
};
use crate::error::{Result, StoreError};
use crate::key::{evaluate_key_path, extract_key, inject_key, Direction, Key, KeyRange, Record};
use crate::schema::{IndexSpec, KeyConfig};

type SharedState = Rc<RefCell<EngineState>>;

/// In-memory engine. Clones share the same databases.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: SharedState,
}

#[derive(Debug)]
struct EngineState {
    available: bool,
    databases: BTreeMap<String, Database>,
    next_database_id: u64,
    fail_next_open: Option<String>,
    opens: usize,
    open_connections: usize,
}

#[derive(Debug, Clone)]
struct Database {
    id: u64,
    version: u32,
    stores: BTreeMap<String, StoreData>,
}

#[derive(Debug, Clone)]
struct StoreData {
    key_config: KeyConfig,
    next_key: u64,
    indexes: Vec<IndexSpec>,
    records: BTreeMap<Key, Record>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(EngineState {
                available: true,
                databases: BTreeMap::new(),
                next_database_id: 1,
                fail_next_open: None,
                opens: 0,
                open_connections: 0,
            })),
        }
    }

    /// An engine that reports itself as unavailable.
    pub fn unavailable() -> Self {
        let backend = Self::new();
        backend.set_available(false);
        backend
    }

    pub fn set_available(&self, available: bool) {
        self.state.borrow_mut().available = available;
    }

    /// Make the next `open` fail with `reason`.
    pub fn fail_next_open(&self, reason: &str) {
        self.state.borrow_mut().fail_next_open = Some(reason.to_string());
    }

    /// Number of `open` requests issued so far.
    pub fn open_count(&self) -> usize {
        self.state.borrow().opens
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state.borrow().open_connections
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.state.borrow().databases.contains_key(name)
    }

    pub fn database_version(&self, name: &str) -> Option<u32> {
        self.state.borrow().databases.get(name).map(|db| db.version)
    }

    pub fn object_store_names(&self, name: &str) -> Vec<String> {
        self.state
            .borrow()
            .databases
            .get(name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn index_names(&self, name: &str, store_name: &str) -> Vec<String> {
        self.state
            .borrow()
            .databases
            .get(name)
            .and_then(|db| db.stores.get(store_name))
            .map(|store| store.indexes.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default()
    }
}

impl Backend for MemoryBackend {
    type Connection = MemoryConnection;

    fn is_available(&self) -> bool {
        self.state.borrow().available
    }

    async fn open(&self, name: &str, plan: &UpgradePlan) -> Result<Opened<MemoryConnection>> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if !state.available {
            return Err(StoreError::EnvironmentUnsupported(
                "memory engine disabled".into(),
            ));
        }
        state.opens += 1;
        if let Some(reason) = state.fail_next_open.take() {
            return Err(StoreError::Backend(reason));
        }

        let old_version = state.databases.get(name).map(|db| db.version).unwrap_or(0);
        if plan.version < old_version {
            return Err(StoreError::Version(format!(
                "requested version {} is lower than stored version {}",
                plan.version, old_version
            )));
        }

        let upgrade = if plan.version > old_version {
            let previous = state.databases.get(name).cloned();
            if previous.is_none() {
                let id = state.next_database_id;
                state.next_database_id += 1;
                state.databases.insert(
                    name.to_string(),
                    Database {
                        id,
                        version: 0,
                        stores: BTreeMap::new(),
                    },
                );
            }
            let db = state
                .databases
                .get_mut(name)
                .ok_or_else(|| StoreError::Backend("database vanished during upgrade".into()))?;

            let applied = plan.apply(old_version, &mut MemorySchema { db: &mut *db });
            match applied {
                Ok(action) => {
                    db.version = plan.version;
                    Some(action)
                }
                Err(err) => {
                    // Aborted version change: restore what was there before.
                    match previous {
                        Some(previous) => *db = previous,
                        None => {
                            state.databases.remove(name);
                        }
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        let db_id = state
            .databases
            .get(name)
            .map(|db| db.id)
            .ok_or_else(|| StoreError::Backend(format!("database '{}' missing", name)))?;
        state.open_connections += 1;
        tracing::debug!(database = %name, version = plan.version, "memory engine opened database");

        Ok(Opened {
            connection: MemoryConnection {
                state: self.state.clone(),
                name: name.to_string(),
                db_id,
                closed: Cell::new(false),
            },
            upgrade,
        })
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.available {
            return Err(StoreError::EnvironmentUnsupported(
                "memory engine disabled".into(),
            ));
        }
        if state.databases.remove(name).is_some() {
            tracing::debug!(database = %name, "memory engine deleted database");
        }
        Ok(())
    }
}

struct MemorySchema<'a> {
    db: &'a mut Database,
}

impl SchemaTarget for MemorySchema<'_> {
    fn has_object_store(&self, name: &str) -> bool {
        self.db.stores.contains_key(name)
    }

    fn create_object_store(&mut self, name: &str, key_config: &KeyConfig) -> Result<()> {
        if self.db.stores.contains_key(name) {
            return Err(StoreError::Constraint(format!(
                "object store '{}' already exists",
                name
            )));
        }
        self.db.stores.insert(
            name.to_string(),
            StoreData {
                key_config: key_config.clone(),
                next_key: 1,
                indexes: Vec::new(),
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn create_index(&mut self, store_name: &str, index: &IndexSpec) -> Result<()> {
        let store = self
            .db
            .stores
            .get_mut(store_name)
            .ok_or_else(|| StoreError::NotFound(format!("object store '{}'", store_name)))?;
        if store.indexes.iter().any(|i| i.name == index.name) {
            return Err(StoreError::Constraint(format!(
                "index '{}' already exists",
                index.name
            )));
        }
        store.indexes.push(index.clone());
        Ok(())
    }
}

impl EngineState {
    fn store_mut(&mut self, name: &str, db_id: u64, store_name: &str) -> Result<&mut StoreData> {
        let db = self
            .databases
            .get_mut(name)
            .filter(|db| db.id == db_id)
            .ok_or_else(|| StoreError::Transaction(format!("database '{}' was deleted", name)))?;
        db.stores
            .get_mut(store_name)
            .ok_or_else(|| StoreError::NotFound(format!("object store '{}'", store_name)))
    }
}

impl StoreData {
    /// Insert `record`, generating its key if needed.
    fn add(&mut self, record: &Record) -> Result<Key> {
        let mut record = record.clone();
        let key = match self.key_config.key_path().map(str::to_string) {
            Some(path) => match evaluate_key_path(&record, &path) {
                Some(value) => Key::try_from_value(value)?,
                None if self.key_config.auto_increment => {
                    let key = Key::Number(self.next_key as f64);
                    inject_key(&mut record, &path, &key)?;
                    key
                }
                None => {
                    return Err(StoreError::InvalidKey(format!(
                        "record has no key at '{}'",
                        path
                    )))
                }
            },
            None if self.key_config.auto_increment => Key::Number(self.next_key as f64),
            None => {
                return Err(StoreError::InvalidKey(
                    "store has out-of-line keys and no key generator".into(),
                ))
            }
        };

        if self.records.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        self.check_unique(&key, &record)?;

        if self.key_config.auto_increment {
            if let Key::Number(n) = key {
                if n >= self.next_key as f64 {
                    self.next_key = n.floor() as u64 + 1;
                }
            }
        }
        self.records.insert(key.clone(), record);
        Ok(key)
    }

    fn check_unique(&self, key: &Key, record: &Record) -> Result<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let Some(index_key) = extract_key(record, &index.key_path) else {
                continue;
            };
            let taken = self.records.iter().any(|(other_key, other)| {
                other_key != key && extract_key(other, &index.key_path).as_ref() == Some(&index_key)
            });
            if taken {
                return Err(StoreError::Constraint(format!(
                    "unique index '{}' already contains {}",
                    index.name, index_key
                )));
            }
        }
        Ok(())
    }

    /// Next record after `from` (exclusive) in `direction`, within `range`.
    fn seek(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        from: Option<&Key>,
    ) -> Option<(Key, Record)> {
        let mut lower = match range.and_then(|r| r.lower.as_ref()) {
            Some(b) if b.open => Bound::Excluded(&b.key),
            Some(b) => Bound::Included(&b.key),
            None => Bound::Unbounded,
        };
        let mut upper = match range.and_then(|r| r.upper.as_ref()) {
            Some(b) if b.open => Bound::Excluded(&b.key),
            Some(b) => Bound::Included(&b.key),
            None => Bound::Unbounded,
        };
        if let Some(from) = from {
            if direction.is_reverse() {
                upper = Bound::Excluded(from);
            } else {
                lower = Bound::Excluded(from);
            }
        }
        if !bounds_ordered(&lower, &upper) {
            return None;
        }

        let mut entries = self.records.range::<Key, _>((lower, upper));
        let entry = if direction.is_reverse() {
            entries.next_back()
        } else {
            entries.next()
        };
        entry.map(|(k, v)| (k.clone(), v.clone()))
    }
}

/// `BTreeMap::range` panics on inverted bounds; treat them as empty instead.
fn bounds_ordered(lower: &Bound<&Key>, upper: &Bound<&Key>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Included(l), Bound::Included(u))
        | (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u)) => l <= u,
        (Bound::Excluded(l), Bound::Excluded(u)) => l < u,
    }
}

/// Connection to one memory database.
#[derive(Debug)]
pub struct MemoryConnection {
    state: SharedState,
    name: String,
    db_id: u64,
    closed: Cell<bool>,
}

impl MemoryConnection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Connection for MemoryConnection {
    type Transaction = MemoryTransaction;

    fn transaction(&self, store_name: &str, mode: TransactionMode) -> Result<MemoryTransaction> {
        if self.closed.get() {
            return Err(StoreError::Transaction("connection is closed".into()));
        }
        self.state
            .borrow_mut()
            .store_mut(&self.name, self.db_id, store_name)?;

        Ok(MemoryTransaction {
            scope: Rc::new(TransactionScope {
                state: self.state.clone(),
                name: self.name.clone(),
                db_id: self.db_id,
                store_name: store_name.to_string(),
                mode,
                status: RefCell::new(TransactionStatus::default()),
            }),
        })
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            let mut state = self.state.borrow_mut();
            state.open_connections = state.open_connections.saturating_sub(1);
            tracing::debug!(database = %self.name, "memory engine closed connection");
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default)]
struct TransactionStatus {
    /// Store contents before the first write, restored on abort.
    snapshot: Option<StoreData>,
    aborted: Option<String>,
    committed: bool,
}

#[derive(Debug)]
struct TransactionScope {
    state: SharedState,
    name: String,
    db_id: u64,
    store_name: String,
    mode: TransactionMode,
    status: RefCell<TransactionStatus>,
}

impl TransactionScope {
    /// Run one request. Failures from the engine (collisions, constraint
    /// violations) abort the transaction and roll back its writes; argument
    /// errors (invalid keys) fail only the request.
    fn request<T>(&self, write: bool, op: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut status = self.status.borrow_mut();
        if let Some(reason) = &status.aborted {
            return Err(StoreError::Transaction(format!(
                "transaction is no longer active: {}",
                reason
            )));
        }
        if status.committed {
            return Err(StoreError::Transaction("transaction has finished".into()));
        }
        if write && self.mode == TransactionMode::ReadOnly {
            return Err(StoreError::Transaction(
                "write request in a read-only transaction".into(),
            ));
        }

        let mut state = self.state.borrow_mut();
        let store = state.store_mut(&self.name, self.db_id, &self.store_name)?;
        if write && status.snapshot.is_none() {
            status.snapshot = Some(store.clone());
        }

        match op(store) {
            Ok(value) => Ok(value),
            Err(err) => {
                if matches!(err, StoreError::AlreadyExists(_) | StoreError::Constraint(_)) {
                    if let Some(snapshot) = status.snapshot.take() {
                        *store = snapshot;
                    }
                    status.aborted = Some(err.to_string());
                }
                Err(err)
            }
        }
    }
}

/// Transaction over a single memory object store.
#[derive(Debug)]
pub struct MemoryTransaction {
    scope: Rc<TransactionScope>,
}

impl Transaction for MemoryTransaction {
    type Store = MemoryObjectStore;

    fn object_store(&self, name: &str) -> Result<MemoryObjectStore> {
        if name != self.scope.store_name {
            return Err(StoreError::NotFound(format!(
                "object store '{}' is not in the transaction scope",
                name
            )));
        }
        Ok(MemoryObjectStore {
            scope: self.scope.clone(),
        })
    }

    async fn done(&self) -> Result<()> {
        let mut status = self.scope.status.borrow_mut();
        if let Some(reason) = &status.aborted {
            return Err(StoreError::Transaction(format!("aborted: {}", reason)));
        }
        status.committed = true;
        status.snapshot = None;
        Ok(())
    }
}

/// Object-store handle bound to a [`MemoryTransaction`].
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    scope: Rc<TransactionScope>,
}

impl ObjectStore for MemoryObjectStore {
    type Cursor = MemoryCursor;

    async fn add(&self, record: &Record) -> Result<Key> {
        self.scope.request(true, |store| store.add(record))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.scope.request(true, |store| {
            store.records.remove(key);
            Ok(())
        })
    }

    async fn clear(&self) -> Result<()> {
        self.scope.request(true, |store| {
            store.records.clear();
            Ok(())
        })
    }

    async fn count(&self) -> Result<u64> {
        self.scope
            .request(false, |store| Ok(store.records.len() as u64))
    }

    async fn get_by_index(&self, index: &str, value: &Key) -> Result<Option<Record>> {
        self.scope.request(false, |store| {
            let spec = store
                .indexes
                .iter()
                .find(|i| i.name == index)
                .ok_or_else(|| StoreError::UnknownIndex(index.to_string()))?;
            Ok(store
                .records
                .values()
                .find(|record| extract_key(record, &spec.key_path).as_ref() == Some(value))
                .cloned())
        })
    }

    async fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
    ) -> Result<Option<MemoryCursor>> {
        let found = self
            .scope
            .request(false, |store| Ok(store.seek(range, direction, None)))?;
        Ok(found.map(|(key, value)| MemoryCursor {
            store: self.clone(),
            range: range.cloned(),
            direction,
            key,
            value,
        }))
    }
}

/// Cursor over a [`MemoryObjectStore`]. Primary keys are unique, so the `*Unique`
/// directions traverse exactly like their plain counterparts.
#[derive(Debug)]
pub struct MemoryCursor {
    store: MemoryObjectStore,
    range: Option<KeyRange>,
    direction: Direction,
    key: Key,
    value: Record,
}

impl Cursor for MemoryCursor {
    fn primary_key(&self) -> &Key {
        &self.key
    }

    fn value(&self) -> &Record {
        &self.value
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let key = self.key.clone();
        self.store.scope.request(true, |store| {
            if !store.records.contains_key(&key) {
                return Err(StoreError::NotFound(key.to_string()));
            }
            if let Some(path) = store.key_config.key_path() {
                if extract_key(record, path).as_ref() != Some(&key) {
                    return Err(StoreError::InvalidKey(format!(
                        "updated record must keep key {} at '{}'",
                        key, path
                    )));
                }
            }
            store.check_unique(&key, record)?;
            store.records.insert(key.clone(), record.clone());
            Ok(())
        })
    }

    async fn advance(self) -> Result<Option<MemoryCursor>> {
        let found = self.store.scope.request(false, |store| {
            Ok(store.seek(self.range.as_ref(), self.direction, Some(&self.key)))
        })?;
        Ok(found.map(|(key, value)| MemoryCursor {
            key,
            value,
            ..self
        }))
    }
}
