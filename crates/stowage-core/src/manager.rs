//! The operation surface callers use.
//!
//! Every operation resolves its descriptor, checks its parameters, then opens a
//! connection and runs inside one read-write transaction. Failures are returned
//! and also reported once to the message sink.

use serde_json::Value;

use crate::connection::{ConnectionManager, Connector};
use crate::engine::Backend;
use crate::error::Result;
use crate::key::{Direction, Key, Record};
use crate::messages::{MessageSink, Notice, Operation};
use crate::mutate;
use crate::query::{self, RangeQuery, SubstringSearch};
use crate::schema::{DataStoreDescriptor, SchemaRegistry};
use crate::transaction::{self, Session};

/// Facade over a [`SchemaRegistry`], a [`Connector`] and a [`MessageSink`].
#[derive(Debug)]
pub struct StoreManager<C, S> {
    connector: C,
    registry: SchemaRegistry,
    sink: S,
}

impl<B: Backend, S: MessageSink> StoreManager<ConnectionManager<B>, S> {
    /// Manager that opens a fresh connection on `backend` for every operation.
    pub fn with_backend(backend: B, registry: SchemaRegistry, sink: S) -> Self {
        Self::new(ConnectionManager::new(backend), registry, sink)
    }
}

impl<C: Connector, S: MessageSink> StoreManager<C, S> {
    pub fn new(connector: C, registry: SchemaRegistry, sink: S) -> Self {
        Self {
            connector,
            registry,
            sink,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Whether `name` has a usable descriptor. A miss is reported to the sink.
    pub fn validate(&self, name: &str) -> bool {
        match self.registry.descriptor(name) {
            Ok(_) => true,
            Err(err) => {
                self.report::<()>(Operation::Initialize, name, Err(err)).ok();
                false
            }
        }
    }

    /// Open the database for `name`, creating or rebuilding its schema.
    ///
    /// The caller owns the returned connection; dropping it closes it.
    pub async fn initialize(&self, name: &str) -> Result<C::Connection> {
        let result = self.initialize_inner(name).await;
        self.report(Operation::Initialize, name, result)
    }

    async fn initialize_inner(&self, name: &str) -> Result<C::Connection> {
        let descriptor = self.registry.descriptor(name)?;
        self.connector.connect(descriptor).await
    }

    /// Delete the physical database behind `name`.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        let result = self.destroy_inner(name).await;
        self.report(Operation::Destroy, name, result)
    }

    async fn destroy_inner(&self, name: &str) -> Result<()> {
        let descriptor = self.registry.descriptor(name)?;
        self.connector.destroy(&descriptor.name).await
    }

    /// Add `record`; returns its primary key.
    pub async fn insert(&self, name: &str, record: &Record) -> Result<Key> {
        let result = self.insert_inner(name, record).await;
        self.report(Operation::Insert, name, result)
    }

    async fn insert_inner(&self, name: &str, record: &Record) -> Result<Key> {
        let descriptor = self.registry.descriptor(name)?;
        mutate::ensure_object(record)?;
        let session = self.begin(descriptor).await?;
        let result = mutate::insert(session.store(), record).await;
        session.finish(result).await
    }

    pub async fn delete_by_key(&self, name: &str, key: &Value) -> Result<()> {
        let result = self.delete_by_key_inner(name, key).await;
        self.report(Operation::DeleteByKey, name, result)
    }

    async fn delete_by_key_inner(&self, name: &str, key: &Value) -> Result<()> {
        let descriptor = self.registry.descriptor(name)?;
        let key = Key::try_from_value(key)?;
        let session = self.begin(descriptor).await?;
        let result = mutate::delete_by_key(session.store(), &key).await;
        session.finish(result).await
    }

    /// Remove every record from the store.
    pub async fn clear(&self, name: &str) -> Result<()> {
        let result = self.clear_inner(name).await;
        self.report(Operation::Clear, name, result)
    }

    async fn clear_inner(&self, name: &str) -> Result<()> {
        let descriptor = self.registry.descriptor(name)?;
        let session = self.begin(descriptor).await?;
        let result = mutate::clear(session.store()).await;
        session.finish(result).await
    }

    /// Replace the first record equal to `old` with `new`.
    ///
    /// `Ok(None)` when nothing matched; that outcome is not reported.
    pub async fn update_by_match(
        &self,
        name: &str,
        old: &Record,
        new: &Record,
    ) -> Result<Option<Key>> {
        let result = self.update_by_match_inner(name, old, new).await;
        self.report(Operation::Update, name, result)
    }

    async fn update_by_match_inner(
        &self,
        name: &str,
        old: &Record,
        new: &Record,
    ) -> Result<Option<Key>> {
        let descriptor = self.registry.descriptor(name)?;
        mutate::ensure_object(old)?;
        mutate::ensure_object(new)?;
        let session = self.begin(descriptor).await?;
        let result = mutate::update_by_match(session.store(), old, new).await;
        session.finish(result).await
    }

    /// Replace the record whose primary key is carried by `new`.
    pub async fn update_by_key(&self, name: &str, new: &Record) -> Result<Key> {
        let result = self.update_by_key_inner(name, new).await;
        self.report(Operation::Update, name, result)
    }

    async fn update_by_key_inner(&self, name: &str, new: &Record) -> Result<Key> {
        let descriptor = self.registry.descriptor(name)?;
        mutate::ensure_object(new)?;
        let session = self.begin(descriptor).await?;
        let key_path = descriptor.key_config.key_path();
        let result = mutate::update_by_key(session.store(), key_path, new).await;
        session.finish(result).await
    }

    /// Every record, in `direction` order.
    pub async fn scan_all(&self, name: &str, direction: Direction) -> Result<Vec<Record>> {
        let result = self.scan_all_inner(name, direction).await;
        self.report(Operation::Query, name, result)
    }

    async fn scan_all_inner(&self, name: &str, direction: Direction) -> Result<Vec<Record>> {
        let descriptor = self.registry.descriptor(name)?;
        let session = self.begin(descriptor).await?;
        let result = query::scan_all(session.store(), direction).await;
        session.finish(result).await
    }

    /// Records whose primary key falls inside `range`, ascending.
    pub async fn scan_range(&self, name: &str, range: &RangeQuery) -> Result<Vec<Record>> {
        let result = self.scan_range_inner(name, range).await;
        self.report(Operation::Query, name, result)
    }

    async fn scan_range_inner(&self, name: &str, range: &RangeQuery) -> Result<Vec<Record>> {
        let descriptor = self.registry.descriptor(name)?;
        let range = range.key_range()?;
        let session = self.begin(descriptor).await?;
        let result = query::scan_range(session.store(), &range).await;
        session.finish(result).await
    }

    /// Records whose top-level `field` contains `keyword` (case-sensitive).
    pub async fn search_substring(
        &self,
        name: &str,
        field: &str,
        keyword: &str,
    ) -> Result<Vec<Record>> {
        let result = self.search_substring_inner(name, field, keyword).await;
        self.report(Operation::Query, name, result)
    }

    async fn search_substring_inner(
        &self,
        name: &str,
        field: &str,
        keyword: &str,
    ) -> Result<Vec<Record>> {
        let descriptor = self.registry.descriptor(name)?;
        let search = SubstringSearch::new(field, keyword)?;
        let session = self.begin(descriptor).await?;
        let result = query::search(session.store(), &search).await;
        session.finish(result).await
    }

    pub async fn lookup_by_index(
        &self,
        name: &str,
        index: &str,
        value: &Value,
    ) -> Result<Option<Record>> {
        let result = self.lookup_by_index_inner(name, index, value).await;
        self.report(Operation::Query, name, result)
    }

    async fn lookup_by_index_inner(
        &self,
        name: &str,
        index: &str,
        value: &Value,
    ) -> Result<Option<Record>> {
        let descriptor = self.registry.descriptor(name)?;
        let value = Key::try_from_value(value)?;
        let session = self.begin(descriptor).await?;
        let result = query::lookup_by_index(session.store(), index, &value).await;
        session.finish(result).await
    }

    pub async fn lookup_by_key(&self, name: &str, key: &Value) -> Result<Option<Record>> {
        let result = self.lookup_by_key_inner(name, key).await;
        self.report(Operation::Query, name, result)
    }

    async fn lookup_by_key_inner(&self, name: &str, key: &Value) -> Result<Option<Record>> {
        let descriptor = self.registry.descriptor(name)?;
        let key = Key::try_from_value(key)?;
        let session = self.begin(descriptor).await?;
        let result = query::lookup_by_key(session.store(), &key).await;
        session.finish(result).await
    }

    /// Record with the lowest primary key.
    pub async fn first(&self, name: &str) -> Result<Option<Record>> {
        let result = self.first_visited(name, Direction::Next).await;
        self.report(Operation::Query, name, result)
    }

    /// Record with the highest primary key.
    pub async fn last(&self, name: &str) -> Result<Option<Record>> {
        let result = self.first_visited(name, Direction::Prev).await;
        self.report(Operation::Query, name, result)
    }

    async fn first_visited(&self, name: &str, direction: Direction) -> Result<Option<Record>> {
        let descriptor = self.registry.descriptor(name)?;
        let session = self.begin(descriptor).await?;
        let result = query::first_visited(session.store(), direction).await;
        session.finish(result).await
    }

    pub async fn count(&self, name: &str) -> Result<u64> {
        let result = self.count_inner(name).await;
        self.report(Operation::Count, name, result)
    }

    async fn count_inner(&self, name: &str) -> Result<u64> {
        let descriptor = self.registry.descriptor(name)?;
        let session = self.begin(descriptor).await?;
        let result = mutate::count(session.store()).await;
        session.finish(result).await
    }

    async fn begin(&self, descriptor: &DataStoreDescriptor) -> Result<Session<'_, C>> {
        let connection = self.connector.connect(descriptor).await?;
        tracing::debug!(database = %descriptor.name, store = %descriptor.store_name, "connected");
        transaction::acquire(&self.connector, connection, descriptor)
    }

    fn report<T>(&self, operation: Operation, name: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let notice = Notice::for_failure(operation, err);
            tracing::warn!(
                store = %name,
                operation = ?operation,
                notice = ?notice,
                error = %err,
                "operation failed"
            );
            self.sink.notify(notice.text());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryBackend;
    use crate::error::StoreError;
    use crate::messages::CollectingSink;
    use serde_json::json;

    fn manager() -> StoreManager<ConnectionManager<MemoryBackend>, CollectingSink> {
        let registry = SchemaRegistry::new().with_store(
            "notes",
            DataStoreDescriptor::builder("objectStore")
                .key_path("id")
                .build(),
        );
        StoreManager::with_backend(MemoryBackend::new(), registry, CollectingSink::new())
    }

    #[test]
    fn test_validate_reports_unknown_store() {
        let manager = manager();
        assert!(manager.validate("notes"));
        assert!(manager.sink().is_empty());

        assert!(!manager.validate("missing"));
        assert_eq!(
            manager.sink().messages(),
            vec![Notice::BadConfiguration.text().to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_store_touches_nothing() {
        let manager = manager();
        let result = manager.count("missing").await;
        assert!(matches!(result, Err(StoreError::BadConfiguration { .. })));
        assert_eq!(manager.connector().backend().open_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_key_reports_operation_notice() {
        let manager = manager();
        let result = manager.delete_by_key("notes", &json!(true)).await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
        assert_eq!(
            manager.sink().messages(),
            vec![Notice::DeleteUnsuccessful.text().to_string()]
        );
        assert_eq!(manager.connector().backend().open_count(), 0);
    }

    #[tokio::test]
    async fn test_first_and_last() {
        let manager = manager();
        assert_eq!(manager.first("notes").await.unwrap(), None);
        for id in [3, 1, 2] {
            manager.insert("notes", &json!({"id": id})).await.unwrap();
        }
        assert_eq!(manager.first("notes").await.unwrap(), Some(json!({"id": 1})));
        assert_eq!(manager.last("notes").await.unwrap(), Some(json!({"id": 3})));
        assert_eq!(manager.connector().backend().open_connections(), 0);
    }
}
