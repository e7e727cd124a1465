//! One read-write transaction per operation, and the connection release that
//! follows its completion.

use crate::connection::Connector;
use crate::engine::{Connection, Transaction, TransactionMode};
use crate::error::Result;
use crate::schema::DataStoreDescriptor;

/// Transaction type produced by a connector's connections.
pub type TransactionOf<C> = <<C as Connector>::Connection as Connection>::Transaction;

/// Object-store handle type produced by a connector's transactions.
pub type StoreOf<C> = <TransactionOf<C> as Transaction>::Store;

/// Connection, transaction and bound store handle owned by a single operation.
///
/// The connection is released exactly once: by [`Session::finish`] after the
/// transaction completes (commit or abort), or on drop if the session is abandoned
/// before that.
pub struct Session<'c, C: Connector> {
    connector: &'c C,
    connection: C::Connection,
    transaction: TransactionOf<C>,
    store: StoreOf<C>,
    released: bool,
}

/// Start a read-write transaction on the descriptor's object store.
///
/// If the transaction cannot be started the connection is released before the
/// error is returned.
pub fn acquire<'c, C: Connector>(
    connector: &'c C,
    connection: C::Connection,
    descriptor: &DataStoreDescriptor,
) -> Result<Session<'c, C>> {
    let started = connection
        .transaction(&descriptor.store_name, TransactionMode::ReadWrite)
        .and_then(|tx| {
            let store = tx.object_store(&descriptor.store_name)?;
            Ok((tx, store))
        });

    match started {
        Ok((transaction, store)) => Ok(Session {
            connector,
            connection,
            transaction,
            store,
            released: false,
        }),
        Err(err) => {
            connector.release(&connection);
            Err(err)
        }
    }
}

impl<'c, C: Connector> Session<'c, C> {
    pub fn store(&self) -> &StoreOf<C> {
        &self.store
    }

    pub fn connection(&self) -> &C::Connection {
        &self.connection
    }

    /// Wait for the transaction to complete, release the connection, and combine
    /// the operation's own result with the completion outcome. A request error
    /// takes precedence over the abort it caused.
    pub async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        let completion = self.transaction.done().await;
        self.release();
        if let Err(err) = &completion {
            tracing::debug!(error = %err, "transaction did not commit");
        }
        let value = result?;
        completion?;
        Ok(value)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.connector.release(&self.connection);
        }
    }
}

impl<C: Connector> Drop for Session<'_, C> {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!("session dropped before completion, releasing connection");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::engine::{MemoryBackend, ObjectStore};
    use crate::error::StoreError;
    use serde_json::json;

    fn descriptor() -> DataStoreDescriptor {
        let mut descriptor = DataStoreDescriptor::builder("objectStore")
            .key_path("id")
            .build();
        descriptor.name = "db".into();
        descriptor
    }

    #[tokio::test]
    async fn test_finish_releases_connection() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(backend.clone());
        let descriptor = descriptor();

        let connection = manager.connect(&descriptor).await.unwrap();
        let session = acquire(&manager, connection, &descriptor).unwrap();
        let key = session.store().add(&json!({"id": 1})).await;
        let key = session.finish(key).await.unwrap();

        assert_eq!(key, crate::key::Key::from(1));
        assert_eq!(backend.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_request_error_wins_over_abort() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(backend.clone());
        let descriptor = descriptor();

        let connection = manager.connect(&descriptor).await.unwrap();
        let session = acquire(&manager, connection, &descriptor).unwrap();
        session.store().add(&json!({"id": 1})).await.unwrap();
        let duplicate = session.store().add(&json!({"id": 1})).await;
        let result = session.finish(duplicate).await;

        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
        assert_eq!(backend.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(backend.clone());
        let descriptor = descriptor();

        let connection = manager.connect(&descriptor).await.unwrap();
        let session = acquire(&manager, connection, &descriptor).unwrap();
        assert_eq!(backend.open_connections(), 1);
        drop(session);
        assert_eq!(backend.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_missing_store_releases_connection() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(backend.clone());
        let descriptor = descriptor();
        manager.connect(&descriptor).await.unwrap().close();

        let mut other = descriptor.clone();
        other.store_name = "elsewhere".into();
        let connection = manager.connect(&descriptor).await.unwrap();
        let result = acquire(&manager, connection, &other);

        assert!(result.is_err());
        assert_eq!(backend.open_connections(), 0);
    }
}
