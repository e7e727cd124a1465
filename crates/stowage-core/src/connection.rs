//! Connection lifecycle: versioned open, first-time schema creation and the
//! destructive rebuild on version change.

// Futures are !Send, like the engine handles they wrap.
#![allow(async_fn_in_trait)]

use crate::engine::{Backend, Connection, Opened, UpgradeAction, UpgradePlan};
use crate::error::{Result, StoreError};
use crate::schema::DataStoreDescriptor;

/// Source of connections for store operations.
///
/// [`ConnectionManager`] opens a fresh connection per operation and closes it on
/// release. A pooled implementation can stand in without changing call sites.
pub trait Connector {
    type Connection: Connection;

    async fn connect(&self, descriptor: &DataStoreDescriptor) -> Result<Self::Connection>;

    /// Give back a connection whose transaction has finished.
    fn release(&self, connection: &Self::Connection);

    /// Delete the physical database behind `name`.
    async fn destroy(&self, name: &str) -> Result<()>;
}

/// Per-operation connection policy over a [`Backend`].
#[derive(Debug, Clone)]
pub struct ConnectionManager<B> {
    backend: B,
}

impl<B: Backend> ConnectionManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Open the database behind `descriptor`.
    ///
    /// An open failure deletes the database and returns `DbInit`. A stored
    /// version that differs from the declared one is rebuilt in two phases: the
    /// upgrade step only detects it, then the connection is closed, the database
    /// deleted and opened again so the declared schema is created from scratch.
    /// All records stored under the old version are lost.
    pub async fn open(&self, descriptor: &DataStoreDescriptor) -> Result<B::Connection> {
        if !self.backend.is_available() {
            return Err(StoreError::EnvironmentUnsupported(
                "no storage engine in this environment".into(),
            ));
        }

        let plan = UpgradePlan::new(descriptor);
        let opened = self.open_or_reset(&descriptor.name, &plan).await?;

        match opened.upgrade {
            Some(UpgradeAction::Rebuild { old_version }) => {
                tracing::info!(
                    database = %descriptor.name,
                    old_version,
                    new_version = descriptor.version,
                    "version changed, rebuilding database"
                );
                opened.connection.close();
                self.backend
                    .delete_database(&descriptor.name)
                    .await
                    .map_err(|e| StoreError::DbInit(format!("rebuild: {}", e)))?;

                let reopened = self.open_or_reset(&descriptor.name, &plan).await?;
                if let Some(UpgradeAction::Rebuild { old_version }) = reopened.upgrade {
                    reopened.connection.close();
                    return Err(StoreError::DbInit(format!(
                        "database still at version {} after rebuild",
                        old_version
                    )));
                }
                Ok(reopened.connection)
            }
            _ => Ok(opened.connection),
        }
    }

    async fn open_or_reset(&self, name: &str, plan: &UpgradePlan) -> Result<Opened<B::Connection>> {
        match self.backend.open(name, plan).await {
            Ok(opened) => {
                tracing::debug!(database = %name, version = plan.version, upgrade = ?opened.upgrade, "opened");
                Ok(opened)
            }
            Err(err) => {
                tracing::warn!(database = %name, error = %err, "open failed, deleting database");
                if let Err(delete_err) = self.backend.delete_database(name).await {
                    tracing::warn!(database = %name, error = %delete_err, "delete after failed open failed");
                }
                Err(StoreError::DbInit(err.to_string()))
            }
        }
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        if !self.backend.is_available() {
            return Err(StoreError::EnvironmentUnsupported(
                "no storage engine in this environment".into(),
            ));
        }
        self.backend.delete_database(name).await?;
        tracing::info!(database = %name, "database deleted");
        Ok(())
    }
}

impl<B: Backend> Connector for ConnectionManager<B> {
    type Connection = B::Connection;

    async fn connect(&self, descriptor: &DataStoreDescriptor) -> Result<B::Connection> {
        self.open(descriptor).await
    }

    fn release(&self, connection: &B::Connection) {
        connection.close();
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        self.delete(name).await
    }
}
