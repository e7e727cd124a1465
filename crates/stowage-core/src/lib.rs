//! Stowage Core
//!
//! A client facade over a versioned, indexed object store. Named stores are
//! declared once in a [`SchemaRegistry`]; a [`StoreManager`] then runs each
//! operation in its own read-write transaction on a fresh connection, reporting
//! failures to a [`MessageSink`].
//!
//! # Features
//!
//! - `subscriber` (default) - `logging` helpers built on tracing-subscriber
//!
//! # Example
//!
//! ```rust
//! use stowage_core::{CollectingSink, DataStoreDescriptor, MemoryBackend, SchemaRegistry, StoreManager};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::new().with_store(
//!     "notes",
//!     DataStoreDescriptor::builder("objectStore").key_path("id").build(),
//! );
//! let manager = StoreManager::with_backend(MemoryBackend::new(), registry, CollectingSink::new());
//!
//! # block_on(async {
//! manager.insert("notes", &json!({"id": 1, "record": "r"})).await.unwrap();
//! assert_eq!(manager.count("notes").await.unwrap(), 1);
//! # });
//! # fn block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod connection;
pub mod engine;
pub mod error;
pub mod key;
#[cfg(feature = "subscriber")]
pub mod logging;
pub mod manager;
pub mod messages;
pub mod mutate;
pub mod query;
pub mod schema;
pub mod transaction;

// Re-export main types at crate root
pub use connection::{ConnectionManager, Connector};
pub use engine::{
    Backend, Connection, Cursor, MemoryBackend, ObjectStore, Transaction, TransactionMode,
    UpgradeAction, UpgradePlan,
};
pub use error::{Result, StoreError};
pub use key::{Direction, Key, KeyRange, Record};
pub use manager::StoreManager;
pub use messages::{CollectingSink, MessageSink, Notice, Operation, TracingSink};
pub use query::{RangeQuery, SubstringSearch};
pub use schema::{DataStoreDescriptor, IndexDescriptor, KeyConfig, SchemaRegistry};
pub use transaction::Session;
