//! IndexedDB storage engine for stowage (browser WASM)
//!
//! Implements the `stowage_core::engine` traits on top of the browser's
//! IndexedDB through web-sys, so a `StoreManager` can run the same operations
//! against persistent browser storage that it runs against the memory engine.
//!
//! Requests are wrapped into promises and awaited with
//! `wasm_bindgen_futures::JsFuture`; records cross the JS boundary through
//! `serde-wasm-bindgen` as plain objects.
//!
//! # Example
//!
//! ```rust,ignore
//! use stowage_core::{DataStoreDescriptor, SchemaRegistry, StoreManager, TracingSink};
//! use stowage_indexeddb::IndexedDbBackend;
//!
//! let registry = SchemaRegistry::new().with_store(
//!     "exampleOneDb",
//!     DataStoreDescriptor::builder("objectStore").key_path("id").build(),
//! );
//! let manager = StoreManager::with_backend(IndexedDbBackend::new(), registry, TracingSink);
//!
//! manager.insert("exampleOneDb", &serde_json::json!({"id": 1})).await?;
//! let count = manager.count("exampleOneDb").await?;
//! ```

pub mod backend;
pub mod convert;
pub mod error;
pub mod idb;

pub use backend::{
    IndexedDbBackend, IndexedDbConnection, IndexedDbCursor, IndexedDbObjectStore,
    IndexedDbTransaction,
};
pub use error::{IndexedDbError, Result};
