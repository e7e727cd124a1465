//! Error types for the IndexedDB engine

use stowage_core::StoreError;
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// Result type for IndexedDB operations
pub type Result<T> = std::result::Result<T, IndexedDbError>;

/// Errors that can occur while talking to IndexedDB
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB is not available in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),

    /// Database open/upgrade error
    #[error("IndexedDB open error: {0}")]
    Open(String),

    /// `deleteDatabase` blocked by a connection that stayed open
    #[error("IndexedDB delete blocked: {0}")]
    Blocked(String),

    /// Requested version is lower than the stored one
    #[error("IndexedDB version error: {0}")]
    Version(String),

    /// Transaction could not start, or aborted
    #[error("IndexedDB transaction error: {0}")]
    Transaction(String),

    /// Key or uniqueness constraint violated (`ConstraintError`)
    #[error("IndexedDB constraint error: {0}")]
    Constraint(String),

    /// Invalid key or key path (`DataError`)
    #[error("IndexedDB data error: {0}")]
    Data(String),

    /// Object store or index missing (`NotFoundError`)
    #[error("IndexedDB not found: {0}")]
    NotFound(String),

    /// Request error from IDB operation
    #[error("IndexedDB request error: {0}")]
    Request(String),

    /// JavaScript value conversion error
    #[error("JS conversion error: {0}")]
    JsValue(String),
}

impl IndexedDbError {
    /// Classify a rejected request by its `DOMException` name.
    pub fn from_dom(value: JsValue) -> Self {
        match value.dyn_into::<DomException>() {
            Ok(ex) => {
                let message = format!("{}: {}", ex.name(), ex.message());
                match ex.name().as_str() {
                    "ConstraintError" => IndexedDbError::Constraint(message),
                    "DataError" => IndexedDbError::Data(message),
                    "NotFoundError" => IndexedDbError::NotFound(message),
                    "VersionError" => IndexedDbError::Version(message),
                    "AbortError" | "TransactionInactiveError" | "InvalidStateError" => {
                        IndexedDbError::Transaction(message)
                    }
                    _ => IndexedDbError::Request(message),
                }
            }
            Err(other) => IndexedDbError::from(other),
        }
    }
}

impl From<JsValue> for IndexedDbError {
    fn from(val: JsValue) -> Self {
        let msg = js_sys::JSON::stringify(&val)
            .map(String::from)
            .unwrap_or_else(|_| format!("{:?}", val));
        IndexedDbError::Request(msg)
    }
}

impl From<serde_wasm_bindgen::Error> for IndexedDbError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        IndexedDbError::JsValue(err.to_string())
    }
}

impl From<IndexedDbError> for StoreError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::NotAvailable(msg) => StoreError::EnvironmentUnsupported(msg),
            IndexedDbError::Open(msg) => StoreError::Backend(format!("IndexedDB open: {}", msg)),
            IndexedDbError::Blocked(msg) => StoreError::DbInit(msg),
            IndexedDbError::Version(msg) => StoreError::Version(msg),
            IndexedDbError::Transaction(msg) => StoreError::Transaction(msg),
            IndexedDbError::Constraint(msg) => StoreError::Constraint(msg),
            IndexedDbError::Data(msg) => StoreError::InvalidKey(msg),
            IndexedDbError::NotFound(msg) => StoreError::NotFound(msg),
            IndexedDbError::Request(msg) => StoreError::Request(msg),
            IndexedDbError::JsValue(msg) => StoreError::Serialization(msg),
        }
    }
}
