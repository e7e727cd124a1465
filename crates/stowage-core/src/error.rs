//! Storage error types

use thiserror::Error;

/// Errors that can occur while driving a store operation.
///
/// Configuration and parameter variants are produced before any storage work
/// starts; the rest come back from the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Descriptor missing from the registry or malformed
    #[error("bad store configuration for '{name}': {reason}")]
    BadConfiguration { name: String, reason: String },

    /// No storage-capable runtime is present
    #[error("storage engine not available: {0}")]
    EnvironmentUnsupported(String),

    /// Opening (or rebuilding) the database failed
    #[error("database could not initialize: {0}")]
    DbInit(String),

    /// Payload is not a structured record
    #[error("expected a JSON object, got {0}")]
    TypeMismatch(String),

    /// Range bounds are missing, empty or inverted
    #[error("invalid range parameters: {0}")]
    RangeParameter(String),

    /// Search field or keyword is empty
    #[error("invalid search parameters: {0}")]
    SearchParameter(String),

    /// Value cannot be used as a key, or the record lacks its key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A record with this primary key already exists
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// A unique index constraint was violated
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Index is not declared on the store
    #[error("unknown index: {0}")]
    UnknownIndex(String),

    /// Requested version is lower than the stored version
    #[error("version error: {0}")]
    Version(String),

    /// Transaction could not start, was aborted, or is no longer active
    #[error("transaction error: {0}")]
    Transaction(String),

    /// An individual engine request failed
    #[error("request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage backend error
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Errors detected before any storage work begins.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StoreError::BadConfiguration { .. }
                | StoreError::EnvironmentUnsupported(_)
                | StoreError::TypeMismatch(_)
                | StoreError::RangeParameter(_)
                | StoreError::SearchParameter(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;
