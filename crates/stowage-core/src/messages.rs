//! User-facing failure notices and the sinks that receive them.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::StoreError;

/// Receives one human-readable message per failed operation.
pub trait MessageSink {
    fn notify(&self, message: &str);
}

impl<S: MessageSink + ?Sized> MessageSink for Rc<S> {
    fn notify(&self, message: &str) {
        (**self).notify(message)
    }
}

/// The operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Initialize,
    Destroy,
    Insert,
    DeleteByKey,
    Clear,
    Update,
    Query,
    Count,
}

/// Catalog of notices shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    BadConfiguration,
    Incompatible,
    DbInitError,
    NotObject,
    SaveUnsuccessful,
    DeleteUnsuccessful,
    ClearUnsuccessful,
    UpdateUnsuccessful,
    QueryUnsuccessful,
    CountUnsuccessful,
    DestroyUnsuccessful,
    RangeParameterFailure,
    SearchParameterFailure,
}

impl Notice {
    pub fn text(&self) -> &'static str {
        match self {
            Notice::BadConfiguration => "Storage error: bad data store configuration.",
            Notice::Incompatible => {
                "Storage error: this environment has no supported storage engine."
            }
            Notice::DbInitError => {
                "Storage error: the database could not initialize. Please reload and try again."
            }
            Notice::NotObject => "Storage error: records must be objects.",
            Notice::SaveUnsuccessful => "Storage error: save was unsuccessful.",
            Notice::DeleteUnsuccessful => "Storage error: delete was unsuccessful.",
            Notice::ClearUnsuccessful => "Storage error: delete all was unsuccessful.",
            Notice::UpdateUnsuccessful => "Storage error: update was unsuccessful.",
            Notice::QueryUnsuccessful => "Storage error: records could not be read.",
            Notice::CountUnsuccessful => "Storage error: records could not be counted.",
            Notice::DestroyUnsuccessful => "Storage error: the database could not be removed.",
            Notice::RangeParameterFailure => {
                "Storage error: invalid range parameters for a key path range query."
            }
            Notice::SearchParameterFailure => {
                "Storage error: the search keyword or search field was empty."
            }
        }
    }

    /// Pick the notice for `err` raised while running `operation`.
    ///
    /// Configuration, environment and parameter errors have their own notices
    /// regardless of the operation.
    pub fn for_failure(operation: Operation, err: &StoreError) -> Notice {
        match err {
            StoreError::BadConfiguration { .. } => Notice::BadConfiguration,
            StoreError::EnvironmentUnsupported(_) => Notice::Incompatible,
            StoreError::DbInit(_) => Notice::DbInitError,
            StoreError::TypeMismatch(_) => Notice::NotObject,
            StoreError::RangeParameter(_) => Notice::RangeParameterFailure,
            StoreError::SearchParameter(_) => Notice::SearchParameterFailure,
            _ => match operation {
                Operation::Initialize => Notice::DbInitError,
                Operation::Destroy => Notice::DestroyUnsuccessful,
                Operation::Insert => Notice::SaveUnsuccessful,
                Operation::DeleteByKey => Notice::DeleteUnsuccessful,
                Operation::Clear => Notice::ClearUnsuccessful,
                Operation::Update => Notice::UpdateUnsuccessful,
                Operation::Query => Notice::QueryUnsuccessful,
                Operation::Count => Notice::CountUnsuccessful,
            },
        }
    }
}

/// Log target of notices forwarded by [`TracingSink`].
pub const NOTICE_TARGET: &str = "stowage::notice";

/// Sink that logs notices through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn notify(&self, message: &str) {
        tracing::warn!(target: NOTICE_TARGET, "{}", message);
    }
}

/// Sink that keeps every message. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    messages: Rc<RefCell<Vec<String>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
    }
}

impl MessageSink for CollectingSink {
    fn notify(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_errors_keep_their_notice() {
        let err = StoreError::SearchParameter("empty keyword".into());
        assert_eq!(
            Notice::for_failure(Operation::Query, &err),
            Notice::SearchParameterFailure
        );
    }

    #[test]
    fn test_engine_errors_use_operation_notice() {
        let err = StoreError::Request("boom".into());
        assert_eq!(
            Notice::for_failure(Operation::Clear, &err),
            Notice::ClearUnsuccessful
        );
        assert_eq!(
            Notice::for_failure(Operation::Insert, &StoreError::AlreadyExists("1".into())),
            Notice::SaveUnsuccessful
        );
    }

    #[test]
    fn test_collecting_sink_shares_buffer() {
        let sink = CollectingSink::new();
        let clone = sink.clone();
        clone.notify("hello");
        assert_eq!(sink.messages(), vec!["hello".to_string()]);
        sink.clear();
        assert!(clone.is_empty());
    }
}
