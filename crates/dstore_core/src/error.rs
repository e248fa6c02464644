//! Error types for dstore core.

use std::fmt;

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in datastore operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The requested entity does not exist.
    #[error("datastore: no such entity")]
    NoSuchEntity,

    /// The transaction kept conflicting until its attempts ran out.
    #[error("datastore: concurrent transaction")]
    ConcurrentTransaction,

    /// A transaction was started from inside another one.
    #[error("datastore: nested transactions are not supported")]
    NestedTransaction,

    /// Transactions are switched off for this datastore.
    #[error("datastore: transactions are disabled")]
    TransactionsDisabled,

    /// The key is malformed or does not belong here.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What is wrong with the key.
        reason: String,
    },

    /// The query cannot be run as written.
    #[error("invalid query: {reason}")]
    InvalidQuery {
        /// What is wrong with the query.
        reason: String,
    },

    /// The query needs a composite index that has not been registered.
    #[error("insufficient indexes, consider adding: {index}")]
    MissingIndex {
        /// The index definition the query needs.
        index: String,
    },

    /// The transaction touched more entity groups than allowed.
    #[error("transaction touched more than {limit} entity groups")]
    TooManyEntityGroups {
        /// Maximum number of groups for this kind of transaction.
        limit: usize,
    },

    /// A named task already exists in its queue.
    #[error("task already exists: {name}")]
    TaskAlreadyExists {
        /// Name of the task.
        name: String,
    },

    /// The queue has not been created.
    #[error("unknown queue: {name}")]
    UnknownQueue {
        /// Name of the queue.
        name: String,
    },

    /// The transaction added more tasks than allowed.
    #[error("transaction added more than {limit} tasks")]
    TooManyTasks {
        /// Maximum number of tasks per transaction.
        limit: usize,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Opaque per-item failure reported by a backend.
    #[error("backend error: {message}")]
    Backend {
        /// Backend-specific description.
        message: String,
    },

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] dstore_codec::CodecError),

    /// One result per item of a batch call.
    #[error("{0}")]
    Multi(MultiError),
}

impl CoreError {
    /// Create an invalid key error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create an invalid query error.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::NoSuchEntity`].
    #[must_use]
    pub fn is_no_such_entity(&self) -> bool {
        matches!(self, Self::NoSuchEntity)
    }
}

/// Per-item errors of a batch call, in request order.
///
/// `None` entries succeeded. The length always equals the request length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiError(pub Vec<Option<CoreError>>);

impl MultiError {
    /// Build from per-item results, or `None` if every item succeeded.
    #[must_use]
    pub fn from_errors(errors: Vec<Option<CoreError>>) -> Option<Self> {
        if errors.iter().all(Option::is_none) {
            None
        } else {
            Some(Self(errors))
        }
    }

    /// Error of item `index`, if it failed.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CoreError> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an empty batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failed = self.0.iter().flatten();
        match failed.next() {
            None => write!(f, "(0 errors)"),
            Some(first) => {
                let rest = failed.count();
                if rest == 0 {
                    write!(f, "{first}")
                } else {
                    write!(f, "{first} (and {rest} other errors)")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_error_collapses_when_all_succeeded() {
        assert!(MultiError::from_errors(vec![None, None]).is_none());
        let me = MultiError::from_errors(vec![None, Some(CoreError::NoSuchEntity)]).unwrap();
        assert_eq!(me.len(), 2);
        assert_eq!(me.get(1), Some(&CoreError::NoSuchEntity));
        assert_eq!(me.get(0), None);
    }

    #[test]
    fn multi_error_display() {
        let me = MultiError(vec![
            Some(CoreError::NoSuchEntity),
            None,
            Some(CoreError::invalid_key("empty kind")),
        ]);
        assert_eq!(
            me.to_string(),
            "datastore: no such entity (and 1 other errors)"
        );
    }
}
