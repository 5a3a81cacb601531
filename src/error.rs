//! Error types for store, pub/sub and transaction operations.
//!
//! The error set is closed: every failure a caller can observe maps to one
//! of the variants below. Callers that only care about a particular failure
//! class can use the `is_*` predicates instead of matching, which keeps
//! wrapped errors (`TransactionFailed`) transparent.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by [`Store`](crate::Store) and
/// [`Transaction`](crate::Transaction) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The key does not exist (or expired and was lazily removed).
    #[error("key not found")]
    KeyNotFound,

    /// The key exists but its expiration has passed. Only `get` and
    /// `get_with_details` distinguish this from [`StoreError::KeyNotFound`].
    #[error("key expired")]
    KeyExpired,

    /// An NX-gated write or a rename collided with an existing key.
    #[error("key already exists")]
    KeyExists,

    /// The operation does not match the entry's container kind
    /// (e.g. a list op against a hash).
    #[error("invalid data type")]
    InvalidType,

    /// The scalar payload has the wrong shape for the operation
    /// (e.g. `incr` on a non-integer string).
    #[error("invalid value type")]
    InvalidValueType,

    /// The compare-and-set precondition failed.
    #[error("value mismatch")]
    ValueMismatch,

    /// The key is empty or otherwise malformed.
    #[error("invalid key")]
    InvalidKey,

    /// A negative TTL was supplied.
    #[error("invalid TTL value")]
    InvalidTtl,

    /// Pop on an empty list that somehow persisted. Empty lists are deleted
    /// on the last pop, so this is a defensive variant.
    #[error("list is empty")]
    EmptyList,

    /// A variadic operation received zero values.
    #[error("empty values")]
    EmptyValues,

    /// The caller's [`Context`](crate::Context) was canceled before the
    /// operation started; nothing was modified.
    #[error("operation canceled")]
    ContextCanceled,

    /// An operation was invoked on a committed or rolled-back transaction.
    #[error("transaction is not active")]
    TransactionNotActive,

    /// Commit failed and rollback ran; wraps the underlying cause.
    #[error("transaction failed: {0}")]
    TransactionFailed(#[source] Box<StoreError>),
}

impl StoreError {
    /// True for [`StoreError::KeyNotFound`], looking through
    /// [`StoreError::TransactionFailed`] wrapping.
    pub fn is_key_not_found(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::KeyNotFound))
    }

    /// True for [`StoreError::KeyExpired`].
    pub fn is_key_expired(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::KeyExpired))
    }

    /// True for [`StoreError::KeyExists`].
    pub fn is_key_exists(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::KeyExists))
    }

    /// True for [`StoreError::InvalidType`].
    pub fn is_invalid_type(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::InvalidType))
    }

    /// True for [`StoreError::InvalidValueType`].
    pub fn is_invalid_value_type(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::InvalidValueType))
    }

    /// True for [`StoreError::ValueMismatch`].
    pub fn is_value_mismatch(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::ValueMismatch))
    }

    /// True for [`StoreError::InvalidKey`].
    pub fn is_invalid_key(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::InvalidKey))
    }

    /// True for [`StoreError::InvalidTtl`].
    pub fn is_invalid_ttl(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::InvalidTtl))
    }

    /// True for [`StoreError::EmptyList`].
    pub fn is_empty_list(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::EmptyList))
    }

    /// True for [`StoreError::EmptyValues`].
    pub fn is_empty_values(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::EmptyValues))
    }

    /// True for [`StoreError::ContextCanceled`].
    pub fn is_context_canceled(&self) -> bool {
        self.matches(|e| matches!(e, StoreError::ContextCanceled))
    }

    /// True for [`StoreError::TransactionNotActive`].
    pub fn is_transaction_not_active(&self) -> bool {
        matches!(self, StoreError::TransactionNotActive)
    }

    /// True for [`StoreError::TransactionFailed`].
    pub fn is_transaction_failed(&self) -> bool {
        matches!(self, StoreError::TransactionFailed(_))
    }

    /// The underlying cause of a failed commit, if this is
    /// [`StoreError::TransactionFailed`].
    pub fn transaction_cause(&self) -> Option<&StoreError> {
        match self {
            StoreError::TransactionFailed(cause) => Some(cause),
            _ => None,
        }
    }

    fn matches(&self, pred: impl Fn(&StoreError) -> bool) -> bool {
        match self {
            StoreError::TransactionFailed(cause) => pred(cause),
            other => pred(other),
        }
    }
}
