//! # Error Handling
//!
//! A single error type, [`StreamsError`], covers every failure the crate can
//! surface. Errors are always raised synchronously at the offending call:
//!
//! - **Construction errors** (`InvalidArgument`, `DuplicateName`) come from the
//!   DSL while the graph is being built, never later at execution time.
//! - **Coordination errors** (`IllegalState`, `Unsupported`) come from the
//!   partition coordinator and are handed to the task runtime unchanged. The
//!   crate performs no retries.
//! - **Query errors** (`StoreNotFound`, `InvalidStoreType`) reach only the
//!   querying caller and never touch the owning task's write path.
//!
//! ## Example
//!
//! ```rust
//! use kweave::error::StreamsError;
//!
//! let err = StreamsError::unsupported("seek");
//! assert!(err.is_unsupported());
//! assert_eq!(err.to_string(), "operation 'seek' is not supported by this coordinator");
//! ```

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = StreamsError> = std::result::Result<T, E>;

/// Error type for graph construction, partition coordination and store queries.
#[derive(Error, Debug)]
pub enum StreamsError {
    /// A required parameter was empty or a collection was empty.
    #[error("{operation}: invalid argument: {message}")]
    InvalidArgument {
        /// Operation that rejected the argument.
        operation: String,
        /// What was wrong with it.
        message: String,
    },
    /// A name was already registered in the builder namespace.
    #[error("name '{0}' is already used in this topology")]
    DuplicateName(String),
    /// An operation was invoked before its precondition held.
    #[error("{operation}: illegal state: {reason}")]
    IllegalState {
        /// Operation that was invoked.
        operation: String,
        /// The missing precondition.
        reason: String,
    },
    /// No live instance of the named store exists.
    #[error("state store '{0}' not found or no longer available")]
    StoreNotFound(String),
    /// Instances exist but none has the shape the query requires.
    #[error("state store '{store}' has no instance of the expected shape ({expected})")]
    InvalidStoreType {
        /// Store name that was queried.
        store: String,
        /// Description of the accepted shapes.
        expected: String,
    },
    /// The operation is deliberately not modelled.
    #[error("operation '{operation}' is not supported by this coordinator")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: String,
    },
    /// A codec failed to encode or decode a key or value.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A record reached a node with a different key or value type than declared.
    #[error("node '{node}' received a record that is not of type {expected}")]
    TypeMismatch {
        /// Node that received the record.
        node: String,
        /// Expected type name.
        expected: &'static str,
    },
    /// A lock guarding shared state was poisoned.
    #[error("lock error: {0}")]
    Lock(String),
    /// Configuration was malformed or incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O error while loading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamsError {
    /// Builds an [`StreamsError::InvalidArgument`].
    pub fn invalid_argument(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Builds an [`StreamsError::IllegalState`].
    pub fn illegal_state(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IllegalState {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Builds an [`StreamsError::Unsupported`].
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// True for [`StreamsError::InvalidArgument`].
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// True for [`StreamsError::DuplicateName`].
    pub fn is_duplicate_name(&self) -> bool {
        matches!(self, Self::DuplicateName(_))
    }

    /// True for [`StreamsError::IllegalState`].
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState { .. })
    }

    /// True for [`StreamsError::StoreNotFound`].
    pub fn is_store_not_found(&self) -> bool {
        matches!(self, Self::StoreNotFound(_))
    }

    /// True for [`StreamsError::InvalidStoreType`].
    pub fn is_invalid_store_type(&self) -> bool {
        matches!(self, Self::InvalidStoreType { .. })
    }

    /// True for [`StreamsError::Unsupported`].
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for StreamsError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<serde_json::Error> for StreamsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
