//! Storage error types and result alias.
//!
//! Every backend maps its failures onto [`StorageError`]. The variants fall
//! into a small taxonomy that callers can reason about without knowing which
//! medium sits underneath:
//!
//! - **Validation** ([`StorageError::NonUtf8`], [`StorageError::NonPrintable`]) - the key was
//!   rejected by the [encoding guard](crate::encoding) before any I/O.
//! - **Capacity** ([`StorageError::ValueTooLarge`]) - the value exceeds the configured maximum.
//! - **Disabled** ([`StorageError::OperationDisabled`]) - failure injection is active. Only test
//!   harnesses ever see this.
//! - **Cancellation** ([`StorageError::Cancelled`], [`StorageError::Timeout`]) - the caller's
//!   [`Context`](crate::Context) finished first.
//! - **Medium** ([`StorageError::Backend`], [`StorageError::Internal`]) - opaque failures of the
//!   underlying store, wrapped with the operation and key they belong to.
//!
//! A missing key is never an error: reads return `Ok(None)`.
//!
//! # Example
//!
//! ```
//! use bastion_storage::{Operation, StorageError, StorageResult};
//!
//! fn read(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::backend(Operation::Get, key, std::io::Error::other("disk gone")))
//! }
//!
//! let err = read("core/seal").unwrap_err();
//! assert_eq!(err.to_string(), "get core/seal: storage backend failure");
//! ```

use std::{fmt, sync::Arc};

use thiserror::Error;

/// A shared boxed error used to keep source chains cloneable.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The operation kinds a backend performs.
///
/// Used to label errors and to address the per-operation failure-injection
/// switches of [`MemoryBackend`](crate::MemoryBackend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A point read.
    Get,
    /// An insert or overwrite.
    Put,
    /// A removal.
    Delete,
    /// A listing, paginated or not.
    List,
    /// A point read issued inside a transaction.
    GetInTxn,
}

impl Operation {
    /// Every operation kind, in declaration order.
    pub const ALL: [Operation; 5] =
        [Operation::Get, Operation::Put, Operation::Delete, Operation::List, Operation::GetInTxn];

    /// Returns the lowercase name used in logs and error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::List => "list",
            Self::GetInTxn => "get-in-txn",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during storage operations.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream matches must
/// include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The key is not valid UTF-8.
    #[error("key contains invalid UTF-8 characters")]
    NonUtf8,

    /// The key contains a character outside the printable set.
    #[error("key contains non-printable characters")]
    NonPrintable,

    /// The value is larger than the backend accepts.
    #[error("put failed due to value being too large: {size} bytes exceeds limit of {limit}")]
    ValueTooLarge {
        /// Size of the rejected value in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// The operation is switched off by failure injection.
    #[error("{} operations disabled in inmem backend", disabled_label(.operation))]
    OperationDisabled {
        /// Which operation kind was disabled.
        operation: Operation,
    },

    /// The caller's context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The caller's deadline passed before the operation could run.
    #[error("context deadline exceeded")]
    Timeout,

    /// The underlying medium failed.
    ///
    /// Carries the operation and key so the failure can be traced back to
    /// the request that caused it.
    #[error("{operation} {key}: storage backend failure")]
    Backend {
        /// The operation that failed.
        operation: Operation,
        /// The key (or prefix, for listings) the operation addressed.
        key: String,
        /// The medium's own error.
        #[source]
        source: BoxError,
    },

    /// Internal backend error that does not fit the other categories.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// `lock` was called on a handle that already holds its lock.
    #[error("lock already held: {key}")]
    LockAlreadyHeld {
        /// The lock key.
        key: String,
    },

    /// A write was attempted inside a read-only transaction.
    #[error("cannot write in a read-only transaction")]
    ReadOnlyTransaction,

    /// The backend configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn disabled_label(operation: &Operation) -> &'static str {
    match operation {
        Operation::GetInTxn => "get (inside transactions)",
        other => other.as_str(),
    }
}

impl StorageError {
    /// Creates a [`ValueTooLarge`](Self::ValueTooLarge) error.
    #[must_use]
    pub fn value_too_large(size: usize, limit: usize) -> Self {
        Self::ValueTooLarge { size, limit }
    }

    /// Creates an [`OperationDisabled`](Self::OperationDisabled) error.
    #[must_use]
    pub fn disabled(operation: Operation) -> Self {
        Self::OperationDisabled { operation }
    }

    /// Wraps a failure of the underlying medium with its operation context.
    ///
    /// Non-UTF-8 keys are rendered lossily; the key only serves diagnostics.
    #[must_use]
    pub fn backend(
        operation: Operation,
        key: impl AsRef<[u8]>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            operation,
            key: String::from_utf8_lossy(key.as_ref()).into_owned(),
            source: Arc::new(source),
        }
    }

    /// Creates an [`Internal`](Self::Internal) error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates an [`Internal`](Self::Internal) error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for key validation failures raised before any I/O.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::NonUtf8 | Self::NonPrintable)
    }

    /// Returns `true` when the caller's context ended the operation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}

/// Errors produced while building a backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field held a value that could not be interpreted.
    #[error("invalid value for {field}: {value:?} ({reason})")]
    InvalidValue {
        /// The configuration key.
        field: &'static str,
        /// The rejected raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A numeric field was below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The configuration key.
        field: &'static str,
        /// The smallest accepted value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A numeric field was above its maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// The configuration key.
        field: &'static str,
        /// The largest accepted value.
        max: String,
        /// The rejected value.
        value: String,
    },
}
