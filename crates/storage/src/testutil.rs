//! Shared test utilities for storage backend testing.
//!
//! This module provides common helpers for creating test backends, generating
//! test data, and asserting on [`StorageResult`] values. It is feature-gated
//! behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In a downstream crate's tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! bastion-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```ignore
//! // Requires the `testutil` feature to be enabled.
//! use bastion_storage::testutil::{make_key, make_value, populated_backend};
//! ```

use crate::{
    Backend, Context,
    error::{Operation, StorageError, StorageResult},
    memory::MemoryBackend,
    types::Entry,
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix/000042"` (zero-padded to 6 digits). The
/// zero-padding makes lexicographic order match numeric order, which
/// listing and pagination tests rely on.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> String {
    format!("{prefix}/{idx:06}")
}

/// Create a test value of the given size filled with `0xAB` bytes.
#[must_use]
pub fn make_value(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

/// Create a test value tagged with a task ID and sequence number.
///
/// Produces values like `"task3-val42"`. Useful for concurrent tests that
/// need to identify which task wrote which value.
#[must_use]
pub fn make_tagged_value(task: usize, seq: usize) -> String {
    format!("task{task}-val{seq}")
}

/// Create a [`MemoryBackend`] pre-populated with `count` keys.
///
/// Keys are formatted by [`make_key`] with values of `value_size` bytes.
///
/// # Panics
///
/// Panics if any `put` fails (should not happen with a fresh backend).
pub async fn populated_backend(prefix: &str, count: usize, value_size: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    let value = make_value(value_size);
    for i in 0..count {
        backend
            .put(&ctx, Entry::new(make_key(prefix, i), value.clone()))
            .await
            .expect("populate put failed");
    }
    backend
}

/// Assert that a [`StorageResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
///
/// # Examples
///
/// ```ignore
/// // Requires the `testutil` feature to be enabled.
/// use bastion_storage::{assert_storage_ok, StorageResult};
///
/// let result: StorageResult<i32> = Ok(42);
/// let value = assert_storage_ok!(result);
/// assert_eq!(value, 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] failed with a given [`StorageError`] variant.
///
/// ```ignore
/// use bastion_storage::{assert_storage_error, StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::NonPrintable);
/// assert_storage_error!(result, NonPrintable);
/// ```
#[macro_export]
macro_rules! assert_storage_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "expected StorageError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "{}: expected StorageError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] failed because `operation` is switched off.
#[macro_export]
macro_rules! assert_disabled {
    ($result:expr, $operation:expr) => {
        assert!(
            $crate::testutil::is_disabled(&$result, $operation),
            "expected {} to be disabled, got: {:?}",
            $operation,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] failed because its context was done.
#[macro_export]
macro_rules! assert_cancelled {
    ($result:expr) => {
        assert!(
            $crate::testutil::is_cancellation(&$result),
            "expected a cancellation error, got: {:?}",
            $result,
        );
    };
}

/// Returns `true` if the result is [`StorageError::OperationDisabled`] for `operation`.
pub fn is_disabled<T>(result: &StorageResult<T>, operation: Operation) -> bool {
    matches!(result, Err(StorageError::OperationDisabled { operation: op }) if *op == operation)
}

/// Returns `true` if the result is [`StorageError::Cancelled`] or [`StorageError::Timeout`].
pub fn is_cancellation<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(e) if e.is_cancellation())
}

/// Returns `true` if the result is a key validation failure.
pub fn is_validation<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(e) if e.is_validation())
}
