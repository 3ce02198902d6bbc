//! Conformance test suite for [`Backend`] implementations.
//!
//! This module provides async check functions that validate whether a
//! [`Backend`] implementation satisfies the contract. Every backend, whether
//! in-memory, wrapped in decorators, or third-party, can run the same suite.
//!
//! Keys used by the checks are printable UTF-8 and each check uses its own
//! key prefix, so the whole suite can run against one instance (including
//! one behind an [`EncodedBackend`](crate::EncodedBackend)).
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each check, or [`run_all`], from a
//! test:
//!
//! ```
//! use std::sync::Arc;
//!
//! use bastion_storage::{MemoryBackend, conformance};
//!
//! # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
//! conformance::crud_get_returns_none_for_missing_key(&MemoryBackend::new()).await;
//! conformance::run_all(Arc::new(MemoryBackend::new())).await;
//! # });
//! ```
//!
//! # Check Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | Basic put/get/delete semantics |
//! | Listing | Leaves, folder markers, ordering, prefixes |
//! | Pagination | `after` cursor and `limit` |
//! | Context | Cancelled and expired contexts |
//! | Transaction | Atomic commit, read-your-writes, rollback (when supported) |
//! | HA | Lock exclusion and hand-over (when supported) |
//! | Concurrent | Thread-safety under parallel access |

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{Context, backend::Backend, error::StorageError, types::Entry};

fn ctx() -> Context {
    Context::background()
}

async fn put<B: Backend + ?Sized>(backend: &B, key: &str, value: &str) {
    backend
        .put(&ctx(), Entry::new(key.to_owned(), value.to_owned()))
        .await
        .unwrap_or_else(|e| panic!("put {key} failed: {e:?}"));
}

async fn value_of<B: Backend + ?Sized>(backend: &B, key: &str) -> Option<Bytes> {
    backend.get(&ctx(), key.as_bytes()).await.expect("get should succeed").map(|e| e.value)
}

async fn listing<B: Backend + ?Sized>(backend: &B, prefix: &str) -> Vec<Bytes> {
    backend.list(&ctx(), prefix.as_bytes()).await.expect("list should succeed")
}

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a nonexistent key returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_key<B: Backend + ?Sized>(backend: &B) {
    let result = backend.get(&ctx(), b"crud/nonexistent").await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None, "missing key should return None");
}

/// `put` then `get` round-trips key and value.
pub async fn crud_put_then_get_returns_entry<B: Backend + ?Sized>(backend: &B) {
    put(backend, "crud/k1", "v1").await;
    let entry = backend.get(&ctx(), b"crud/k1").await.expect("get").expect("present");
    assert_eq!(entry, Entry::new("crud/k1", "v1"));
}

/// `put` on an existing key overwrites the value.
pub async fn crud_put_overwrites_existing<B: Backend + ?Sized>(backend: &B) {
    put(backend, "crud/k2", "original").await;
    put(backend, "crud/k2", "updated").await;
    assert_eq!(value_of(backend, "crud/k2").await, Some(Bytes::from("updated")));
}

/// `delete` on a nonexistent key is a silent no-op.
pub async fn crud_delete_nonexistent_is_noop<B: Backend + ?Sized>(backend: &B) {
    let result = backend.delete(&ctx(), b"crud/ghost").await;
    assert!(result.is_ok(), "delete of nonexistent key should not error: {result:?}");
}

/// `delete` removes a previously written key, and deleting again is a no-op.
pub async fn crud_delete_removes_key<B: Backend + ?Sized>(backend: &B) {
    put(backend, "crud/k3", "val").await;
    backend.delete(&ctx(), b"crud/k3").await.expect("delete");
    assert_eq!(value_of(backend, "crud/k3").await, None, "key should be gone after delete");
    backend.delete(&ctx(), b"crud/k3").await.expect("second delete");
}

/// Empty values are stored, and distinct from absent keys.
pub async fn crud_empty_value<B: Backend + ?Sized>(backend: &B) {
    put(backend, "crud/empty", "").await;
    assert_eq!(value_of(backend, "crud/empty").await, Some(Bytes::new()));
}

/// Large values (1 MiB) round-trip correctly.
pub async fn crud_large_value_roundtrip<B: Backend + ?Sized>(backend: &B) {
    let big = vec![0xCDu8; 1_048_576];
    backend.put(&ctx(), Entry::new("crud/big", big.clone())).await.expect("put large value");
    let val = value_of(backend, "crud/big").await;
    assert_eq!(val.as_ref().map(Bytes::len), Some(big.len()), "large value length mismatch");
    assert_eq!(val, Some(Bytes::from(big)));
}

// ============================================================================
// Listing
// ============================================================================

/// Listing returns leaves and one marker per subdirectory, sorted.
pub async fn list_leaves_and_folders<B: Backend + ?Sized>(backend: &B) {
    for key in ["ls/a/b", "ls/a/c", "ls/d", "ls/a/e/f"] {
        put(backend, key, "v").await;
    }
    assert_eq!(listing(backend, "ls/").await, vec!["a/", "d"]);
    assert_eq!(listing(backend, "ls/a/").await, vec!["b", "c", "e/"]);
}

/// A leaf and a folder with the same spelling are both listed.
pub async fn list_leaf_and_folder_are_distinct<B: Backend + ?Sized>(backend: &B) {
    put(backend, "lsd/foo", "leaf").await;
    put(backend, "lsd/foo/bar", "nested").await;
    assert_eq!(listing(backend, "lsd/").await, vec!["foo", "foo/"]);
}

/// Listing an unknown prefix yields an empty result, not an error.
pub async fn list_unknown_prefix_is_empty<B: Backend + ?Sized>(backend: &B) {
    assert!(listing(backend, "lsnone/").await.is_empty());
}

/// Deleting the last key under a folder removes the marker.
pub async fn list_reflects_deletes<B: Backend + ?Sized>(backend: &B) {
    put(backend, "lsdel/x/1", "v").await;
    put(backend, "lsdel/y", "v").await;
    backend.delete(&ctx(), b"lsdel/x/1").await.expect("delete");
    assert_eq!(listing(backend, "lsdel/").await, vec!["y"]);
}

// ============================================================================
// Pagination
// ============================================================================

/// Pages fed back through the cursor reassemble the full listing.
pub async fn page_walk_reassembles_listing<B: Backend + ?Sized>(backend: &B) {
    for key in ["pg/a", "pg/b/1", "pg/b/2", "pg/c", "pg/d/x/y", "pg/e"] {
        put(backend, key, "v").await;
    }
    let full = listing(backend, "pg/").await;
    assert_eq!(full, vec!["a", "b/", "c", "d/", "e"]);

    let mut collected = Vec::new();
    let mut after = Bytes::new();
    loop {
        let page = backend.list_page(&ctx(), b"pg/", &after, 2).await.expect("list_page");
        assert!(page.len() <= 2, "page exceeds limit: {page:?}");
        let Some(last) = page.last().cloned() else { break };
        collected.extend(page);
        after = last;
    }
    assert_eq!(collected, full);
}

/// The cursor is exclusive and a zero limit means unlimited.
pub async fn page_cursor_is_strict<B: Backend + ?Sized>(backend: &B) {
    for key in ["pgs/a", "pgs/b", "pgs/c"] {
        put(backend, key, "v").await;
    }
    let page = backend.list_page(&ctx(), b"pgs/", b"a", 0).await.expect("list_page");
    assert_eq!(page, vec!["b", "c"]);
    let page = backend.list_page(&ctx(), b"pgs/", b"c", 0).await.expect("list_page");
    assert!(page.is_empty());
}

// ============================================================================
// Context
// ============================================================================

/// A cancelled context fails every operation and mutates nothing.
pub async fn cancelled_context_fails_fast<B: Backend + ?Sized>(backend: &B) {
    let cancelled = Context::with_cancel();
    cancelled.cancel();

    let result = backend.put(&cancelled, Entry::new("ctx/k", "v")).await;
    assert!(matches!(result, Err(StorageError::Cancelled)), "put: {result:?}");
    let result = backend.delete(&cancelled, b"ctx/k").await;
    assert!(matches!(result, Err(StorageError::Cancelled)), "delete: {result:?}");
    let result = backend.list(&cancelled, b"ctx/").await;
    assert!(matches!(result, Err(StorageError::Cancelled)), "list: {result:?}");

    assert_eq!(value_of(backend, "ctx/k").await, None, "cancelled put must not write");
}

/// An expired deadline reports `Timeout`.
pub async fn expired_deadline_times_out<B: Backend + ?Sized>(backend: &B) {
    let expired = Context::with_deadline(tokio::time::Instant::now());
    let result = backend.get(&expired, b"ctx/expired").await;
    assert!(matches!(result, Err(StorageError::Timeout)), "get: {result:?}");
}

// ============================================================================
// Transactions (skipped when the backend has no transaction support)
// ============================================================================

/// Buffered writes are visible inside the transaction only until commit.
pub async fn tx_read_your_writes_and_commit<B: Backend + ?Sized>(backend: &B) {
    let Some(txn_backend) = backend.as_transactional() else { return };
    put(backend, "tx/existing", "old").await;

    let mut txn = txn_backend.begin_tx(&ctx()).await.expect("begin");
    txn.put(&ctx(), Entry::new("tx/new", "v")).await.expect("txn put");
    txn.delete(&ctx(), b"tx/existing").await.expect("txn delete");

    let seen = txn.get(&ctx(), b"tx/new").await.expect("txn get").map(|e| e.value);
    assert_eq!(seen, Some(Bytes::from("v")));
    assert!(txn.get(&ctx(), b"tx/existing").await.expect("txn get").is_none());
    assert_eq!(txn.list(&ctx(), b"tx/").await.expect("txn list"), vec!["new"]);

    assert_eq!(value_of(backend, "tx/new").await, None, "uncommitted write leaked");
    txn.commit(&ctx()).await.expect("commit");

    assert_eq!(value_of(backend, "tx/new").await, Some(Bytes::from("v")));
    assert_eq!(value_of(backend, "tx/existing").await, None);
}

/// Rolled-back writes never become visible.
pub async fn tx_rollback_discards<B: Backend + ?Sized>(backend: &B) {
    let Some(txn_backend) = backend.as_transactional() else { return };

    let mut txn = txn_backend.begin_tx(&ctx()).await.expect("begin");
    txn.put(&ctx(), Entry::new("txr/k", "v")).await.expect("txn put");
    txn.rollback(&ctx()).await.expect("rollback");
    assert_eq!(value_of(backend, "txr/k").await, None);

    let mut dropped = txn_backend.begin_tx(&ctx()).await.expect("begin");
    dropped.put(&ctx(), Entry::new("txr/d", "v")).await.expect("txn put");
    drop(dropped);
    assert_eq!(value_of(backend, "txr/d").await, None);
}

/// Read-only transactions reject writes.
pub async fn tx_read_only_rejects_writes<B: Backend + ?Sized>(backend: &B) {
    let Some(txn_backend) = backend.as_transactional() else { return };

    let mut txn = txn_backend.begin_read_only_tx(&ctx()).await.expect("begin");
    let result = txn.put(&ctx(), Entry::new("txro/k", "v")).await;
    assert!(matches!(result, Err(StorageError::ReadOnlyTransaction)), "put: {result:?}");
    txn.rollback(&ctx()).await.expect("rollback");
}

// ============================================================================
// HA (skipped when the backend has no HA support)
// ============================================================================

/// Only one candidate holds a lock, and release hands it over.
pub async fn ha_lock_exclusion_and_handover<B: Backend + ?Sized>(backend: &B) {
    let Some(ha) = backend.as_ha() else { return };
    assert!(ha.ha_enabled());

    let first = ha.lock_with("ha/leader", "node-1").expect("lock_with");
    let second = ha.lock_with("ha/leader", "node-2").expect("lock_with");

    let leader = first.lock(&CancellationToken::new()).await.expect("lock").expect("acquired");
    assert_eq!(first.value().await.expect("value"), (true, "node-1".to_owned()));
    assert_eq!(value_of(backend, "ha/leader").await, Some(Bytes::from("node-1")));

    let stop = CancellationToken::new();
    let blocked = tokio::time::timeout(Duration::from_millis(100), second.lock(&stop)).await;
    assert!(blocked.is_err(), "second candidate must not acquire a held lock");

    first.unlock().await.expect("unlock");
    assert!(leader.is_cancelled(), "leader token must fire on release");

    let taken = second.lock(&stop).await.expect("lock").expect("acquired after release");
    assert!(!taken.is_cancelled());
    assert_eq!(second.value().await.expect("value"), (true, "node-2".to_owned()));
    second.unlock().await.expect("unlock");
    assert_eq!(second.value().await.expect("value"), (false, String::new()));
}

// ============================================================================
// Concurrent
// ============================================================================

/// Parallel writes to distinct keys all land.
///
/// Requires `B: 'static` so the backend can be shared across spawned tasks
/// via `Arc`.
pub async fn concurrent_puts_to_different_keys<B: Backend + ?Sized + 'static>(backend: Arc<B>) {
    let mut handles = Vec::new();
    for i in 0..20 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            let key = format!("conc/{i:03}");
            backend.put(&ctx(), Entry::new(key, format!("v{i}"))).await.expect("concurrent put");
        }));
    }
    for handle in handles {
        handle.await.expect("task join");
    }

    let keys = listing(backend.as_ref(), "conc/").await;
    assert_eq!(keys.len(), 20, "every concurrent put should be listed");
    assert_eq!(value_of(backend.as_ref(), "conc/007").await, Some(Bytes::from("v7")));
}

/// Parallel readers see the same committed value.
pub async fn concurrent_reads_return_consistent_value<B: Backend + ?Sized + 'static>(
    backend: Arc<B>,
) {
    put(backend.as_ref(), "cread/k", "stable").await;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            backend.get(&ctx(), b"cread/k").await.expect("concurrent get").map(|e| e.value)
        }));
    }

    for handle in handles {
        let val = handle.await.expect("task join");
        assert_eq!(val, Some(Bytes::from("stable")));
    }
}

// ============================================================================
// Run all
// ============================================================================

/// Runs every check against one backend instance.
///
/// ```
/// use std::sync::Arc;
///
/// use bastion_storage::{MemoryHaBackend, conformance};
///
/// # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
/// conformance::run_all(Arc::new(MemoryHaBackend::new())).await;
/// # });
/// ```
pub async fn run_all<B: Backend + ?Sized + 'static>(backend: Arc<B>) {
    let b = backend.as_ref();

    crud_get_returns_none_for_missing_key(b).await;
    crud_put_then_get_returns_entry(b).await;
    crud_put_overwrites_existing(b).await;
    crud_delete_nonexistent_is_noop(b).await;
    crud_delete_removes_key(b).await;
    crud_empty_value(b).await;
    crud_large_value_roundtrip(b).await;

    list_leaves_and_folders(b).await;
    list_leaf_and_folder_are_distinct(b).await;
    list_unknown_prefix_is_empty(b).await;
    list_reflects_deletes(b).await;

    page_walk_reassembles_listing(b).await;
    page_cursor_is_strict(b).await;

    cancelled_context_fails_fast(b).await;
    expired_deadline_times_out(b).await;

    tx_read_your_writes_and_commit(b).await;
    tx_rollback_discards(b).await;
    tx_read_only_rejects_writes(b).await;

    ha_lock_exclusion_and_handover(b).await;

    concurrent_puts_to_different_keys(Arc::clone(&backend)).await;
    concurrent_reads_return_consistent_value(Arc::clone(&backend)).await;
}
