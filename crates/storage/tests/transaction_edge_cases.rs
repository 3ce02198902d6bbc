//! Transaction isolation and edge case tests.
//!
//! Tests cover: empty transactions, overwrite-then-delete sequences within
//! one transaction, read-committed visibility of outside writes, last commit
//! wins between overlapping transactions, and transactions through the
//! decorators. These tests run against `MemoryBackend`.

#![allow(clippy::expect_used, clippy::panic)]

use bastion_storage::{
    Backend, CacheConfig, CachedBackend, Context, EncodedBackend, Entry, MemoryBackend, MemoryBackendConfig,
    StorageError,
};
use bytes::Bytes;
use tokio::task::JoinSet;

async fn value(backend: &impl Backend, key: &[u8]) -> Option<Bytes> {
    backend.get(&Context::background(), key).await.expect("get").map(|e| e.value)
}

// ============================================================================
// Buffer semantics
// ============================================================================

/// Committing a transaction with no operations is a no-op.
#[tokio::test]
async fn test_empty_transaction_commit() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    let txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    txn.commit(&ctx).await.expect("empty commit");
    assert!(backend.is_empty().await);
}

/// The last buffered operation on a key wins.
#[tokio::test]
async fn test_put_delete_put_same_key() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");

    txn.put(&ctx, Entry::new("k", "first")).await.expect("put");
    txn.delete(&ctx, b"k").await.expect("delete");
    assert!(txn.get(&ctx, b"k").await.expect("get").is_none());
    txn.put(&ctx, Entry::new("k", "second")).await.expect("put");
    txn.commit(&ctx).await.expect("commit");

    assert_eq!(value(&backend, b"k").await, Some(Bytes::from("second")));
}

/// Deleting a key that only exists in the buffer leaves nothing behind.
#[tokio::test]
async fn test_put_then_delete_never_lands() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");

    txn.put(&ctx, Entry::new("ghost", "v")).await.expect("put");
    txn.delete(&ctx, b"ghost").await.expect("delete");
    txn.commit(&ctx).await.expect("commit");

    assert!(value(&backend, b"ghost").await.is_none());
    assert!(backend.is_empty().await);
}

/// Listing inside a transaction merges committed keys with the buffer.
#[tokio::test]
async fn test_listing_overlays_buffer() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    for key in ["dir/a", "dir/b", "dir/sub/x"] {
        backend.put(&ctx, Entry::new(key, "v")).await.expect("put");
    }

    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    txn.delete(&ctx, b"dir/a").await.expect("delete");
    txn.delete(&ctx, b"dir/sub/x").await.expect("delete");
    txn.put(&ctx, Entry::new("dir/c", "v")).await.expect("put");
    txn.put(&ctx, Entry::new("dir/new/y", "v")).await.expect("put");

    assert_eq!(txn.list(&ctx, b"dir/").await.expect("list"), vec!["b", "c", "new/"]);
    assert_eq!(txn.list_page(&ctx, b"dir/", b"b", 1).await.expect("list_page"), vec!["c"]);
    assert_eq!(backend.list(&ctx, b"dir/").await.expect("list"), vec!["a", "b", "sub/"]);

    txn.rollback(&ctx).await.expect("rollback");
}

// ============================================================================
// Isolation
// ============================================================================

/// Reads of keys the transaction has not touched see the latest committed
/// value, including writes made after the transaction began.
#[tokio::test]
async fn test_untouched_keys_read_committed() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    backend.put(&ctx, Entry::new("k", "v1")).await.expect("put");

    let txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    assert_eq!(txn.get(&ctx, b"k").await.expect("get").map(|e| e.value), Some(Bytes::from("v1")));

    backend.put(&ctx, Entry::new("k", "v2")).await.expect("put");
    assert_eq!(txn.get(&ctx, b"k").await.expect("get").map(|e| e.value), Some(Bytes::from("v2")));
    txn.rollback(&ctx).await.expect("rollback");
}

/// Buffered keys shadow outside writes until commit, and the commit then
/// overwrites them.
#[tokio::test]
async fn test_buffered_key_shadows_outside_write() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();

    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    txn.put(&ctx, Entry::new("k", "txn")).await.expect("put");

    backend.put(&ctx, Entry::new("k", "outside")).await.expect("put");
    assert_eq!(txn.get(&ctx, b"k").await.expect("get").map(|e| e.value), Some(Bytes::from("txn")));

    txn.commit(&ctx).await.expect("commit");
    assert_eq!(value(&backend, b"k").await, Some(Bytes::from("txn")));
}

/// Overlapping transactions do not conflict; the later commit wins.
#[tokio::test]
async fn test_overlapping_transactions_last_commit_wins() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    let txn_backend = backend.as_transactional().expect("transactional");

    let mut first = txn_backend.begin_tx(&ctx).await.expect("begin");
    let mut second = txn_backend.begin_tx(&ctx).await.expect("begin");
    first.put(&ctx, Entry::new("k", "first")).await.expect("put");
    second.put(&ctx, Entry::new("k", "second")).await.expect("put");

    second.commit(&ctx).await.expect("commit");
    first.commit(&ctx).await.expect("commit");

    assert_eq!(value(&backend, b"k").await, Some(Bytes::from("first")));
}

/// Each commit is applied as a unit: concurrent readers see either none or
/// all of a transaction's keys.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commit_is_atomic_to_readers() {
    let backend = MemoryBackend::new();

    let mut readers = JoinSet::new();
    for _ in 0..4 {
        let backend = backend.clone();
        readers.spawn(async move {
            let ctx = Context::background();
            for _ in 0..200 {
                let listed = backend.list(&ctx, b"atomic/").await.expect("list");
                assert!(listed.is_empty() || listed.len() == 10, "torn commit observed: {listed:?}");
                tokio::task::yield_now().await;
            }
        });
    }

    let ctx = Context::background();
    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    for i in 0..10 {
        txn.put(&ctx, Entry::new(format!("atomic/{i:02}"), "v")).await.expect("put");
    }
    txn.commit(&ctx).await.expect("commit");

    while let Some(result) = readers.join_next().await {
        result.expect("reader should not panic");
    }
    assert_eq!(backend.len().await, 10);
}

// ============================================================================
// Limits and read-only transactions
// ============================================================================

/// Oversized values are rejected when buffered, not at commit.
#[tokio::test]
async fn test_oversized_value_rejected_at_put() {
    let config = MemoryBackendConfig::builder().max_value_size(4).build();
    let backend = MemoryBackend::with_config(config);
    let ctx = Context::background();

    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    let result = txn.put(&ctx, Entry::new("k", "too large")).await;
    assert!(
        matches!(result, Err(StorageError::ValueTooLarge { size: 9, limit: 4 })),
        "got: {result:?}"
    );
    txn.put(&ctx, Entry::new("k", "fits")).await.expect("put at limit");
    txn.commit(&ctx).await.expect("commit");
    assert_eq!(value(&backend, b"k").await, Some(Bytes::from("fits")));
}

/// Read-only transactions can read and list but never write.
#[tokio::test]
async fn test_read_only_transaction() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    backend.put(&ctx, Entry::new("ro/k", "v")).await.expect("put");

    let mut txn =
        backend.as_transactional().expect("transactional").begin_read_only_tx(&ctx).await.expect("begin");
    assert!(txn.get(&ctx, b"ro/k").await.expect("get").is_some());
    assert_eq!(txn.list(&ctx, b"ro/").await.expect("list"), vec!["k"]);

    assert!(matches!(txn.put(&ctx, Entry::new("ro/x", "v")).await, Err(StorageError::ReadOnlyTransaction)));
    assert!(matches!(txn.delete(&ctx, b"ro/k").await, Err(StorageError::ReadOnlyTransaction)));
    txn.commit(&ctx).await.expect("read-only commit");
    assert_eq!(backend.len().await, 1);
}

// ============================================================================
// Through decorators
// ============================================================================

/// The key-validating decorator checks keys as they are buffered.
#[tokio::test]
async fn test_encoded_transaction_validates_keys() {
    let backend = EncodedBackend::new(MemoryBackend::new());
    let ctx = Context::background();

    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    assert!(matches!(txn.put(&ctx, Entry::new("bad\nkey", "v")).await, Err(StorageError::NonPrintable)));
    assert!(matches!(txn.delete(&ctx, b"\xff").await, Err(StorageError::NonUtf8)));
    txn.put(&ctx, Entry::new("good", "v")).await.expect("put");
    txn.commit(&ctx).await.expect("commit");

    assert_eq!(value(&backend, b"good").await, Some(Bytes::from("v")));
    assert_eq!(backend.inner().len().await, 1);
}

/// Committing through the cache invalidates every written key.
#[tokio::test]
async fn test_cached_transaction_invalidates_on_commit() {
    let backend = CachedBackend::new(MemoryBackend::new(), CacheConfig::default());
    let ctx = Context::background();
    backend.put(&ctx, Entry::new("a", "old")).await.expect("put");
    backend.put(&ctx, Entry::new("b", "old")).await.expect("put");
    // Warm
    assert!(value(&backend, b"a").await.is_some());
    assert!(value(&backend, b"b").await.is_some());

    let mut txn = backend.as_transactional().expect("transactional").begin_tx(&ctx).await.expect("begin");
    txn.put(&ctx, Entry::new("a", "new")).await.expect("put");
    txn.delete(&ctx, b"b").await.expect("delete");
    txn.commit(&ctx).await.expect("commit");

    assert_eq!(value(&backend, b"a").await, Some(Bytes::from("new")));
    assert!(value(&backend, b"b").await.is_none());
}
