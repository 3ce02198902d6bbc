//! Listing and pagination edge case tests for `MemoryBackend`.
//!
//! Covers folder collapsing, prefixes that do not end in a separator, the
//! strict `after` cursor, limits, byte-order ordering, and listings through
//! the key-validating decorator.

#![allow(clippy::expect_used, clippy::panic)]

use bastion_storage::{Backend, Context, EncodedBackend, Entry, MemoryBackend};
use bytes::Bytes;
use rstest::rstest;

/// Helper: populate a backend with a small tree.
///
/// ```text
/// app/config
/// app/db/primary
/// app/db/replica/1
/// app/db/replica/2
/// app/logs/2024
/// app/z
/// apple
/// ```
async fn tree_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    for key in [
        "app/config",
        "app/db/primary",
        "app/db/replica/1",
        "app/db/replica/2",
        "app/logs/2024",
        "app/z",
        "apple",
    ] {
        backend.put(&ctx, Entry::new(key, "v")).await.expect("put");
    }
    backend
}

fn strings(items: Vec<Bytes>) -> Vec<String> {
    items.into_iter().map(|b| String::from_utf8(b.to_vec()).expect("utf8")).collect()
}

// ============================================================================
// Folder collapsing
// ============================================================================

#[rstest]
#[case("", &["app/", "apple"])]
#[case("app/", &["config", "db/", "logs/", "z"])]
#[case("app/db/", &["primary", "replica/"])]
#[case("app/db/replica/", &["1", "2"])]
#[case("app", &["/", "le"])]
#[case("app/d", &["b/"])]
#[case("nothing/", &[])]
#[tokio::test]
async fn list_returns_immediate_children(#[case] prefix: &str, #[case] expected: &[&str]) {
    let backend = tree_backend().await;
    let listed = backend.list(&Context::background(), prefix.as_bytes()).await.expect("list");
    assert_eq!(strings(listed), expected, "prefix {prefix:?}");
}

/// A key identical to the prefix lists as the empty child.
#[tokio::test]
async fn key_equal_to_prefix_lists_as_empty_name() {
    let backend = tree_backend().await;
    let listed = backend.list(&Context::background(), b"apple").await.expect("list");
    assert_eq!(strings(listed), vec![String::new()]);
}

/// A folder marker disappears once its last descendant is deleted.
#[tokio::test]
async fn folder_vanishes_with_last_descendant() {
    let backend = tree_backend().await;
    let ctx = Context::background();
    backend.delete(&ctx, b"app/db/replica/1").await.expect("delete");
    assert_eq!(strings(backend.list(&ctx, b"app/db/").await.expect("list")), ["primary", "replica/"]);

    backend.delete(&ctx, b"app/db/replica/2").await.expect("delete");
    assert_eq!(strings(backend.list(&ctx, b"app/db/").await.expect("list")), ["primary"]);
}

/// Results are ordered by raw bytes, not by any locale collation.
#[tokio::test]
async fn ordering_is_bytewise() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    for key in ["o/b", "o/B", "o/a", "o/é", "o/Z", "o/0"] {
        backend.put(&ctx, Entry::new(key, "v")).await.expect("put");
    }
    let listed = strings(backend.list(&ctx, b"o/").await.expect("list"));
    assert_eq!(listed, ["0", "B", "Z", "a", "b", "é"]);
}

// ============================================================================
// Pagination
// ============================================================================

#[rstest]
#[case("", 0, &["config", "db/", "logs/", "z"])]
#[case("", 2, &["config", "db/"])]
#[case("config", 0, &["db/", "logs/", "z"])]
#[case("db/", 0, &["logs/", "z"])]
#[case("db", 1, &["db/"])]
#[case("c", 100, &["config", "db/", "logs/", "z"])]
#[case("z", 0, &[])]
#[case("zz", 5, &[])]
#[tokio::test]
async fn list_page_applies_cursor_and_limit(
    #[case] after: &str,
    #[case] limit: usize,
    #[case] expected: &[&str],
) {
    let backend = tree_backend().await;
    let listed = backend
        .list_page(&Context::background(), b"app/", after.as_bytes(), limit)
        .await
        .expect("list_page");
    assert_eq!(strings(listed), expected, "after {after:?} limit {limit}");
}

/// Walking page by page with a limit of one visits every child exactly once.
#[tokio::test]
async fn page_walk_one_at_a_time() {
    let backend = tree_backend().await;
    let ctx = Context::background();

    let mut walked = Vec::new();
    let mut after = Bytes::new();
    loop {
        let page = backend.list_page(&ctx, b"app/", &after, 1).await.expect("list_page");
        let Some(last) = page.last().cloned() else { break };
        assert_eq!(page.len(), 1);
        walked.extend(strings(page));
        after = last;
    }
    assert_eq!(walked, ["config", "db/", "logs/", "z"]);
}

/// A large flat directory paginates without losing or repeating keys.
#[tokio::test]
async fn large_directory_pagination() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    for i in 0..250 {
        backend.put(&ctx, Entry::new(format!("big/{i:04}"), "v")).await.expect("put");
    }

    let mut total = 0;
    let mut pages = 0;
    let mut after = Bytes::new();
    loop {
        let page = backend.list_page(&ctx, b"big/", &after, 64).await.expect("list_page");
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 64);
        total += page.len();
        pages += 1;
        after = page.last().cloned().expect("non-empty page");
    }
    assert_eq!(total, 250);
    assert_eq!(pages, 4);
}

// ============================================================================
// Through the key-validating decorator
// ============================================================================

/// Listing prefixes are not validated, so a listing with a non-printable
/// prefix still succeeds (and is empty).
#[tokio::test]
async fn encoded_listing_does_not_validate_prefix() {
    let backend = EncodedBackend::new(tree_backend().await);
    let ctx = Context::background();

    assert!(backend.list(&ctx, b"\x00bad/").await.expect("list").is_empty());
    assert_eq!(strings(backend.list(&ctx, b"app/db/").await.expect("list")), ["primary", "replica/"]);
}

/// Unicode keys that pass validation list like any other.
#[tokio::test]
async fn encoded_unicode_keys_list_in_byte_order() {
    let backend = EncodedBackend::new(MemoryBackend::new());
    let ctx = Context::background();
    for key in ["u/日本/語", "u/ünïcödé", "u/emoji-🔑"] {
        backend.put(&ctx, Entry::new(key, "v")).await.expect("printable key accepted");
    }
    let listed = strings(backend.list(&ctx, b"u/").await.expect("list"));
    assert_eq!(listed, ["emoji-🔑", "ünïcödé", "日本/"]);
}
