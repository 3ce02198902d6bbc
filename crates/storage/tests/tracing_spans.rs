//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on in-memory backend operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use bastion_storage::{Backend, Context, Entry, MemoryBackend, MemoryHaBackend};
use tokio_util::sync::CancellationToken;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer, records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn assert_span(spans: &Arc<Mutex<Vec<String>>>, name: &str) {
    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_put_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.put(&Context::background(), Entry::new("key-1", "value-1")).await.expect("put should succeed");

    assert_span(&spans, "put");
}

#[tokio::test]
async fn memory_backend_get_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    let _ = backend.get(&Context::background(), b"missing").await;

    assert_span(&spans, "get");
}

#[tokio::test]
async fn memory_backend_delete_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.delete(&Context::background(), b"key").await.expect("delete should succeed");

    assert_span(&spans, "delete");
}

#[tokio::test]
async fn memory_backend_list_creates_list_page_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.list(&Context::background(), b"prefix/").await.expect("list should succeed");

    assert_span(&spans, "list_page");
}

#[tokio::test]
async fn memory_backend_put_if_absent_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    let claimed = backend
        .put_if_absent(&Context::background(), Entry::new("claim", "me"))
        .await
        .expect("put_if_absent should succeed");
    assert!(claimed);

    assert_span(&spans, "put_if_absent");
}

#[tokio::test]
async fn memory_transaction_creates_begin_and_commit_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    let ctx = Context::background();
    let txn_backend = backend.as_transactional().expect("transactional");
    let mut txn = txn_backend.begin_tx(&ctx).await.expect("begin should succeed");
    txn.put(&ctx, Entry::new("k", "v")).await.expect("txn put should succeed");
    txn.commit(&ctx).await.expect("commit should succeed");

    assert_span(&spans, "begin_tx");
    assert_span(&spans, "commit");
}

#[tokio::test]
async fn memory_lock_creates_lock_and_unlock_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryHaBackend::new();
    let ha = backend.as_ha().expect("ha");
    let lock = ha.lock_with("core/leader", "node-1").expect("lock_with should succeed");
    lock.lock(&CancellationToken::new()).await.expect("lock should succeed").expect("acquired");
    lock.unlock().await.expect("unlock should succeed");

    assert_span(&spans, "lock");
    assert_span(&spans, "unlock");
}
