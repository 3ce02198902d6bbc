//! Transaction traits for atomic multi-key updates.
//!
//! Backends that support transactions implement [`Transactional`] and
//! advertise it through [`Backend::as_transactional`](crate::Backend::as_transactional).
//!
//! # Transaction Semantics
//!
//! - **Atomicity**: buffered writes become visible all at once on [`commit`](Transaction::commit),
//!   or not at all.
//! - **Read-your-writes**: reads and listings inside the transaction see its own buffered writes.
//! - **Read-only transactions** reject writes with
//!   [`ReadOnlyTransaction`](crate::StorageError::ReadOnlyTransaction).
//!
//! # Example
//!
//! ```
//! use bastion_storage::{Backend, Context, Entry, MemoryBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! let ctx = Context::background();
//! let txn_backend = backend.as_transactional().unwrap();
//!
//! let mut txn = txn_backend.begin_tx(&ctx).await.unwrap();
//! txn.put(&ctx, Entry::new("auth/token/accessor", "a1")).await.unwrap();
//! txn.put(&ctx, Entry::new("auth/token/id", "t1")).await.unwrap();
//! assert!(backend.get(&ctx, b"auth/token/id").await.unwrap().is_none());
//!
//! txn.commit(&ctx).await.unwrap();
//! assert!(backend.get(&ctx, b"auth/token/id").await.unwrap().is_some());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::{Context, error::StorageResult, types::Entry};

/// Capability of backends that can open transactions.
#[async_trait]
pub trait Transactional: Send + Sync {
    /// Opens a read-write transaction.
    async fn begin_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>>;

    /// Opens a transaction that rejects writes.
    async fn begin_read_only_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>>;
}

/// Handle for one open transaction.
///
/// Dropping a transaction without committing discards its writes, exactly
/// like [`rollback`](Transaction::rollback).
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Buffers an insert or overwrite.
    async fn put(&mut self, ctx: &Context, entry: Entry) -> StorageResult<()>;

    /// Reads a key, seeing this transaction's buffered writes first.
    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>>;

    /// Buffers a removal.
    async fn delete(&mut self, ctx: &Context, key: &[u8]) -> StorageResult<()>;

    /// Lists the children of `prefix` as they would be after commit.
    async fn list(&self, ctx: &Context, prefix: &[u8]) -> StorageResult<Vec<Bytes>> {
        self.list_page(ctx, prefix, b"", 0).await
    }

    /// Paginated form of [`list`](Transaction::list); same cursor rules as
    /// [`Backend::list_page`](crate::Backend::list_page).
    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>>;

    /// Applies every buffered write atomically and consumes the transaction.
    async fn commit(self: Box<Self>, ctx: &Context) -> StorageResult<()>;

    /// Discards every buffered write and consumes the transaction.
    async fn rollback(self: Box<Self>, ctx: &Context) -> StorageResult<()>;
}
