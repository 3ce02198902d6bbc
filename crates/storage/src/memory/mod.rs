//! In-memory storage backend.
//!
//! [`MemoryBackend`] is the reference implementation of [`Backend`]: an
//! ordered [`KeyIndex`] behind one async read/write lock, gated by a
//! [`PermitPool`]. Writes and deletes take the write lock; reads and listings
//! take the read lock.
//!
//! # Operation order
//!
//! Every operation runs the same steps, and fails at the first one that does
//! not pass:
//!
//! 1. failure-injection flag for the operation kind
//! 2. caller's [`Context`]
//! 3. value size (`put` only)
//! 4. permit from the pool (cancellable)
//! 5. read or write lock (cancellable)
//!
//! Nothing is mutated before step 5 succeeds, so a rejected or cancelled
//! operation leaves the index untouched.
//!
//! # Failure injection
//!
//! Test harnesses flip per-operation switches with [`fail_get`],
//! [`fail_put`], [`fail_delete`], [`fail_list`], and [`fail_get_in_txn`].
//! A flipped switch makes that operation kind fail with
//! [`StorageError::OperationDisabled`] without touching the pool or the lock.
//! Operations already in flight when a switch flips may observe either value.
//!
//! [`fail_get`]: MemoryBackend::fail_get
//! [`fail_put`]: MemoryBackend::fail_put
//! [`fail_delete`]: MemoryBackend::fail_delete
//! [`fail_list`]: MemoryBackend::fail_list
//! [`fail_get_in_txn`]: MemoryBackend::fail_get_in_txn
//!
//! # Example
//!
//! ```
//! use bastion_storage::{Backend, Context, Entry, MemoryBackend, StorageError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! let ctx = Context::background();
//!
//! backend.fail_put(true);
//! let err = backend.put(&ctx, Entry::new("core/keyring", "k")).await.unwrap_err();
//! assert!(matches!(err, StorageError::OperationDisabled { .. }));
//!
//! backend.fail_put(false);
//! backend.put(&ctx, Entry::new("core/keyring", "k")).await.unwrap();
//! # });
//! ```

mod ha;
mod transaction;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

pub use self::ha::{MemoryHaBackend, MemoryLock};
pub use self::transaction::MemoryTransaction;
use crate::{
    Context,
    backend::Backend,
    config::MemoryBackendConfig,
    error::{Operation, StorageError, StorageResult},
    index::KeyIndex,
    permit_pool::{Permit, PermitPool},
    transaction::{Transaction, Transactional},
    types::{Entry, display_key},
};

/// Per-operation failure-injection switches.
#[derive(Debug, Default)]
struct FailureFlags {
    flags: [AtomicBool; Operation::ALL.len()],
}

impl FailureFlags {
    fn slot(operation: Operation) -> usize {
        match operation {
            Operation::Get => 0,
            Operation::Put => 1,
            Operation::Delete => 2,
            Operation::List => 3,
            Operation::GetInTxn => 4,
        }
    }

    fn set(&self, operation: Operation, fail: bool) {
        self.flags[Self::slot(operation)].store(fail, Ordering::SeqCst);
    }

    fn is_set(&self, operation: Operation) -> bool {
        self.flags[Self::slot(operation)].load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Shared {
    index: RwLock<KeyIndex>,
    permits: PermitPool,
    failures: FailureFlags,
    max_value_size: usize,
    log_ops: bool,
    claims: ha::Claims,
}

/// In-memory storage backend.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same index, permit pool, and failure switches.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Shared>,
}

impl MemoryBackend {
    /// Creates an empty backend with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryBackendConfig::default())
    }

    /// Creates an empty backend with the given configuration.
    #[must_use]
    pub fn with_config(config: MemoryBackendConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                index: RwLock::new(KeyIndex::new()),
                permits: PermitPool::new(config.parallel_operations()),
                failures: FailureFlags::default(),
                max_value_size: config.max_value_size(),
                log_ops: config.log_ops(),
                claims: ha::Claims::default(),
            }),
        }
    }

    /// Makes every `get` fail (or succeed again).
    pub fn fail_get(&self, fail: bool) {
        self.inner.failures.set(Operation::Get, fail);
    }

    /// Makes every `put` fail (or succeed again).
    pub fn fail_put(&self, fail: bool) {
        self.inner.failures.set(Operation::Put, fail);
    }

    /// Makes every `delete` fail (or succeed again).
    pub fn fail_delete(&self, fail: bool) {
        self.inner.failures.set(Operation::Delete, fail);
    }

    /// Makes every `list` and `list_page` fail (or succeed again).
    pub fn fail_list(&self, fail: bool) {
        self.inner.failures.set(Operation::List, fail);
    }

    /// Makes every `get` issued inside a transaction fail (or succeed again).
    pub fn fail_get_in_txn(&self, fail: bool) {
        self.inner.failures.set(Operation::GetInTxn, fail);
    }

    /// Flips the failure switch for `operation`.
    pub fn set_failure(&self, operation: Operation, fail: bool) {
        self.inner.failures.set(operation, fail);
    }

    /// Stores `entry` only if its key is absent.
    ///
    /// Returns `true` when the entry was written. The check and the write
    /// happen under one write lock.
    #[tracing::instrument(skip(self, ctx, entry), fields(key = %display_key(&entry.key)))]
    pub async fn put_if_absent(&self, ctx: &Context, entry: Entry) -> StorageResult<bool> {
        self.ensure_enabled(Operation::Put)?;
        ctx.check()?;
        self.check_value_size(entry.value.len())?;
        let _permit = self.acquire(ctx).await?;
        let mut index = self.write_index(ctx).await?;

        if index.contains_key(&entry.key) {
            return Ok(false);
        }
        self.log_op(Operation::Put, &entry.key);
        index.insert(entry.key, entry.value);
        Ok(true)
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.inner.index.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.index.read().await.is_empty()
    }

    /// The pool gating this backend's operations.
    #[must_use]
    pub fn permit_pool(&self) -> &PermitPool {
        &self.inner.permits
    }

    /// Largest accepted value in bytes; `0` means unlimited.
    #[must_use]
    pub fn max_value_size(&self) -> usize {
        self.inner.max_value_size
    }

    pub(crate) fn ensure_enabled(&self, operation: Operation) -> StorageResult<()> {
        if self.inner.failures.is_set(operation) {
            return Err(StorageError::disabled(operation));
        }
        Ok(())
    }

    pub(crate) fn check_value_size(&self, size: usize) -> StorageResult<()> {
        let limit = self.inner.max_value_size;
        if limit > 0 && size > limit {
            return Err(StorageError::value_too_large(size, limit));
        }
        Ok(())
    }

    pub(crate) async fn acquire(&self, ctx: &Context) -> StorageResult<Permit<'_>> {
        self.inner.permits.acquire(ctx).await
    }

    pub(crate) async fn read_index(
        &self,
        ctx: &Context,
    ) -> StorageResult<RwLockReadGuard<'_, KeyIndex>> {
        ctx.run(self.inner.index.read()).await
    }

    pub(crate) async fn write_index(
        &self,
        ctx: &Context,
    ) -> StorageResult<RwLockWriteGuard<'_, KeyIndex>> {
        ctx.run(self.inner.index.write()).await
    }

    pub(crate) fn log_op(&self, operation: Operation, key: &[u8]) {
        if self.inner.log_ops {
            trace!(operation = %operation, key = %display_key(key), "inmem operation");
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    #[tracing::instrument(skip(self, ctx, entry), fields(key = %display_key(&entry.key), size = entry.value.len()))]
    async fn put(&self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        self.ensure_enabled(Operation::Put)?;
        ctx.check()?;
        self.check_value_size(entry.value.len())?;
        let _permit = self.acquire(ctx).await?;
        let mut index = self.write_index(ctx).await?;

        self.log_op(Operation::Put, &entry.key);
        self.revoke_stale_claim(&entry.key, Some(&entry.value));
        index.insert(entry.key, entry.value);
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx), fields(key = %display_key(key)))]
    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        self.ensure_enabled(Operation::Get)?;
        ctx.check()?;
        let _permit = self.acquire(ctx).await?;
        let index = self.read_index(ctx).await?;

        self.log_op(Operation::Get, key);
        Ok(index.get(key).map(|value| Entry::new(Bytes::copy_from_slice(key), value.clone())))
    }

    #[tracing::instrument(skip(self, ctx), fields(key = %display_key(key)))]
    async fn delete(&self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        self.ensure_enabled(Operation::Delete)?;
        ctx.check()?;
        let _permit = self.acquire(ctx).await?;
        let mut index = self.write_index(ctx).await?;

        self.log_op(Operation::Delete, key);
        self.revoke_stale_claim(key, None);
        index.remove(key);
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx), fields(prefix = %display_key(prefix), after = %display_key(after)))]
    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        self.ensure_enabled(Operation::List)?;
        ctx.check()?;
        let _permit = self.acquire(ctx).await?;
        let index = self.read_index(ctx).await?;

        self.log_op(Operation::List, prefix);
        Ok(index.list(prefix, after, limit))
    }

    fn as_transactional(&self) -> Option<&dyn Transactional> {
        Some(self)
    }
}

#[async_trait]
impl Transactional for MemoryBackend {
    #[tracing::instrument(skip(self, ctx))]
    async fn begin_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>> {
        ctx.check()?;
        Ok(Box::new(MemoryTransaction::new(self.clone(), false)))
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn begin_read_only_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>> {
        ctx.check()?;
        Ok(Box::new(MemoryTransaction::new(self.clone(), true)))
    }
}
