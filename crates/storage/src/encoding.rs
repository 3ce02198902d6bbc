//! Key validation decorator.
//!
//! [`EncodedBackend`] wraps any [`Backend`] and rejects keys that are not
//! printable UTF-8 before a `put` or `delete` reaches the medium. Reads and
//! listings pass through untouched, so data written before the guard was
//! installed stays reachable.
//!
//! A character is printable when its Unicode general category is a letter,
//! mark, number, punctuation or symbol, or when it is the ASCII space.
//! Control, format, private-use and unassigned code points are rejected, as is
//! every separator other than the space.
//!
//! Capabilities of the wrapped backend are forwarded:
//!
//! - HA locking is passed through unchanged.
//! - Purging is advertised only when the wrapped backend supports it.
//! - Transactions are wrapped so their writes are validated the same way.
//!
//! # Example
//!
//! ```
//! use bastion_storage::{Backend, Context, EncodedBackend, Entry, MemoryBackend, StorageError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = EncodedBackend::new(MemoryBackend::new());
//! let ctx = Context::background();
//!
//! backend.put(&ctx, Entry::new("sys/mounts", "{}")).await.unwrap();
//! let err = backend.put(&ctx, Entry::new("sys/\u{200b}mounts", "{}")).await.unwrap_err();
//! assert!(matches!(err, StorageError::NonPrintable));
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use unicode_general_category::{GeneralCategory, get_general_category};

use crate::{
    Context,
    backend::{Backend, Purgeable},
    error::{StorageError, StorageResult},
    ha::HaBackend,
    transaction::{Transaction, Transactional},
    types::Entry,
};

/// Checks that `key` is valid UTF-8 made only of printable characters.
///
/// # Errors
///
/// - [`StorageError::NonUtf8`] when the bytes are not UTF-8.
/// - [`StorageError::NonPrintable`] when any character fails [`is_printable`].
pub fn validate_key(key: &[u8]) -> StorageResult<&str> {
    let key = std::str::from_utf8(key).map_err(|_| StorageError::NonUtf8)?;
    if key.chars().all(is_printable) {
        Ok(key)
    } else {
        Err(StorageError::NonPrintable)
    }
}

/// Reports whether `c` may appear in a stored key.
///
/// Letters, marks, numbers, punctuation and symbols are printable, as is the
/// ASCII space. Everything in the other (`C*`) and separator (`Z*`) general
/// categories is not, which includes unassigned code points.
#[must_use]
pub fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !matches!(
        get_general_category(c),
        GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Surrogate
            | GeneralCategory::PrivateUse
            | GeneralCategory::Unassigned
            | GeneralCategory::SpaceSeparator
            | GeneralCategory::LineSeparator
            | GeneralCategory::ParagraphSeparator
    )
}

/// Backend decorator that validates keys on writes.
///
/// Wrapping an already wrapped backend behaves exactly like a single guard.
#[derive(Debug, Clone, Default)]
pub struct EncodedBackend<B> {
    inner: B,
}

impl<B: Backend> EncodedBackend<B> {
    /// Wraps `inner`.
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Unwraps the guard.
    pub fn into_inner(self) -> B {
        self.inner
    }
}

#[async_trait]
impl<B: Backend> Backend for EncodedBackend<B> {
    async fn put(&self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        validate_key(&entry.key)?;
        self.inner.put(ctx, entry).await
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        self.inner.get(ctx, key).await
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.inner.delete(ctx, key).await
    }

    async fn list(&self, ctx: &Context, prefix: &[u8]) -> StorageResult<Vec<Bytes>> {
        self.inner.list(ctx, prefix).await
    }

    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        self.inner.list_page(ctx, prefix, after, limit).await
    }

    fn as_ha(&self) -> Option<&dyn HaBackend> {
        self.inner.as_ha()
    }

    fn as_purgeable(&self) -> Option<&dyn Purgeable> {
        self.inner.as_purgeable().map(|_| self as &dyn Purgeable)
    }

    fn as_transactional(&self) -> Option<&dyn Transactional> {
        self.inner.as_transactional().map(|_| self as &dyn Transactional)
    }
}

impl<B: Backend> Purgeable for EncodedBackend<B> {
    fn purge(&self) {
        if let Some(purgeable) = self.inner.as_purgeable() {
            purgeable.purge();
        }
    }

    fn set_enabled(&self, enabled: bool) {
        if let Some(purgeable) = self.inner.as_purgeable() {
            purgeable.set_enabled(enabled);
        }
    }
}

#[async_trait]
impl<B: Backend> Transactional for EncodedBackend<B> {
    async fn begin_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>> {
        let inner = self.transactional()?.begin_tx(ctx).await?;
        Ok(Box::new(EncodedTransaction { inner }))
    }

    async fn begin_read_only_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>> {
        let inner = self.transactional()?.begin_read_only_tx(ctx).await?;
        Ok(Box::new(EncodedTransaction { inner }))
    }
}

impl<B: Backend> EncodedBackend<B> {
    fn transactional(&self) -> StorageResult<&dyn Transactional> {
        self.inner
            .as_transactional()
            .ok_or_else(|| StorageError::internal("wrapped backend does not support transactions"))
    }
}

/// Transaction opened through an [`EncodedBackend`].
struct EncodedTransaction {
    inner: Box<dyn Transaction>,
}

#[async_trait]
impl Transaction for EncodedTransaction {
    async fn put(&mut self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        validate_key(&entry.key)?;
        self.inner.put(ctx, entry).await
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        self.inner.get(ctx, key).await
    }

    async fn delete(&mut self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.inner.delete(ctx, key).await
    }

    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        self.inner.list_page(ctx, prefix, after, limit).await
    }

    async fn commit(self: Box<Self>, ctx: &Context) -> StorageResult<()> {
        self.inner.commit(ctx).await
    }

    async fn rollback(self: Box<Self>, ctx: &Context) -> StorageResult<()> {
        self.inner.rollback(ctx).await
    }
}
