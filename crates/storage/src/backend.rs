//! Storage backend trait definition.
//!
//! [`Backend`] is the uniform key-value contract every storage medium
//! satisfies. Callers program against it exclusively; nothing above this
//! crate reaches into a concrete backend's index.
//!
//! # Design Philosophy
//!
//! - **Keys are byte strings, values are opaque**: keys are `/`-separated paths compared byte-wise;
//!   the [encoding guard](crate::encoding) restricts what may be written.
//! - **Every call carries a [`Context`]**: operations fail fast when it is already done and give up
//!   promptly when it finishes while they wait.
//! - **Missing is not an error**: [`get`](Backend::get) returns `Ok(None)`.
//! - **Optional capabilities are queried, not assumed**: HA locking, cache purging, and
//!   transactions live in separate traits ([`HaBackend`], [`Purgeable`], [`Transactional`]) that a
//!   backend opts into by overriding the matching `as_*` method. Decorators forward those queries
//!   to whatever they wrap.
//!
//! # Implementing a Backend
//!
//! 1. Implement [`Backend`].
//! 2. Override the `as_*` methods for each capability the medium supports.
//! 3. Map medium failures to [`StorageError::Backend`](crate::StorageError::Backend).
//! 4. Run the [`conformance`](crate::conformance) suite against it.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{Context, error::StorageResult, ha::HaBackend, transaction::Transactional, types::Entry};

/// Abstract storage backend.
///
/// Backends are `Send + Sync` and safe to call from any number of tasks.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`put`](Backend::put) | Insert or overwrite an entry |
/// | [`get`](Backend::get) | Fetch an entry, `None` if absent |
/// | [`delete`](Backend::delete) | Remove a key; absent keys are a no-op |
/// | [`list`](Backend::list) | Immediate children under a prefix |
/// | [`list_page`](Backend::list_page) | One page of [`list`](Backend::list) after a cursor |
///
/// # Example
///
/// ```
/// use bastion_storage::{Backend, Context, Entry, MemoryBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
/// let ctx = Context::background();
///
/// backend.put(&ctx, Entry::new("secret/app/db", "hunter2")).await.unwrap();
/// let entry = backend.get(&ctx, b"secret/app/db").await.unwrap().unwrap();
/// assert_eq!(entry.value, "hunter2");
///
/// assert_eq!(backend.list(&ctx, b"secret/").await.unwrap(), vec!["app/"]);
/// # });
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Inserts or overwrites `entry`.
    ///
    /// Once this returns `Ok`, any later [`get`](Backend::get) of the same
    /// key observes the new value.
    ///
    /// # Errors
    ///
    /// - [`ValueTooLarge`](crate::StorageError::ValueTooLarge) when the value exceeds the
    ///   configured maximum; the stored state is unchanged.
    /// - [`OperationDisabled`](crate::StorageError::OperationDisabled) under failure injection.
    /// - [`Cancelled`](crate::StorageError::Cancelled) / [`Timeout`](crate::StorageError::Timeout)
    ///   when `ctx` is done.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put(&self, ctx: &Context, entry: Entry) -> StorageResult<()>;

    /// Fetches the entry stored at `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>>;

    /// Removes `key`. Deleting an absent key succeeds.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, ctx: &Context, key: &[u8]) -> StorageResult<()>;

    /// Lists the immediate children of `prefix`.
    ///
    /// Leaf keys are returned as-is (with `prefix` stripped); deeper keys
    /// collapse to one `/`-terminated folder marker per subdirectory. The
    /// result is sorted and contains no duplicates.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list(&self, ctx: &Context, prefix: &[u8]) -> StorageResult<Vec<Bytes>> {
        self.list_page(ctx, prefix, b"", 0).await
    }

    /// Lists one page of the children of `prefix`.
    ///
    /// Returns only children strictly greater than `after` (an empty cursor
    /// starts at the beginning), at most `limit` of them; `limit == 0` means
    /// unlimited. Feeding the last returned child back as `after` walks the
    /// full listing exactly once.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>>;

    /// Returns the HA capability if this backend can coordinate leadership.
    fn as_ha(&self) -> Option<&dyn HaBackend> {
        None
    }

    /// Returns the purge capability if this backend layers a cache.
    fn as_purgeable(&self) -> Option<&dyn Purgeable> {
        None
    }

    /// Returns the transaction capability if this backend supports it.
    fn as_transactional(&self) -> Option<&dyn Transactional> {
        None
    }
}

/// Capability of backends that keep cached state on top of another backend.
pub trait Purgeable: Send + Sync {
    /// Evicts all cached state.
    fn purge(&self);

    /// Turns caching on or off. Turning it off also drops cached state.
    fn set_enabled(&self, enabled: bool);
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    async fn put(&self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        (**self).put(ctx, entry).await
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        (**self).get(ctx, key).await
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        (**self).delete(ctx, key).await
    }

    async fn list(&self, ctx: &Context, prefix: &[u8]) -> StorageResult<Vec<Bytes>> {
        (**self).list(ctx, prefix).await
    }

    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        (**self).list_page(ctx, prefix, after, limit).await
    }

    fn as_ha(&self) -> Option<&dyn HaBackend> {
        (**self).as_ha()
    }

    fn as_purgeable(&self) -> Option<&dyn Purgeable> {
        (**self).as_purgeable()
    }

    fn as_transactional(&self) -> Option<&dyn Transactional> {
        (**self).as_transactional()
    }
}
