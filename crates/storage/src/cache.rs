//! Read-through cache wrapper for storage backends.
//!
//! [`CachedBackend`] wraps any [`Backend`] and adds a read-through cache
//! using [`moka`]. On reads, the cache is checked first; on writes, the
//! corresponding cache entry is invalidated before and after the write is
//! delegated.
//!
//! # Design
//!
//! - **Cache-aside pattern**: `get` checks cache → miss → fetch from inner → populate cache. Both
//!   present and absent keys are cached (`Option<Bytes>`). Failed reads are never cached, and a
//!   miss that overlapped a write does not populate.
//! - **Listing bypass**: `list` and `list_page` always go to the inner backend.
//! - **Transactions**: run against the inner backend; every key a transaction wrote is invalidated
//!   when it commits.
//! - **Toggleable**: implements [`Purgeable`]. Disabling the cache drops its contents and sends
//!   every read to the inner backend until it is enabled again.
//!
//! # Usage
//!
//! ```
//! # use bastion_storage::{Backend, CacheConfig, CachedBackend, Context, Entry, MemoryBackend};
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = CacheConfig::builder().max_entries(10_000).build().unwrap();
//! let cached = CachedBackend::new(MemoryBackend::new(), config);
//! let ctx = Context::background();
//!
//! cached.put(&ctx, Entry::new("core/mounts", "{}")).await.unwrap();
//! let _ = cached.get(&ctx, b"core/mounts").await.unwrap(); // populates cache
//! let _ = cached.get(&ctx, b"core/mounts").await.unwrap(); // served from cache
//! # });
//! ```

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::{
    Context,
    backend::{Backend, Purgeable},
    error::{ConfigError, StorageError, StorageResult},
    ha::HaBackend,
    transaction::{Transaction, Transactional},
    types::Entry,
};

// ───────────────────────────────────────────────────────────────────────────
// CacheConfig
// ───────────────────────────────────────────────────────────────────────────

/// Sizing and expiry for a [`CachedBackend`].
///
/// Defaults hold 10 000 entries for 60 seconds. A cached absence counts
/// against `max_entries` like a cached value. The TTL bounds how long a value
/// written behind the cache's back (straight to the wrapped backend) can be
/// served.
///
/// ```
/// # use std::time::Duration;
/// # use bastion_storage::CacheConfig;
/// let config = CacheConfig::builder().max_entries(512).ttl(Duration::from_secs(5)).build().unwrap();
/// assert_eq!(config.max_entries(), 512);
/// assert!(!CacheConfig::disabled().enabled());
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    max_entries: u64,
    ttl: Duration,
    enabled: bool,
}

impl CacheConfig {
    const DEFAULT_MAX_ENTRIES: u64 = 10_000;
    const DEFAULT_TTL: Duration = Duration::from_secs(60);
    const MIN_TTL: Duration = Duration::from_secs(1);

    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder { max_entries: Self::DEFAULT_MAX_ENTRIES, ttl: Self::DEFAULT_TTL }
    }

    /// A configuration under which [`CachedBackend`] never allocates a cache
    /// and cannot be switched on later.
    pub fn disabled() -> Self {
        Self { max_entries: 0, ttl: Duration::ZERO, enabled: false }
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: Self::DEFAULT_MAX_ENTRIES, ttl: Self::DEFAULT_TTL, enabled: true }
    }
}

#[derive(Debug)]
pub struct CacheConfigBuilder {
    max_entries: u64,
    ttl: Duration,
}

impl CacheConfigBuilder {
    pub fn max_entries(self, max_entries: u64) -> Self {
        Self { max_entries, ..self }
    }

    pub fn ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// # Errors
    ///
    /// [`ConfigError::BelowMinimum`] for a zero `max_entries` or a TTL under
    /// one second.
    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        let Self { max_entries, ttl } = self;
        if max_entries == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_entries",
                value: max_entries.to_string(),
                min: "1".to_owned(),
            });
        }
        if ttl < CacheConfig::MIN_TTL {
            return Err(ConfigError::BelowMinimum {
                field: "ttl",
                value: format!("{}ms", ttl.as_millis()),
                min: "1s".to_owned(),
            });
        }
        Ok(CacheConfig { max_entries, ttl, enabled: true })
    }
}

// ───────────────────────────────────────────────────────────────────────────
// CachedBackend
// ───────────────────────────────────────────────────────────────────────────

/// Cached entries plus a write generation.
///
/// Every completed write bumps the generation and invalidates its keys while
/// holding the generation exclusively. A miss records the generation before
/// reading the wrapped backend and only populates the cache if it is
/// unchanged, so a read that raced a write never reinstates the old value.
struct CacheState {
    entries: Cache<Bytes, Option<Bytes>>,
    generation: RwLock<u64>,
}

impl CacheState {
    fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Cache::builder().max_capacity(config.max_entries).time_to_live(config.ttl).build(),
            generation: RwLock::new(0),
        }
    }

    async fn generation(&self) -> u64 {
        *self.generation.read().await
    }

    async fn populate(&self, seen: u64, key: &[u8], value: Option<Bytes>) -> bool {
        let generation = self.generation.read().await;
        if *generation != seen {
            return false;
        }
        self.entries.insert(Bytes::copy_from_slice(key), value).await;
        true
    }

    async fn written<K: AsRef<[u8]>>(&self, keys: impl IntoIterator<Item = K>) {
        let mut generation = self.generation.write().await;
        *generation = generation.wrapping_add(1);
        for key in keys {
            self.entries.invalidate(key.as_ref()).await;
        }
    }
}

/// A read-through caching wrapper around any [`Backend`].
///
/// Clones share the cache and the enabled switch.
#[derive(Clone)]
pub struct CachedBackend<B> {
    inner: B,
    cache: Option<Arc<CacheState>>,
    enabled: Arc<AtomicBool>,
    config: CacheConfig,
}

impl<B> std::fmt::Debug for CachedBackend<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedBackend")
            .field("config", &self.config)
            .field("enabled", &self.enabled.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<B: Backend> CachedBackend<B> {
    /// Creates a new cached backend.
    ///
    /// If `config` was created with [`CacheConfig::disabled()`], no cache is
    /// allocated and all operations pass through directly.
    pub fn new(inner: B, config: CacheConfig) -> Self {
        let cache = config.enabled.then(|| Arc::new(CacheState::new(&config)));
        Self { inner, cache, enabled: Arc::new(AtomicBool::new(config.enabled)), config }
    }

    /// Returns a reference to the inner backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Returns whether reads are currently served from the cache.
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some() && self.enabled.load(Ordering::SeqCst)
    }

    /// Returns cache statistics: `(current_entries, max_entries)`.
    pub async fn cache_stats(&self) -> (u64, u64) {
        let count = match &self.cache {
            Some(cache) => {
                cache.entries.run_pending_tasks().await;
                cache.entries.entry_count()
            },
            None => 0,
        };
        (count, self.config.max_entries)
    }

    fn active_cache(&self) -> Option<&CacheState> {
        self.cache.as_deref().filter(|_| self.enabled.load(Ordering::SeqCst))
    }

    async fn write_through<F>(&self, key: &[u8], write: F) -> StorageResult<()>
    where
        F: Future<Output = StorageResult<()>> + Send,
    {
        if let Some(cache) = &self.cache {
            cache.entries.invalidate(key).await;
        }
        let result = write.await;
        if let Some(cache) = &self.cache {
            cache.written([key]).await;
        }
        result
    }
}

#[async_trait]
impl<B: Backend> Backend for CachedBackend<B> {
    async fn put(&self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        let key = entry.key.clone();
        self.write_through(&key, self.inner.put(ctx, entry)).await
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        ctx.check()?;
        let Some(cache) = self.active_cache() else {
            return self.inner.get(ctx, key).await;
        };

        if let Some(cached) = cache.entries.get(key).await {
            trace!(key_len = key.len(), "cache hit");
            return Ok(cached.map(|value| Entry::new(Bytes::copy_from_slice(key), value)));
        }

        let seen = cache.generation().await;
        let entry = self.inner.get(ctx, key).await?;
        if cache.populate(seen, key, entry.as_ref().map(|e| e.value.clone())).await {
            trace!(key_len = key.len(), "cache miss, populated");
        } else {
            trace!(key_len = key.len(), "cache miss, write raced the read");
        }
        Ok(entry)
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        self.write_through(key, self.inner.delete(ctx, key)).await
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
        Some(self)
    }

    fn as_transactional(&self) -> Option<&dyn Transactional> {
        self.inner.as_transactional().map(|_| self as &dyn Transactional)
    }
}

impl<B: Backend> Purgeable for CachedBackend<B> {
    fn purge(&self) {
        if let Some(cache) = &self.cache {
            cache.entries.invalidate_all();
            debug!("cache purged");
        }
    }

    fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was && !enabled {
            self.purge();
        }
    }
}

#[async_trait]
impl<B: Backend> Transactional for CachedBackend<B> {
    async fn begin_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>> {
        let inner = self.transactional()?.begin_tx(ctx).await?;
        Ok(Box::new(CachedTransaction { inner, cache: self.cache.clone(), written: BTreeSet::new() }))
    }

    async fn begin_read_only_tx(&self, ctx: &Context) -> StorageResult<Box<dyn Transaction>> {
        self.transactional()?.begin_read_only_tx(ctx).await
    }
}

impl<B: Backend> CachedBackend<B> {
    fn transactional(&self) -> StorageResult<&dyn Transactional> {
        self.inner
            .as_transactional()
            .ok_or_else(|| StorageError::internal("wrapped backend does not support transactions"))
    }
}

/// Transaction that invalidates the keys it wrote once it commits.
struct CachedTransaction {
    inner: Box<dyn Transaction>,
    cache: Option<Arc<CacheState>>,
    written: BTreeSet<Bytes>,
}

#[async_trait]
impl Transaction for CachedTransaction {
    async fn put(&mut self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        let key = entry.key.clone();
        self.inner.put(ctx, entry).await?;
        self.written.insert(key);
        Ok(())
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        self.inner.get(ctx, key).await
    }

    async fn delete(&mut self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        self.inner.delete(ctx, key).await?;
        self.written.insert(Bytes::copy_from_slice(key));
        Ok(())
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
        let Self { inner, cache, written } = *self;
        let result = inner.commit(ctx).await;
        if let Some(cache) = cache {
            cache.written(&written).await;
        }
        result
    }

    async fn rollback(self: Box<Self>, ctx: &Context) -> StorageResult<()> {
        self.inner.rollback(ctx).await
    }
}
