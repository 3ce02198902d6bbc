//! HA lock for the in-memory backend.
//!
//! A lock claim is an entry at the lock key, written only if the key is
//! absent. Whoever wrote the entry holds the lock; other candidates see the
//! holder's value with a plain `get`. The backend also records each live
//! claim next to its index, so any write that removes a claim or replaces its
//! value (a plain `put` or `delete`, or a committed transaction) revokes the
//! holder: its leader token is cancelled before another candidate can claim
//! the key. Releasing the lock removes the entry only if this holder's claim
//! is still live, then wakes every waiting candidate. Waiters also retry on a
//! short interval.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, futures::Notified};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::MemoryBackend;
use crate::{
    Context,
    backend::Backend,
    config::MemoryBackendConfig,
    error::{Operation, StorageError, StorageResult},
    ha::{HaBackend, Lock},
    transaction::Transactional,
    types::{Entry, display_key},
};

/// How long a waiting candidate sleeps before re-checking the claim.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Claim {
    id: u64,
    value: Bytes,
    leader: CancellationToken,
}

/// Live lock claims, keyed by lock key.
///
/// Only touched while the index write lock is held, so a claim and the entry
/// backing it always change together.
#[derive(Debug, Default)]
pub(super) struct Claims {
    held: Mutex<HashMap<Bytes, Claim>>,
    next_id: AtomicU64,
    released: Notify,
}

/// A claim as seen by the handle that won it.
#[derive(Debug)]
struct HeldClaim {
    id: u64,
    leader: CancellationToken,
}

impl MemoryBackend {
    /// Revokes the claim at `key` unless the key still stores the claimed
    /// value afterwards. Callers hold the index write lock.
    pub(super) fn revoke_stale_claim(&self, key: &[u8], stored: Option<&Bytes>) {
        let claims = &self.inner.claims;
        let revoked = {
            let mut held = claims.held.lock();
            if !held.get(key).is_some_and(|claim| stored != Some(&claim.value)) {
                return;
            }
            held.remove(key)
        };
        if let Some(claim) = revoked {
            claim.leader.cancel();
            warn!(key = %display_key(key), "lock claim overwritten, leader revoked");
            claims.released.notify_waiters();
        }
    }

    async fn claim_lock(&self, ctx: &Context, key: &str, value: &str) -> StorageResult<Option<HeldClaim>> {
        self.ensure_enabled(Operation::Put)?;
        ctx.check()?;
        self.check_value_size(value.len())?;
        let _permit = self.acquire(ctx).await?;
        let mut index = self.write_index(ctx).await?;

        if index.contains_key(key.as_bytes()) {
            return Ok(None);
        }
        self.log_op(Operation::Put, key.as_bytes());
        let key = Bytes::copy_from_slice(key.as_bytes());
        let value = Bytes::copy_from_slice(value.as_bytes());
        index.insert(key.clone(), value.clone());

        let claims = &self.inner.claims;
        let id = claims.next_id.fetch_add(1, Ordering::Relaxed);
        let leader = CancellationToken::new();
        claims.held.lock().insert(key, Claim { id, value, leader: leader.clone() });
        Ok(Some(HeldClaim { id, leader }))
    }

    /// Removes the lock entry if claim `id` still owns it.
    async fn release_lock(&self, ctx: &Context, key: &str, id: u64) -> StorageResult<bool> {
        self.ensure_enabled(Operation::Delete)?;
        ctx.check()?;
        let _permit = self.acquire(ctx).await?;
        let mut index = self.write_index(ctx).await?;

        let released = {
            let mut held = self.inner.claims.held.lock();
            if held.get(key.as_bytes()).is_some_and(|claim| claim.id == id) {
                held.remove(key.as_bytes())
            } else {
                None
            }
        };
        let Some(claim) = released else {
            return Ok(false);
        };
        self.log_op(Operation::Delete, key.as_bytes());
        index.remove(key.as_bytes());
        drop(index);

        claim.leader.cancel();
        self.inner.claims.released.notify_waiters();
        Ok(true)
    }

    fn lock_released(&self) -> Notified<'_> {
        self.inner.claims.released.notified()
    }

    fn held_claims(&self) -> usize {
        self.inner.claims.held.lock().len()
    }
}

/// [`MemoryBackend`] with leader-election support.
///
/// All [`Backend`] calls go straight to the wrapped backend, so lock claims
/// are visible through `get` and `list` like any other key.
#[derive(Debug, Clone)]
pub struct MemoryHaBackend {
    backend: MemoryBackend,
}

impl MemoryHaBackend {
    /// Creates an empty HA backend with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryBackendConfig::default())
    }

    /// Creates an empty HA backend with the given configuration.
    #[must_use]
    pub fn with_config(config: MemoryBackendConfig) -> Self {
        Self::from_backend(MemoryBackend::with_config(config))
    }

    /// Adds lock support to an existing backend, sharing its data and its
    /// lock claims.
    #[must_use]
    pub fn from_backend(backend: MemoryBackend) -> Self {
        Self { backend }
    }

    /// The wrapped backend, for failure injection and introspection.
    #[must_use]
    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    /// Number of locks currently held in the wrapped backend.
    #[must_use]
    pub fn held_locks(&self) -> usize {
        self.backend.held_claims()
    }
}

impl Default for MemoryHaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryHaBackend {
    async fn put(&self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        self.backend.put(ctx, entry).await
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        self.backend.get(ctx, key).await
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        self.backend.delete(ctx, key).await
    }

    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        self.backend.list_page(ctx, prefix, after, limit).await
    }

    fn as_ha(&self) -> Option<&dyn HaBackend> {
        Some(self)
    }

    fn as_transactional(&self) -> Option<&dyn Transactional> {
        Some(&self.backend)
    }
}

impl HaBackend for MemoryHaBackend {
    fn ha_enabled(&self) -> bool {
        true
    }

    fn lock_with(&self, key: &str, value: &str) -> StorageResult<Box<dyn Lock>> {
        if key.is_empty() {
            return Err(StorageError::internal("lock key must not be empty"));
        }
        Ok(Box::new(MemoryLock {
            backend: self.backend.clone(),
            key: key.to_owned(),
            value: value.to_owned(),
            held: Mutex::new(None),
        }))
    }
}

/// Lock handle returned by [`MemoryHaBackend::lock_with`].
///
/// Dropping a handle that holds the lock does not release it; call
/// [`unlock`](Lock::unlock). A handle whose claim was revoked may lock again.
#[derive(Debug)]
pub struct MemoryLock {
    backend: MemoryBackend,
    key: String,
    value: String,
    held: Mutex<Option<HeldClaim>>,
}

#[async_trait]
impl Lock for MemoryLock {
    #[tracing::instrument(skip(self, stop), fields(key = %self.key))]
    async fn lock(&self, stop: &CancellationToken) -> StorageResult<Option<CancellationToken>> {
        {
            let mut held = self.held.lock();
            if held.as_ref().is_some_and(|claim| !claim.leader.is_cancelled()) {
                return Err(StorageError::LockAlreadyHeld { key: self.key.clone() });
            }
            *held = None;
        }
        let ctx = Context::from_token(stop.child_token());

        loop {
            // Register for the release signal before checking, so a release
            // between the check and the wait is not missed.
            let released = self.backend.lock_released();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.backend.claim_lock(&ctx, &self.key, &self.value).await {
                Ok(Some(claim)) => {
                    let leader = claim.leader.clone();
                    *self.held.lock() = Some(claim);
                    debug!(key = %self.key, "lock acquired");
                    return Ok(Some(leader));
                },
                Ok(None) => {},
                Err(err) if err.is_cancellation() => return Ok(None),
                Err(err) => return Err(err),
            }

            tokio::select! {
                biased;
                () = stop.cancelled() => return Ok(None),
                () = &mut released => {},
                () = tokio::time::sleep(LOCK_RETRY_INTERVAL) => {},
            }
        }
    }

    #[tracing::instrument(skip(self), fields(key = %self.key))]
    async fn unlock(&self) -> StorageResult<()> {
        let id = self.held.lock().as_ref().map(|claim| claim.id);
        let Some(id) = id else {
            return Ok(());
        };

        if !self.backend.release_lock(&Context::background(), &self.key, id).await? {
            debug!(key = %self.key, "claim already revoked");
        }
        if let Some(claim) = self.held.lock().take() {
            claim.leader.cancel();
        }
        debug!(key = %self.key, "lock released");
        Ok(())
    }

    async fn value(&self) -> StorageResult<(bool, String)> {
        let entry = self.backend.get(&Context::background(), self.key.as_bytes()).await?;
        Ok(match entry {
            Some(entry) => (true, String::from_utf8_lossy(&entry.value).into_owned()),
            None => (false, String::new()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_visible_in_storage() {
        let ha = MemoryHaBackend::new();
        let ctx = Context::background();
        let lock = ha.lock_with("core/lock", "node-a").unwrap();

        assert_eq!(lock.value().await.unwrap(), (false, String::new()));
        let leader = lock.lock(&CancellationToken::new()).await.unwrap().expect("acquired");
        assert!(!leader.is_cancelled());
        assert_eq!(lock.value().await.unwrap(), (true, "node-a".to_owned()));
        assert_eq!(ha.get(&ctx, b"core/lock").await.unwrap().unwrap().value, "node-a");
        assert_eq!(ha.held_locks(), 1);

        lock.unlock().await.unwrap();
        assert!(leader.is_cancelled());
        assert!(ha.get(&ctx, b"core/lock").await.unwrap().is_none());
        assert_eq!(ha.held_locks(), 0);
    }

    #[tokio::test]
    async fn relock_on_same_handle_is_rejected() {
        let ha = MemoryHaBackend::new();
        let lock = ha.lock_with("core/lock", "node-a").unwrap();
        let stop = CancellationToken::new();

        lock.lock(&stop).await.unwrap().expect("acquired");
        assert!(matches!(lock.lock(&stop).await, Err(StorageError::LockAlreadyHeld { .. })));
    }

    #[tokio::test]
    async fn unlock_without_holding_is_noop() {
        let ha = MemoryHaBackend::new();
        let holder = ha.lock_with("core/lock", "node-a").unwrap();
        let other = ha.lock_with("core/lock", "node-b").unwrap();

        holder.lock(&CancellationToken::new()).await.unwrap().expect("acquired");
        other.unlock().await.unwrap();
        assert_eq!(other.value().await.unwrap(), (true, "node-a".to_owned()));
    }

    #[tokio::test]
    async fn stop_aborts_waiting_candidate() {
        let ha = MemoryHaBackend::new();
        let holder = ha.lock_with("core/lock", "node-a").unwrap();
        holder.lock(&CancellationToken::new()).await.unwrap().expect("acquired");

        let waiter = ha.lock_with("core/lock", "node-b").unwrap();
        let stop = CancellationToken::new();
        let task = {
            let stop = stop.clone();
            tokio::spawn(async move { waiter.lock(&stop).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();

        assert!(task.await.unwrap().unwrap().is_none());
        assert_eq!(ha.held_locks(), 1);
    }

    #[tokio::test]
    async fn waiter_takes_over_after_release() {
        let ha = MemoryHaBackend::new();
        let holder = ha.lock_with("core/lock", "node-a").unwrap();
        holder.lock(&CancellationToken::new()).await.unwrap().expect("acquired");

        let waiter = ha.lock_with("core/lock", "node-b").unwrap();
        let task = tokio::spawn(async move {
            let leader = waiter.lock(&CancellationToken::new()).await;
            (waiter, leader)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.unlock().await.unwrap();

        let (waiter, leader) = task.await.unwrap();
        assert!(leader.unwrap().is_some());
        assert_eq!(waiter.value().await.unwrap(), (true, "node-b".to_owned()));
    }

    #[tokio::test]
    async fn storage_failure_is_propagated() {
        let ha = MemoryHaBackend::new();
        ha.backend().fail_put(true);
        let lock = ha.lock_with("core/lock", "node-a").unwrap();

        assert!(matches!(
            lock.lock(&CancellationToken::new()).await,
            Err(StorageError::OperationDisabled { .. })
        ));
        assert_eq!(ha.held_locks(), 0);
    }

    #[tokio::test]
    async fn deleting_the_claim_revokes_the_leader() {
        let ha = MemoryHaBackend::new();
        let ctx = Context::background();
        let first = ha.lock_with("core/lock", "node-a").unwrap();
        let second = ha.lock_with("core/lock", "node-b").unwrap();

        let first_leader = first.lock(&CancellationToken::new()).await.unwrap().expect("acquired");
        ha.delete(&ctx, b"core/lock").await.unwrap();
        assert!(first_leader.is_cancelled());
        assert_eq!(ha.held_locks(), 0);

        let second_leader = second.lock(&CancellationToken::new()).await.unwrap().expect("acquired");
        assert!(!second_leader.is_cancelled());
        assert_eq!(ha.held_locks(), 1);

        // The revoked holder's unlock must not remove the new claim.
        first.unlock().await.unwrap();
        assert!(!second_leader.is_cancelled());
        assert_eq!(second.value().await.unwrap(), (true, "node-b".to_owned()));
    }

    #[tokio::test]
    async fn overwriting_the_claim_revokes_the_leader() {
        let ha = MemoryHaBackend::new();
        let ctx = Context::background();
        let lock = ha.lock_with("core/lock", "node-a").unwrap();

        let leader = lock.lock(&CancellationToken::new()).await.unwrap().expect("acquired");
        ha.put(&ctx, Entry::new("core/lock", "node-a")).await.unwrap();
        assert!(!leader.is_cancelled(), "rewriting the same value keeps the claim");

        ha.put(&ctx, Entry::new("core/lock", "intruder")).await.unwrap();
        assert!(leader.is_cancelled());
        assert_eq!(ha.held_locks(), 0);

        // A revoked handle may campaign again once the key is free.
        ha.delete(&ctx, b"core/lock").await.unwrap();
        let leader = lock.lock(&CancellationToken::new()).await.unwrap().expect("reacquired");
        assert!(!leader.is_cancelled());
    }

    #[tokio::test]
    async fn committed_delete_of_the_claim_revokes_the_leader() {
        let ha = MemoryHaBackend::new();
        let ctx = Context::background();
        let lock = ha.lock_with("core/lock", "node-a").unwrap();
        let leader = lock.lock(&CancellationToken::new()).await.unwrap().expect("acquired");

        let mut txn = ha.as_transactional().unwrap().begin_tx(&ctx).await.unwrap();
        txn.delete(&ctx, b"core/lock").await.unwrap();
        assert!(!leader.is_cancelled(), "buffered writes do not touch the claim");
        txn.commit(&ctx).await.unwrap();
        assert!(leader.is_cancelled());
    }

    #[tokio::test]
    async fn claims_are_shared_with_the_plain_backend() {
        let plain = MemoryBackend::new();
        let ha = MemoryHaBackend::from_backend(plain.clone());
        let lock = ha.lock_with("core/lock", "node-a").unwrap();
        let leader = lock.lock(&CancellationToken::new()).await.unwrap().expect("acquired");

        plain.delete(&Context::background(), b"core/lock").await.unwrap();
        assert!(leader.is_cancelled());
    }

    #[test]
    fn empty_key_is_rejected() {
        let ha = MemoryHaBackend::new();
        assert!(ha.lock_with("", "node-a").is_err());
        assert!(ha.ha_enabled());
    }
}
