//! High-availability lock contract.
//!
//! A backend that can coordinate leadership across processes implements
//! [`HaBackend`] and returns it from [`Backend::as_ha`](crate::Backend::as_ha).
//! Each candidate asks for a [`Lock`] handle on the same key with its own
//! identity value, then calls [`Lock::lock`]. At most one handle holds a key
//! at a time.
//!
//! The protocol is cooperative: the lock itself never evicts a holder that
//! stops responding. Expiry of dead holders is a property of the concrete
//! backend.
//!
//! ```text
//!            lock() claims key             unlock()
//!  Unheld ─────────────────────▶ Held(owner) ─────────▶ Unheld
//!     ▲                                                   │
//!     └──────────── waiters wake and retry ◀──────────────┘
//! ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StorageResult;

/// Capability of backends that support leader election.
pub trait HaBackend: Send + Sync {
    /// Reports whether this instance can coordinate leadership.
    fn ha_enabled(&self) -> bool;

    /// Returns a lock handle for `key` that writes `value` while held.
    fn lock_with(&self, key: &str, value: &str) -> StorageResult<Box<dyn Lock>>;
}

/// Holder-side handle for one named lock.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Blocks until the lock is acquired or `stop` is cancelled.
    ///
    /// On success returns a leader token that is cancelled once this handle
    /// stops being the leader. Returns `Ok(None)` when `stop` fired first.
    ///
    /// # Errors
    ///
    /// - [`LockAlreadyHeld`](crate::StorageError::LockAlreadyHeld) if this handle already holds
    ///   the lock.
    /// - Any storage error raised while claiming the key.
    async fn lock(&self, stop: &CancellationToken) -> StorageResult<Option<CancellationToken>>;

    /// Releases the lock if this handle holds it; otherwise does nothing.
    async fn unlock(&self) -> StorageResult<()>;

    /// Reports whether anyone holds the key, and the holder's value.
    async fn value(&self) -> StorageResult<(bool, String)>;
}
