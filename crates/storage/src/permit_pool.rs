//! Bounded concurrency gate for backend operations.
//!
//! [`PermitPool`] caps the number of operations in flight against one
//! backend instance, independently of any lock the backend takes. Backends
//! talking to connection-limited media use it to bound outstanding requests;
//! the in-memory backend uses it so tests exercise the same shape.
//!
//! A [`Permit`] is returned to the pool when it is dropped, so an operation
//! releases exactly once on every return path, including `?` early returns
//! and unwinding.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::{
    Context,
    error::{StorageError, StorageResult},
};

/// Default number of operations allowed in flight per backend.
pub const DEFAULT_PARALLEL_OPERATIONS: usize = 128;

/// Largest pool the underlying semaphore can represent.
pub const MAX_PARALLEL_OPERATIONS: usize = Semaphore::MAX_PERMITS;

/// A fixed-capacity pool of operation permits.
///
/// Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of allowance, held for the duration of one operation.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl PermitPool {
    /// Creates a pool of `permits` tokens.
    ///
    /// A size of zero falls back to [`DEFAULT_PARALLEL_OPERATIONS`]; sizes
    /// above [`MAX_PARALLEL_OPERATIONS`] are capped to it.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        let capacity = match permits {
            0 => DEFAULT_PARALLEL_OPERATIONS,
            n => n.min(MAX_PARALLEL_OPERATIONS),
        };
        Self { semaphore: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Waits for a permit or for `ctx` to finish, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns the context's error (`Cancelled` or `Timeout`) if it is done
    /// before a permit becomes available.
    pub async fn acquire(&self, ctx: &Context) -> StorageResult<Permit<'_>> {
        // The semaphore is owned by the pool and never closed.
        let permit = ctx
            .run(self.semaphore.acquire())
            .await?
            .map_err(|e| StorageError::internal_with_source("permit pool closed", e))?;
        Ok(Permit { _permit: permit })
    }

    /// Takes a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.semaphore.try_acquire().ok().map(|permit| Permit { _permit: permit })
    }

    /// Total number of permits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

impl Default for PermitPool {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_OPERATIONS)
    }
}
