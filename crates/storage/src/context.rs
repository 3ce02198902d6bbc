//! Cancellation and deadline signal carried by every storage operation.
//!
//! A [`Context`] pairs a [`CancellationToken`] with an optional deadline.
//! Backends check it before touching their index and race it against every
//! point where an operation may block (the [permit pool](crate::PermitPool)
//! and the read/write lock), so a caller that gives up gets control back
//! promptly and no partial mutation happens.
//!
//! Contexts are cheap to clone. Clones share the same token; [`child`]
//! contexts are cancelled with their parent but can also be cancelled alone.
//!
//! [`child`]: Context::child
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use bastion_storage::{Context, StorageError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let ctx = Context::with_timeout(Duration::from_secs(5));
//! assert!(ctx.err().is_none());
//!
//! ctx.cancel();
//! assert!(matches!(ctx.err(), Some(StorageError::Cancelled)));
//! # });
//! ```

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};

/// Cancellation and deadline signal for a storage operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context that only ends when [`cancel`](Self::cancel) is called.
    #[must_use]
    pub fn with_cancel() -> Self {
        Self::default()
    }

    /// A context that ends after `timeout` elapses.
    ///
    /// Must be called within a Tokio runtime with the time driver enabled.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that ends at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { token: CancellationToken::new(), deadline: Some(deadline) }
    }

    /// Wraps an existing token, for callers that already manage cancellation.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Derives a context cancelled together with `self`.
    ///
    /// The child keeps the parent's deadline unless `timeout` is shorter.
    #[must_use]
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout.map(|t| Instant::now() + t)) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        Self { token: self.token.child_token(), deadline }
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline, if one was set.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the underlying cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reports why the context is done, or `None` while it is still live.
    ///
    /// Explicit cancellation wins over an expired deadline.
    #[must_use]
    pub fn err(&self) -> Option<StorageError> {
        if self.token.is_cancelled() {
            return Some(StorageError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StorageError::Timeout),
            _ => None,
        }
    }

    /// Returns `Err` if the context is already done.
    pub fn check(&self) -> StorageResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is done and yields the reason.
    pub async fn done(&self) -> StorageError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => StorageError::Cancelled,
                    () = sleep_until(deadline) => StorageError::Timeout,
                }
            },
            None => {
                self.token.cancelled().await;
                StorageError::Cancelled
            },
        }
    }

    /// Runs `fut` unless the context finishes first.
    ///
    /// An already-done context fails without polling `fut`.
    pub async fn run<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            value = fut => Ok(value),
        }
    }
}
