//! Physical storage layer for the Bastion secrets engine.
//!
//! This crate provides the [`Backend`] trait every storage medium satisfies,
//! the decorators layered on top of it, and [`MemoryBackend`], the in-memory
//! reference implementation used for tests, development, and as a building
//! block for caches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Logical path framework                      │
//! │        (maps requests to put/get/delete/list/lock)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │   EncodedBackend           CachedBackend                    │
//! │   (key validation)         (read-through cache, purge)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Backend trait + capabilities                │
//! │       HaBackend │ Purgeable │ Transactional                 │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │ MemoryBackend / MemoryHaBackend │  other media              │
//! │  KeyIndex + RwLock + PermitPool │                           │
//! └─────────────────────────────────┴───────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use bastion_storage::{Backend, Context, EncodedBackend, Entry, MemoryBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = EncodedBackend::new(MemoryBackend::new());
//! let ctx = Context::background();
//!
//! backend.put(&ctx, Entry::new("logical/abc/foo", "1")).await.unwrap();
//! backend.put(&ctx, Entry::new("logical/abc/bar/baz", "2")).await.unwrap();
//!
//! assert_eq!(backend.list(&ctx, b"logical/abc/").await.unwrap(), vec!["bar/", "foo"]);
//!
//! // Transactions, when the backend supports them.
//! let txn_backend = backend.as_transactional().unwrap();
//! let mut txn = txn_backend.begin_tx(&ctx).await.unwrap();
//! txn.delete(&ctx, b"logical/abc/foo").await.unwrap();
//! txn.commit(&ctx).await.unwrap();
//! # });
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Capabilities |
//! |---------|----------|--------------|
//! | [`MemoryBackend`] | Testing, development | transactions |
//! | [`MemoryHaBackend`] | HA tests | transactions, HA lock |
//! | [`EncodedBackend`] | Decorator: key validation | forwards all |
//! | [`CachedBackend`] | Decorator: read cache | purge, forwards the rest |
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`Backend`] trait
//! 2. Override `as_ha` / `as_purgeable` / `as_transactional` for supported capabilities
//! 3. Map medium-specific errors to [`StorageError`]
//! 4. Run the [`conformance`] suite against it
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. A missing key is `Ok(None)`,
//! never an error.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (key/value generators,
//!   backend factories, assertion macros) and the [`conformance`] suite.
//! - **`failpoints`**: Activates `fail` crate failure points (`memory-txn-before-commit`).

#![deny(unsafe_code)]

pub mod backend;
pub mod cache;
pub mod config;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod context;
pub mod encoding;
pub mod error;
pub mod ha;
pub mod index;
pub mod memory;
pub mod permit_pool;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::{Backend, Purgeable};
pub use cache::{CacheConfig, CacheConfigBuilder, CachedBackend};
pub use config::{MemoryBackendConfig, MemoryBackendConfigBuilder, new_memory_backend, new_memory_ha_backend};
pub use context::Context;
pub use encoding::{EncodedBackend, is_printable, validate_key};
pub use error::{BoxError, ConfigError, Operation, StorageError, StorageResult};
pub use ha::{HaBackend, Lock};
pub use index::KeyIndex;
pub use memory::{MemoryBackend, MemoryHaBackend, MemoryLock, MemoryTransaction};
pub use permit_pool::{DEFAULT_PARALLEL_OPERATIONS, MAX_PARALLEL_OPERATIONS, Permit, PermitPool};
pub use transaction::{Transaction, Transactional};
pub use types::Entry;
