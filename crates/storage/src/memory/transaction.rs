//! Buffered transactions over [`MemoryBackend`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use tracing::debug;

use super::MemoryBackend;
use crate::{
    Context,
    error::{Operation, StorageError, StorageResult},
    index::KeyIndex,
    transaction::Transaction,
    types::Entry,
};

/// In-memory transaction.
///
/// Buffers writes and deletes until commit, providing read-your-writes
/// semantics within the transaction. Failure switches and value-size limits
/// of the owning backend apply when each call is made, not at commit.
pub struct MemoryTransaction {
    backend: MemoryBackend,
    pending: BTreeMap<Bytes, Option<Bytes>>,
    read_only: bool,
}

impl MemoryTransaction {
    pub(super) fn new(backend: MemoryBackend, read_only: bool) -> Self {
        Self { backend, pending: BTreeMap::new(), read_only }
    }

    /// Number of buffered writes and deletes.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnlyTransaction);
        }
        Ok(())
    }

    /// Copies the committed entries under `prefix` and replays the buffer
    /// over them.
    fn overlay(&self, committed: &KeyIndex, prefix: &[u8]) -> KeyIndex {
        let mut view: KeyIndex =
            committed.walk_prefix(prefix).map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, value) in self.pending.iter().filter(|(k, _)| k.starts_with(prefix)) {
            match value {
                Some(value) => {
                    view.insert(key.clone(), value.clone());
                },
                None => {
                    view.remove(key);
                },
            }
        }
        view
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn put(&mut self, ctx: &Context, entry: Entry) -> StorageResult<()> {
        self.ensure_writable()?;
        self.backend.ensure_enabled(Operation::Put)?;
        ctx.check()?;
        self.backend.check_value_size(entry.value.len())?;

        self.pending.insert(entry.key, Some(entry.value));
        Ok(())
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> StorageResult<Option<Entry>> {
        self.backend.ensure_enabled(Operation::GetInTxn)?;
        ctx.check()?;

        if let Some(buffered) = self.pending.get(key) {
            return Ok(buffered.clone().map(|value| Entry::new(Bytes::copy_from_slice(key), value)));
        }

        let _permit = self.backend.acquire(ctx).await?;
        let index = self.backend.read_index(ctx).await?;
        self.backend.log_op(Operation::GetInTxn, key);
        Ok(index.get(key).map(|value| Entry::new(Bytes::copy_from_slice(key), value.clone())))
    }

    async fn delete(&mut self, ctx: &Context, key: &[u8]) -> StorageResult<()> {
        self.ensure_writable()?;
        self.backend.ensure_enabled(Operation::Delete)?;
        ctx.check()?;

        self.pending.insert(Bytes::copy_from_slice(key), None);
        Ok(())
    }

    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &[u8],
        after: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        self.backend.ensure_enabled(Operation::List)?;
        ctx.check()?;
        let _permit = self.backend.acquire(ctx).await?;
        let index = self.backend.read_index(ctx).await?;

        if self.pending.is_empty() {
            return Ok(index.list(prefix, after, limit));
        }
        Ok(self.overlay(&index, prefix).list(prefix, after, limit))
    }

    #[tracing::instrument(skip(self, ctx), fields(pending = self.pending.len()))]
    async fn commit(self: Box<Self>, ctx: &Context) -> StorageResult<()> {
        ctx.check()?;
        if self.pending.is_empty() {
            return Ok(());
        }

        fail_point!("memory-txn-before-commit", |_| {
            Err(StorageError::internal("injected failure before transaction commit"))
        });

        let Self { backend, pending, .. } = *self;
        let _permit = backend.acquire(ctx).await?;
        let mut index = backend.write_index(ctx).await?;

        for (key, value) in pending {
            match value {
                Some(value) => {
                    backend.log_op(Operation::Put, &key);
                    backend.revoke_stale_claim(&key, Some(&value));
                    index.insert(key, value);
                },
                None => {
                    backend.log_op(Operation::Delete, &key);
                    backend.revoke_stale_claim(&key, None);
                    index.remove(&key);
                },
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>, _ctx: &Context) -> StorageResult<()> {
        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "transaction rolled back");
        }
        Ok(())
    }
}
