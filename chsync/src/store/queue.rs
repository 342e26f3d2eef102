use std::future::Future;

use metrics::counter;
use tracing::warn;

use crate::error::SyncResult;
use crate::metrics::{CHSYNC_ROUND_FAILED_BATCHES_TOTAL, IMPORT_KEY_LABEL};
use crate::types::{Batch, ImportKey, Mutation};

/// Durable, per import key ordered record of pending operations.
///
/// Operations leave the queue only through [`QueueStore::commit`] (or an operator
/// [`QueueStore::flush`]). Reading a batch never removes anything, so a round that dies
/// midway leaves its work for the next round.
pub trait QueueStore {
    /// Appends mutations in the given order and returns how many were queued.
    ///
    /// Once this returns `Ok` the operations survive a crash of the caller. Any store error is
    /// returned so that the recorder knows the mutations were not captured.
    fn enqueue_many(
        &self,
        import_key: &ImportKey,
        mutations: Vec<Mutation>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Appends a single mutation.
    fn enqueue(
        &self,
        import_key: &ImportKey,
        mutation: Mutation,
    ) -> impl Future<Output = SyncResult<()>> + Send
    where
        Self: Sync,
    {
        async move {
            self.enqueue_many(import_key, vec![mutation]).await?;
            Ok(())
        }
    }

    /// Returns up to `max_size` of the oldest pending operations without removing them.
    fn peek_batch(
        &self,
        import_key: &ImportKey,
        max_size: usize,
    ) -> impl Future<Output = SyncResult<Batch>> + Send;

    /// Removes the operations of `batch` that are still queued and returns how many were
    /// removed. Operations queued after the batch was read stay. Safe to repeat.
    fn commit(
        &self,
        import_key: &ImportKey,
        batch: &Batch,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Returns the number of pending operations.
    fn size(&self, import_key: &ImportKey) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Marks the round that drained `batch` as failed. Nothing is removed.
    fn fail(
        &self,
        import_key: &ImportKey,
        batch: &Batch,
    ) -> impl Future<Output = SyncResult<()>> + Send {
        let operations = batch.len();
        let key = import_key.to_string();

        async move {
            warn!(import_key = %key, operations, "sync round failed, batch left in queue");
            counter!(CHSYNC_ROUND_FAILED_BATCHES_TOTAL, IMPORT_KEY_LABEL => key).increment(1);

            Ok(())
        }
    }

    /// Resets `import_key`: drops every pending operation, the sync lock and the last sync
    /// time. Returns how many operations were dropped.
    ///
    /// Versions survive a flush, so rows written afterwards still win over older ones.
    fn flush(&self, import_key: &ImportKey) -> impl Future<Output = SyncResult<u64>> + Send;
}
