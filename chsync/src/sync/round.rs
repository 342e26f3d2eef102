use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::failpoints::{
    SYNC_ROUND_AFTER_WRITE, SYNC_ROUND_BEFORE_DRAIN, SYNC_ROUND_BEFORE_RESOLVE,
    SYNC_ROUND_BEFORE_SERIALIZE, SYNC_ROUND_BEFORE_WRITE, sync_fail_point,
};
use crate::metrics::{
    CHSYNC_BATCH_OPERATIONS, CHSYNC_LOCK_HARD_RELEASES_TOTAL, CHSYNC_LOCK_TIMEOUTS_TOTAL,
    CHSYNC_ROUND_STEP_DURATION_SECONDS, CHSYNC_ROWS_INSERTED_TOTAL, DESTINATION_LABEL,
    IMPORT_KEY_LABEL, STEP_LABEL, TABLE_LABEL,
};
use crate::router::Router;
use crate::source::Source;
use crate::store::SyncStore;
use crate::store::lock::{LockAcquisition, LockToken};
use crate::sync::context::RoundContext;
use crate::sync::table::{SyncTarget, TableSync};
use crate::types::{Batch, DestinationRow, PrimaryKey, RowVersion, SourceRow};

/// Result of one sync round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// Another owner holds the lock of the import key.
    Skipped,
    /// The queue had nothing to drain.
    Empty,
    /// The batch was written and removed from the queue.
    Committed { operations: usize, rows: u64 },
    /// The round stopped on an error. Drained operations, if any, are still queued.
    Failed(SyncError),
}

impl RoundOutcome {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            RoundOutcome::Skipped => "skipped",
            RoundOutcome::Empty => "empty",
            RoundOutcome::Committed { .. } => "committed",
            RoundOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RoundOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            RoundOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// Active states of a round. A round moves through them in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundStep {
    LockAcquiring,
    Draining,
    Resolving,
    Serializing,
    Writing,
    Committing,
}

impl RoundStep {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            RoundStep::LockAcquiring => "lock_acquiring",
            RoundStep::Draining => "draining",
            RoundStep::Resolving => "resolving",
            RoundStep::Serializing => "serializing",
            RoundStep::Writing => "writing",
            RoundStep::Committing => "committing",
        }
    }
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// Rows prepared for one target.
struct TargetBatch<'a> {
    target: &'a SyncTarget,
    rows: Vec<DestinationRow>,
}

/// A single round over one import key.
pub(crate) struct SyncRound<'a, St, Src, D> {
    pub(crate) store: &'a St,
    pub(crate) source: &'a Src,
    pub(crate) destination: &'a D,
    pub(crate) router: &'a dyn Router,
    pub(crate) table: &'a TableSync,
    pub(crate) context: RoundContext,
}

impl<St, Src, D> SyncRound<'_, St, Src, D>
where
    St: SyncStore + Sync,
    Src: Source + Sync,
    D: Destination + Sync,
{
    /// Runs the round to completion. The lock is released on every path that acquired it.
    pub(crate) async fn run(self) -> RoundOutcome {
        let import_key = &self.context.import_key;

        let acquisition = self
            .step(
                RoundStep::LockAcquiring,
                self.store.acquire_lock(import_key, self.context.lock_ttl),
            )
            .await;

        let token = match acquisition {
            Ok(LockAcquisition::Acquired {
                token,
                hard_released,
            }) => {
                if hard_released {
                    warn!(%import_key, "previous owner let the sync lock expire, lock hard released");
                    counter!(CHSYNC_LOCK_HARD_RELEASES_TOTAL, IMPORT_KEY_LABEL => import_key.to_string())
                        .increment(1);
                }

                token
            }
            Ok(LockAcquisition::Busy) => {
                debug!(%import_key, "sync lock busy, skipping round");
                counter!(CHSYNC_LOCK_TIMEOUTS_TOTAL, IMPORT_KEY_LABEL => import_key.to_string())
                    .increment(1);

                return RoundOutcome::Skipped;
            }
            Err(err) => return RoundOutcome::Failed(err),
        };

        let outcome = self.run_locked(token).await;

        match self.store.release_lock(import_key, token).await {
            Ok(true) => debug!(%import_key, "sync lock released"),
            Ok(false) => warn!(%import_key, "sync lock expired before it was released"),
            Err(err) => warn!(%import_key, error = %err, "failed to release sync lock, it will expire"),
        }

        outcome
    }

    async fn run_locked(&self, token: LockToken) -> RoundOutcome {
        let import_key = &self.context.import_key;

        let batch = self
            .step(RoundStep::Draining, async {
                sync_fail_point(SYNC_ROUND_BEFORE_DRAIN)?;
                self.store
                    .peek_batch(import_key, self.context.batch_size)
                    .await
            })
            .await;

        let batch = match batch {
            Ok(batch) if batch.is_empty() => {
                debug!(%import_key, "queue empty, nothing to sync");
                return RoundOutcome::Empty;
            }
            Ok(batch) => batch,
            Err(err) => return RoundOutcome::Failed(err),
        };

        histogram!(CHSYNC_BATCH_OPERATIONS, IMPORT_KEY_LABEL => import_key.to_string())
            .record(batch.len() as f64);
        debug!(%import_key, operations = batch.len(), "drained batch");

        let rows = match self.deliver(&batch, token).await {
            Ok(rows) => rows,
            Err(err) => return self.fail(&batch, err).await,
        };

        let committed = self
            .step(RoundStep::Committing, async {
                sync_fail_point(SYNC_ROUND_AFTER_WRITE)?;
                self.store.commit(import_key, &batch).await
            })
            .await;

        match committed {
            Ok(removed) => {
                info!(%import_key, operations = batch.len(), removed, rows, "sync round committed");

                RoundOutcome::Committed {
                    operations: batch.len(),
                    rows,
                }
            }
            Err(err) => {
                warn!(
                    %import_key,
                    operations = batch.len(),
                    "batch written but not committed, it will be delivered again by the next round"
                );

                self.fail(&batch, err).await
            }
        }
    }

    /// Resolves, serializes and writes `batch`. Returns the number of rows written.
    async fn deliver(&self, batch: &Batch, token: LockToken) -> SyncResult<u64> {
        let source_rows = self
            .step(RoundStep::Resolving, self.resolve(batch))
            .await?;

        if source_rows.is_empty() {
            debug!(import_key = %self.context.import_key, "no rows left to write after resolution");
            return Ok(0);
        }

        let batches = self
            .step(RoundStep::Serializing, self.serialize(&source_rows))
            .await?;

        self.step(RoundStep::Writing, self.write(&batches, token))
            .await
    }

    /// Collapses the batch to its final intents and reads the current source state of the
    /// surviving keys, in resolution order.
    async fn resolve(&self, batch: &Batch) -> SyncResult<Vec<SourceRow>> {
        sync_fail_point(SYNC_ROUND_BEFORE_RESOLVE)?;

        let resolved = batch.resolve();
        debug!(
            import_key = %self.context.import_key,
            upserts = resolved.upserts.len(),
            deletes = resolved.deletes.len(),
            "resolved batch"
        );

        if resolved.is_empty() {
            return Ok(Vec::new());
        }

        let fetched = self
            .source
            .fetch_rows(
                &self.table.source_table,
                &self.table.key_column,
                &resolved.upserts,
            )
            .await?;

        let mut fetched: HashMap<PrimaryKey, SourceRow> = fetched
            .into_iter()
            .map(|row| (row.primary_key.clone(), row))
            .collect();

        let rows: Vec<SourceRow> = resolved
            .upserts
            .iter()
            .filter_map(|key| fetched.remove(key))
            .collect();

        let vanished = resolved.upserts.len() - rows.len();
        if vanished > 0 {
            debug!(
                import_key = %self.context.import_key,
                vanished,
                "rows deleted from the source since capture were skipped"
            );
        }

        Ok(rows)
    }

    /// Converts the source rows for every target, attaching versions and collapse signs.
    async fn serialize<'t>(&'t self, source_rows: &[SourceRow]) -> SyncResult<Vec<TargetBatch<'t>>> {
        sync_fail_point(SYNC_ROUND_BEFORE_SERIALIZE)?;

        let first_version: Option<RowVersion> = if self.table.requires_versions() {
            let versions = self
                .store
                .reserve_versions(&self.context.import_key, source_rows.len() as u64)
                .await?;

            Some(*versions.start())
        } else {
            None
        };

        let mut batches = Vec::with_capacity(self.table.targets.len());
        for target in &self.table.targets {
            let mut rows = Vec::with_capacity(source_rows.len());

            if let Some(sign_column) = target.engine.sign_column() {
                rows.extend(self.cancel_rows(target, sign_column, source_rows).await?);
            }

            for (index, source_row) in source_rows.iter().enumerate() {
                let mut row = target.serializer.serialize(source_row)?;

                if let (Some(column), Some(first)) = (target.engine.version_column(), first_version)
                {
                    row.set(column, first + index as u64);
                }
                if let Some(sign_column) = target.engine.sign_column() {
                    row.set(sign_column, 1);
                }

                rows.push(row);
            }

            batches.push(TargetBatch { target, rows });
        }

        Ok(batches)
    }

    /// Reads the stored state of the keys from a read replica and turns it into rows with a
    /// negative sign, which cancel the stored rows once merged.
    async fn cancel_rows(
        &self,
        target: &SyncTarget,
        sign_column: &str,
        source_rows: &[SourceRow],
    ) -> SyncResult<Vec<DestinationRow>> {
        let keys: Vec<PrimaryKey> = source_rows
            .iter()
            .map(|row| row.primary_key.clone())
            .collect();
        let replica = self.router.read_target(&self.context.import_key);

        let mut current = self
            .destination
            .fetch_current_rows(&replica, &target.table, &self.table.key_column, &keys)
            .await?;

        for row in &mut current {
            row.set(sign_column, -1);
        }

        Ok(current)
    }

    /// Writes every target batch. Succeeds only if every insert succeeded.
    async fn write(&self, batches: &[TargetBatch<'_>], token: LockToken) -> SyncResult<u64> {
        let import_key = &self.context.import_key;
        sync_fail_point(SYNC_ROUND_BEFORE_WRITE)?;

        if !self
            .store
            .renew_lock(import_key, token, self.context.lock_ttl)
            .await?
        {
            bail!(
                ErrorKind::LockLost,
                "Sync lock lost before writing",
                format!("the lock of `{import_key}` expired and may have a new owner")
            );
        }

        let replicas = self.router.write_targets(import_key);
        let replicas = &replicas;
        let writes = batches
            .iter()
            .filter(|batch| !batch.rows.is_empty())
            .map(|batch| async move {
                let inserted = self
                    .destination
                    .insert_batch(replicas, &batch.target.table, &batch.rows)
                    .await?;

                counter!(
                    CHSYNC_ROWS_INSERTED_TOTAL,
                    IMPORT_KEY_LABEL => import_key.to_string(),
                    TABLE_LABEL => batch.target.table.clone(),
                    DESTINATION_LABEL => D::name(),
                )
                .increment(inserted);

                Ok::<u64, SyncError>(inserted)
            });

        let mut rows = 0;
        let mut errors = Vec::new();
        for result in join_all(writes).await {
            match result {
                Ok(inserted) => rows += inserted,
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(rows)
    }

    async fn fail(&self, batch: &Batch, err: SyncError) -> RoundOutcome {
        if let Err(hook_err) = self.store.fail(&self.context.import_key, batch).await {
            warn!(import_key = %self.context.import_key, error = %hook_err, "failed to report failed batch");
        }

        RoundOutcome::Failed(err)
    }

    /// Awaits `future` as `step` of the round, recording its duration.
    async fn step<T, F>(&self, step: RoundStep, future: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        debug!(import_key = %self.context.import_key, %step, "entering round step");
        let started = Instant::now();

        let result = future.await;

        histogram!(
            CHSYNC_ROUND_STEP_DURATION_SECONDS,
            IMPORT_KEY_LABEL => self.context.import_key.to_string(),
            STEP_LABEL => step.as_static_str(),
        )
        .record(started.elapsed().as_secs_f64());

        if let Err(err) = &result {
            warn!(import_key = %self.context.import_key, %step, error = %err, "round step failed");
        }

        result
    }
}
