use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use chsync_config::shared::{SyncConfig, SyncServiceConfig};
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::{
    CHSYNC_QUEUE_DEPTH, CHSYNC_ROUND_DURATION_SECONDS, CHSYNC_ROUND_ERRORS_TOTAL,
    CHSYNC_ROUNDS_TOTAL, ERROR_KIND_LABEL, IMPORT_KEY_LABEL, OUTCOME_LABEL, register_metrics,
};
use crate::recorder::ChangeRecorder;
use crate::router::{ConfigRouter, Router};
use crate::source::Source;
use crate::store::SyncStore;
use crate::sync::context::RoundContext;
use crate::sync::round::{RoundOutcome, SyncRound};
use crate::sync::table::TableSync;
use crate::sync_error;
use crate::types::ImportKey;

/// Runs sync rounds for a set of registered tables.
///
/// The engine holds no per round state, so any number of engines, in one or many processes,
/// may share a store. Rounds of one import key are serialized by the store's lock.
#[derive(Debug)]
pub struct SyncEngine<St, Src, D> {
    store: St,
    source: Src,
    destination: D,
    router: Arc<dyn Router>,
    defaults: SyncConfig,
    /// Applied to every table at registration, when the engine was built from a config.
    service_config: Option<SyncServiceConfig>,
    tables: BTreeMap<ImportKey, TableSync>,
}

impl<St, Src, D> SyncEngine<St, Src, D>
where
    St: SyncStore + Sync,
    Src: Source + Sync,
    D: Destination + Sync,
{
    pub fn new(
        store: St,
        source: Src,
        destination: D,
        router: impl Router + 'static,
        defaults: SyncConfig,
    ) -> Self {
        register_metrics();

        Self {
            store,
            source,
            destination,
            router: Arc::new(router),
            defaults,
            service_config: None,
            tables: BTreeMap::new(),
        }
    }

    /// Builds an engine from a validated service config.
    ///
    /// Process defaults come from `sync`, routing from `default_database` and the `routing`
    /// of every table. Tables registered later take the overrides configured under their
    /// import key, which replace the overrides set in code.
    pub fn from_config(
        store: St,
        source: Src,
        destination: D,
        config: &SyncServiceConfig,
    ) -> SyncResult<Self> {
        config.validate()?;

        let mut engine = Self::new(
            store,
            source,
            destination,
            ConfigRouter::from_config(config),
            config.sync.clone(),
        );
        engine.service_config = Some(config.clone());

        Ok(engine)
    }

    /// Registers a table. Each import key can be registered once.
    pub fn register(&mut self, table: TableSync) -> SyncResult<()> {
        let table = match &self.service_config {
            Some(config) => table.with_config(config),
            None => table,
        };
        table.overrides.validate(table.import_key.as_str())?;

        if table.targets.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Table has no sync target",
                format!("import key `{}` has no destination table", table.import_key)
            );
        }

        if self.tables.contains_key(&table.import_key) {
            bail!(
                ErrorKind::ConfigError,
                "Table registered twice",
                format!("import key `{}` is already registered", table.import_key)
            );
        }

        for target in &table.targets {
            if !target.engine.tolerates_redelivery() {
                warn!(
                    import_key = %table.import_key,
                    table = target.table,
                    engine = %target.engine,
                    "target engine keeps duplicates, a batch delivered twice stays duplicated"
                );
            }
        }

        info!(
            import_key = %table.import_key,
            source_table = table.source_table,
            targets = table.targets.len(),
            "registered table sync"
        );
        self.tables.insert(table.import_key.clone(), table);

        Ok(())
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Returns a recorder enqueueing into the engine's store.
    pub fn recorder(&self) -> ChangeRecorder<St>
    where
        St: Clone,
    {
        ChangeRecorder::new(self.store.clone())
    }

    pub fn source(&self) -> &Src {
        &self.source
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn router(&self) -> &dyn Router {
        self.router.as_ref()
    }

    pub fn table(&self, import_key: &ImportKey) -> Option<&TableSync> {
        self.tables.get(import_key)
    }

    pub fn import_keys(&self) -> impl Iterator<Item = &ImportKey> {
        self.tables.keys()
    }

    /// Returns the settings a round of `import_key` would run with.
    pub fn round_context(&self, import_key: &ImportKey) -> SyncResult<RoundContext> {
        let table = self.registered(import_key)?;
        Ok(RoundContext::resolve(import_key, &self.defaults, &table.overrides))
    }

    /// Runs one round for `import_key`.
    ///
    /// Never returns an error: failures are reported through [`RoundOutcome::Failed`] so
    /// that a caller driving many tables can carry on with the others.
    pub async fn sync_round(&self, import_key: &ImportKey) -> RoundOutcome {
        let started = Instant::now();
        let span = info_span!("sync_round", import_key = %import_key);

        let outcome = async {
            let table = match self.registered(import_key) {
                Ok(table) => table,
                Err(err) => return RoundOutcome::Failed(err),
            };

            let round = SyncRound {
                store: &self.store,
                source: &self.source,
                destination: &self.destination,
                router: self.router.as_ref(),
                table,
                context: RoundContext::resolve(import_key, &self.defaults, &table.overrides),
            };

            let outcome = round.run().await;
            if !matches!(outcome, RoundOutcome::Skipped) {
                self.report_queue_depth(import_key).await;
            }

            outcome
        }
        .instrument(span)
        .await;

        self.report_outcome(import_key, &outcome, started);

        outcome
    }

    /// Returns `true` when `import_key` is enabled and its delay elapsed since the last
    /// planned round.
    pub async fn need_sync(&self, import_key: &ImportKey) -> SyncResult<bool> {
        let table = self.registered(import_key)?;
        if !table.enabled() {
            debug!(%import_key, "sync disabled, no round needed");
            return Ok(false);
        }

        let Some(last_sync) = self.store.last_sync_time(import_key).await? else {
            return Ok(true);
        };

        let context = RoundContext::resolve(import_key, &self.defaults, &table.overrides);
        let elapsed = Utc::now().signed_duration_since(last_sync);

        Ok(elapsed.to_std().is_ok_and(|elapsed| elapsed >= context.delay))
    }

    /// Runs a round for every table that needs one, concurrently.
    ///
    /// The last sync time is set when a round is planned, not when it ends, so a failing
    /// table is retried after its delay instead of on every call.
    pub async fn sync_due_tables(&self) -> Vec<(ImportKey, RoundOutcome)> {
        let rounds = self.tables.keys().map(|import_key| async move {
            match self.need_sync(import_key).await {
                Ok(false) => None,
                Ok(true) => {
                    if let Err(err) = self
                        .store
                        .set_last_sync_time(import_key, Utc::now())
                        .await
                    {
                        warn!(%import_key, error = %err, "failed to store last sync time");
                    }

                    Some((import_key.clone(), self.sync_round(import_key).await))
                }
                Err(err) => Some((import_key.clone(), RoundOutcome::Failed(err))),
            }
        });

        join_all(rounds).await.into_iter().flatten().collect()
    }

    /// Returns the number of pending operations of `import_key`.
    pub async fn queue_size(&self, import_key: &ImportKey) -> SyncResult<u64> {
        let size = self.store.size(import_key).await?;
        gauge!(CHSYNC_QUEUE_DEPTH, IMPORT_KEY_LABEL => import_key.to_string()).set(size as f64);

        Ok(size)
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        info!(destination = D::name(), "shutting down sync engine");
        self.destination.shutdown().await
    }

    fn registered(&self, import_key: &ImportKey) -> SyncResult<&TableSync> {
        self.tables.get(import_key).ok_or_else(|| {
            sync_error!(
                ErrorKind::UnknownTable,
                "Import key not registered",
                format!("no table sync is registered under `{import_key}`")
            )
        })
    }

    async fn report_queue_depth(&self, import_key: &ImportKey) {
        if let Err(err) = self.queue_size(import_key).await {
            debug!(%import_key, error = %err, "failed to read queue depth");
        }
    }

    fn report_outcome(&self, import_key: &ImportKey, outcome: &RoundOutcome, started: Instant) {
        let import_key_label = import_key.to_string();

        histogram!(
            CHSYNC_ROUND_DURATION_SECONDS,
            IMPORT_KEY_LABEL => import_key_label.clone(),
            OUTCOME_LABEL => outcome.as_static_str(),
        )
        .record(started.elapsed().as_secs_f64());
        counter!(
            CHSYNC_ROUNDS_TOTAL,
            IMPORT_KEY_LABEL => import_key_label.clone(),
            OUTCOME_LABEL => outcome.as_static_str(),
        )
        .increment(1);

        if let RoundOutcome::Failed(err) = outcome {
            for kind in err.kinds() {
                counter!(
                    CHSYNC_ROUND_ERRORS_TOTAL,
                    IMPORT_KEY_LABEL => import_key_label.clone(),
                    ERROR_KIND_LABEL => kind.as_static_str(),
                )
                .increment(1);
            }

            error!(%import_key, error = %err, "sync round failed");
        }
    }
}
