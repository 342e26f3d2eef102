//! Replica selection for reads, writes and migrations.
//!
//! A router never remembers previous choices. When a table has several candidates, each call
//! picks one at random, so callers must not depend on which replica they get.

use std::collections::HashMap;
use std::fmt;

use chsync_config::shared::{RoutingConfig, SyncServiceConfig, WriteMode};
use rand::seq::SliceRandom;

use crate::types::{ImportKey, ReplicaAlias};

/// Kind of schema change, which decides how many nodes receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationKind {
    /// DDL the destination replicates on its own. Applied once, on any candidate.
    Replicated,
    /// DDL that is not replicated, like creating or dropping a table. Applied on every node.
    NonReplicated,
}

/// Picks one replica out of a candidate list.
pub type ReplicaSelector = fn(&[ReplicaAlias]) -> Option<&ReplicaAlias>;

/// Uniformly random choice.
pub fn random_replica(candidates: &[ReplicaAlias]) -> Option<&ReplicaAlias> {
    candidates.choose(&mut rand::thread_rng())
}

/// Maps an import key to the replicas it is read from, written to and migrated on.
pub trait Router: fmt::Debug + Send + Sync {
    /// Replicas receiving the next write of `import_key`. Never empty.
    fn write_targets(&self, import_key: &ImportKey) -> Vec<ReplicaAlias>;

    /// Replica serving the next read of `import_key`.
    fn read_target(&self, import_key: &ImportKey) -> ReplicaAlias;

    /// Every node allowed to receive migrations of `kind` for `import_key`.
    fn migrate_candidates(&self, import_key: &ImportKey, kind: MigrationKind) -> Vec<ReplicaAlias>;

    /// Picks one candidate for replicated migrations and every candidate otherwise.
    fn migrate_targets(&self, import_key: &ImportKey, kind: MigrationKind) -> Vec<ReplicaAlias> {
        let candidates = self.migrate_candidates(import_key, kind);

        match kind {
            MigrationKind::Replicated => random_replica(&candidates).cloned().into_iter().collect(),
            MigrationKind::NonReplicated => candidates,
        }
    }

    /// Returns `true` if `alias` may run a migration of `kind` for `import_key`.
    fn allow_migrate(
        &self,
        alias: &ReplicaAlias,
        import_key: &ImportKey,
        kind: MigrationKind,
    ) -> bool {
        self.migrate_candidates(import_key, kind).contains(alias)
    }
}

/// Candidate sets of one import key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRoutes {
    pub read: Vec<ReplicaAlias>,
    pub write: Vec<ReplicaAlias>,
    pub write_mode: WriteMode,
    pub migrate_replicated: Vec<ReplicaAlias>,
    pub migrate_non_replicated: Vec<ReplicaAlias>,
}

fn aliases(aliases: &[String]) -> Vec<ReplicaAlias> {
    aliases.iter().map(|alias| ReplicaAlias::new(alias.as_str())).collect()
}

impl From<&RoutingConfig> for TableRoutes {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            read: aliases(&config.read),
            write: aliases(&config.write),
            write_mode: config.write_mode,
            migrate_replicated: aliases(&config.migrate_replicated),
            migrate_non_replicated: aliases(&config.migrate_non_replicated),
        }
    }
}

/// Router built from configuration.
///
/// Tables without routes, and empty candidate lists, resolve to the default replica.
#[derive(Clone)]
pub struct ConfigRouter {
    default_replica: ReplicaAlias,
    tables: HashMap<ImportKey, TableRoutes>,
    select: ReplicaSelector,
}

impl ConfigRouter {
    pub fn new(default_replica: impl Into<ReplicaAlias>) -> Self {
        Self {
            default_replica: default_replica.into(),
            tables: HashMap::new(),
            select: random_replica,
        }
    }

    /// Builds a router from the `default_database` and the `routing` of every table.
    pub fn from_config(config: &SyncServiceConfig) -> Self {
        let mut router = Self::new(config.default_database.as_str());
        for (table, table_config) in &config.tables {
            router = router.with_table(table.as_str(), TableRoutes::from(&table_config.routing));
        }

        router
    }

    pub fn with_table(mut self, import_key: impl Into<ImportKey>, routes: TableRoutes) -> Self {
        self.tables.insert(import_key.into(), routes);
        self
    }

    /// Replaces the random selection, e.g. to pin a replica.
    pub fn with_selector(mut self, select: ReplicaSelector) -> Self {
        self.select = select;
        self
    }

    pub fn default_replica(&self) -> &ReplicaAlias {
        &self.default_replica
    }

    fn candidates<'a>(
        &'a self,
        import_key: &ImportKey,
        pick: impl FnOnce(&'a TableRoutes) -> &'a [ReplicaAlias],
    ) -> &'a [ReplicaAlias] {
        match self.tables.get(import_key).map(pick) {
            Some(candidates) if !candidates.is_empty() => candidates,
            _ => std::slice::from_ref(&self.default_replica),
        }
    }

    fn choose(&self, candidates: &[ReplicaAlias]) -> ReplicaAlias {
        (self.select)(candidates)
            .unwrap_or(&self.default_replica)
            .clone()
    }
}

impl fmt::Debug for ConfigRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRouter")
            .field("default_replica", &self.default_replica)
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

impl Router for ConfigRouter {
    fn write_targets(&self, import_key: &ImportKey) -> Vec<ReplicaAlias> {
        let candidates = self.candidates(import_key, |routes| routes.write.as_slice());
        let write_mode = self
            .tables
            .get(import_key)
            .map(|routes| routes.write_mode)
            .unwrap_or_default();

        match write_mode {
            WriteMode::AnyOf => vec![self.choose(candidates)],
            WriteMode::All => candidates.to_vec(),
        }
    }

    fn read_target(&self, import_key: &ImportKey) -> ReplicaAlias {
        self.choose(self.candidates(import_key, |routes| routes.read.as_slice()))
    }

    fn migrate_candidates(&self, import_key: &ImportKey, kind: MigrationKind) -> Vec<ReplicaAlias> {
        let candidates = match kind {
            MigrationKind::Replicated => {
                self.candidates(import_key, |routes| routes.migrate_replicated.as_slice())
            }
            MigrationKind::NonReplicated => {
                self.candidates(import_key, |routes| routes.migrate_non_replicated.as_slice())
            }
        };

        candidates.to_vec()
    }

    fn migrate_targets(&self, import_key: &ImportKey, kind: MigrationKind) -> Vec<ReplicaAlias> {
        let candidates = self.migrate_candidates(import_key, kind);

        match kind {
            MigrationKind::Replicated => vec![self.choose(&candidates)],
            MigrationKind::NonReplicated => candidates,
        }
    }
}
