use std::fmt;
use std::sync::Arc;

use chsync_config::shared::{SyncServiceConfig, TableSyncConfig};

use crate::serializer::{JsonRowSerializer, RowSerializer};
use crate::types::ImportKey;

/// Merge engine of a destination table, which decides the shape of the written rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEngine {
    /// Plain append only table. Re-delivered rows stay duplicated.
    MergeTree,
    /// Append only table summing numeric columns of rows sharing a sorting key. Re-delivered
    /// rows are summed twice.
    SummingMergeTree,
    /// Keeps the row with the highest version per key, or the last inserted one without a
    /// version column.
    ReplacingMergeTree { version_column: Option<String> },
    /// Cancels rows pairwise by sign. Every update writes a cancel row (sign -1) for the
    /// stored state followed by the new state (sign 1).
    CollapsingMergeTree {
        sign_column: String,
        version_column: Option<String>,
    },
}

impl TableEngine {
    pub fn replacing(version_column: impl Into<String>) -> Self {
        TableEngine::ReplacingMergeTree {
            version_column: Some(version_column.into()),
        }
    }

    pub fn collapsing(sign_column: impl Into<String>, version_column: impl Into<String>) -> Self {
        TableEngine::CollapsingMergeTree {
            sign_column: sign_column.into(),
            version_column: Some(version_column.into()),
        }
    }

    /// Column receiving the row version, when the engine uses explicit versions.
    pub fn version_column(&self) -> Option<&str> {
        match self {
            TableEngine::MergeTree | TableEngine::SummingMergeTree => None,
            TableEngine::ReplacingMergeTree { version_column }
            | TableEngine::CollapsingMergeTree { version_column, .. } => version_column.as_deref(),
        }
    }

    pub fn sign_column(&self) -> Option<&str> {
        match self {
            TableEngine::CollapsingMergeTree { sign_column, .. } => Some(sign_column),
            _ => None,
        }
    }

    pub fn requires_versions(&self) -> bool {
        self.version_column().is_some()
    }

    /// Returns `true` when writing the same batch twice leaves the merged state unchanged.
    pub fn tolerates_redelivery(&self) -> bool {
        !matches!(self, TableEngine::MergeTree | TableEngine::SummingMergeTree)
    }

    pub fn as_static_str(&self) -> &'static str {
        match self {
            TableEngine::MergeTree => "MergeTree",
            TableEngine::SummingMergeTree => "SummingMergeTree",
            TableEngine::ReplacingMergeTree { .. } => "ReplacingMergeTree",
            TableEngine::CollapsingMergeTree { .. } => "CollapsingMergeTree",
        }
    }
}

impl fmt::Display for TableEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// One destination table fed by an import key.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub table: String,
    pub engine: TableEngine,
    pub serializer: Arc<dyn RowSerializer>,
}

impl SyncTarget {
    /// Creates a target copying every source column.
    pub fn new(table: impl Into<String>, engine: TableEngine) -> Self {
        Self {
            table: table.into(),
            engine,
            serializer: Arc::new(JsonRowSerializer::new()),
        }
    }

    pub fn with_serializer(mut self, serializer: impl RowSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }
}

/// Registration of one import key with the engine.
///
/// A source table feeds one or more destination tables. All of them are written in the same
/// round and the batch is only committed once every target accepted its rows.
#[derive(Debug, Clone)]
pub struct TableSync {
    pub import_key: ImportKey,
    pub source_table: String,
    /// Primary key column, in the source and in every target.
    pub key_column: String,
    pub targets: Vec<SyncTarget>,
    pub overrides: TableSyncConfig,
}

impl TableSync {
    /// Registers `source_table` under an import key of the same name.
    pub fn new(source_table: impl Into<String>, key_column: impl Into<String>) -> Self {
        let source_table = source_table.into();

        Self {
            import_key: ImportKey::new(source_table.as_str()),
            source_table,
            key_column: key_column.into(),
            targets: Vec::new(),
            overrides: TableSyncConfig::default(),
        }
    }

    pub fn with_import_key(mut self, import_key: impl Into<ImportKey>) -> Self {
        self.import_key = import_key.into();
        self
    }

    pub fn with_target(mut self, target: SyncTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_overrides(mut self, overrides: TableSyncConfig) -> Self {
        self.overrides = overrides;
        self
    }

    /// Takes the overrides configured under this import key in `config.tables`, if any.
    pub fn with_config(self, config: &SyncServiceConfig) -> Self {
        match config.table(self.import_key.as_str()) {
            Some(overrides) => self.with_overrides(overrides.clone()),
            None => self,
        }
    }

    pub fn enabled(&self) -> bool {
        self.overrides.enabled
    }

    pub fn requires_versions(&self) -> bool {
        self.targets
            .iter()
            .any(|target| target.engine.requires_versions())
    }
}
