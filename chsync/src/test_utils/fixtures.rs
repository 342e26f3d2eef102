use chsync_config::shared::SyncConfig;
use serde_json::{Map, Value};

use crate::destination::memory::MemoryDestination;
use crate::router::ConfigRouter;
use crate::source::memory::MemorySource;
use crate::store::both::memory::MemoryStore;
use crate::sync::{SyncEngine, SyncTarget, TableEngine, TableSync};
use crate::types::ReplicaAlias;

/// Replica every fixture engine routes to unless told otherwise.
pub const DEFAULT_REPLICA: &str = "default";

pub type MemoryEngine = SyncEngine<MemoryStore, MemorySource, MemoryDestination>;

/// Turns a JSON object literal into a column map. Panics on anything else.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn default_replica() -> ReplicaAlias {
    ReplicaAlias::new(DEFAULT_REPLICA)
}

/// `users` source table synced into `users_ch`, a replacing table versioned by `version`.
pub fn users_table() -> TableSync {
    TableSync::new("users", "id").with_target(SyncTarget::new(
        "users_ch",
        TableEngine::replacing("version"),
    ))
}

/// `users` source table synced into `users_log`, a collapsing table with `sign` and
/// `version` columns.
pub fn collapsing_users_table() -> TableSync {
    TableSync::new("users", "id").with_target(SyncTarget::new(
        "users_log",
        TableEngine::collapsing("sign", "version"),
    ))
}

/// Builds an engine over fresh in-memory components with `tables` registered.
pub fn memory_engine(tables: impl IntoIterator<Item = TableSync>) -> MemoryEngine {
    memory_engine_with(
        MemoryStore::new(),
        MemorySource::new(),
        MemoryDestination::new(),
        ConfigRouter::new(DEFAULT_REPLICA),
        SyncConfig::default(),
        tables,
    )
}

/// Builds an engine over the given components, so a test can keep clones of them.
pub fn memory_engine_with<St, Src, D>(
    store: St,
    source: Src,
    destination: D,
    router: ConfigRouter,
    defaults: SyncConfig,
    tables: impl IntoIterator<Item = TableSync>,
) -> SyncEngine<St, Src, D>
where
    St: crate::store::SyncStore + Sync,
    Src: crate::source::Source + Sync,
    D: crate::destination::Destination + Sync,
{
    let mut engine = SyncEngine::new(store, source, destination, router, defaults);
    for table in tables {
        engine.register(table).unwrap();
    }

    engine
}
