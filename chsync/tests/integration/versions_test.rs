use chsync::destination::memory::MemoryDestination;
use chsync::router::ConfigRouter;
use chsync::source::memory::MemorySource;
use chsync::store::both::memory::MemoryStore;
use chsync::store::version::VersionStore;
use chsync::sync::{RoundOutcome, SyncTarget, TableEngine, TableSync};
use chsync::test_utils::fixtures::{
    DEFAULT_REPLICA, default_replica, memory_engine, memory_engine_with, object, users_table,
};
use chsync::types::{ImportKey, OperationKind};
use chsync_config::shared::SyncConfig;
use chsync_telemetry::init_test_tracing;
use serde_json::json;

#[tokio::test]
async fn versions_keep_growing_across_engine_restarts() {
    init_test_tracing();
    let store = MemoryStore::new();
    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    let users = ImportKey::new("users");

    source
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;

    let mut versions = Vec::new();
    for round in 0..3 {
        // Every round runs on a fresh engine sharing only the durable store.
        let engine = memory_engine_with(
            store.clone(),
            source.clone(),
            destination.clone(),
            ConfigRouter::new(DEFAULT_REPLICA),
            SyncConfig::default(),
            [users_table()],
        );

        engine
            .recorder()
            .record(&users, OperationKind::Update, ["1"])
            .await
            .unwrap();
        assert!(
            matches!(engine.sync_round(&users).await, RoundOutcome::Committed { .. }),
            "round {round} did not commit"
        );

        let rows = destination.rows(&default_replica(), "users_ch").await;
        versions.push(rows.last().unwrap().get_u64("version").unwrap());
    }

    assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(store.next_version(&users).await.unwrap() > versions[2]);
}

#[tokio::test]
async fn reserved_versions_are_never_reused() {
    let store = MemoryStore::new();
    let users = ImportKey::new("users");

    let first = store.reserve_versions(&users, 3).await.unwrap();
    let second = store.reserve_versions(&users, 2).await.unwrap();

    assert_eq!(first, 1..=3);
    assert_eq!(second, 4..=5);
    assert_eq!(store.next_version(&users).await.unwrap(), 6);
    assert_eq!(
        store
            .next_version(&ImportKey::new("orders"))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn unversioned_targets_reserve_no_versions() {
    init_test_tracing();
    let table = TableSync::new("events", "id").with_target(SyncTarget::new(
        "events_ch",
        TableEngine::ReplacingMergeTree {
            version_column: None,
        },
    ));
    let engine = memory_engine([table]);
    let events = ImportKey::new("events");

    engine
        .source()
        .upsert_row("events", "1", object(json!({"id": 1, "kind": "signup"})))
        .await;
    engine
        .recorder()
        .record(&events, OperationKind::Create, ["1"])
        .await
        .unwrap();

    assert!(matches!(
        engine.sync_round(&events).await,
        RoundOutcome::Committed { rows: 1, .. }
    ));

    let rows = engine.destination().all_rows("events_ch").await;
    assert_eq!(rows[0].get("version"), None);
    assert_eq!(engine.store().next_version(&events).await.unwrap(), 1);
}
