use chsync::destination::memory::MemoryDestination;
use chsync::error::ErrorKind;
use chsync::router::ConfigRouter;
use chsync::source::memory::MemorySource;
use chsync::store::both::memory::MemoryStore;
use chsync::sync::{RoundOutcome, SyncEngine, SyncTarget, TableEngine, TableSync};
use chsync::test_utils::fixtures::{DEFAULT_REPLICA, memory_engine, memory_engine_with, object, users_table};
use chsync::test_utils::test_destination::TestDestinationWrapper;
use chsync::types::{ImportKey, OperationKind};
use chsync_config::shared::{SyncConfig, SyncServiceConfig, TableSyncConfig};
use chsync_telemetry::init_test_tracing;
use serde_json::json;

fn orders_table() -> TableSync {
    TableSync::new("orders", "id").with_target(SyncTarget::new(
        "orders_ch",
        TableEngine::replacing("version"),
    ))
}

#[tokio::test]
async fn table_is_due_again_only_after_its_delay() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");

    assert!(engine.need_sync(&users).await.unwrap());

    let outcomes = engine.sync_due_tables().await;
    assert_eq!(outcomes, vec![(users.clone(), RoundOutcome::Empty)]);

    // The default delay has not elapsed yet.
    assert!(!engine.need_sync(&users).await.unwrap());
    assert!(engine.sync_due_tables().await.is_empty());
}

#[tokio::test]
async fn disabled_tables_are_never_due() {
    init_test_tracing();
    let disabled = orders_table().with_overrides(TableSyncConfig {
        enabled: false,
        ..TableSyncConfig::default()
    });
    let engine = memory_engine([users_table(), disabled]);

    assert!(!engine.need_sync(&ImportKey::new("orders")).await.unwrap());

    let outcomes = engine.sync_due_tables().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, ImportKey::new("users"));
}

#[tokio::test]
async fn zero_delay_tables_are_always_due() {
    init_test_tracing();
    let table = users_table().with_overrides(TableSyncConfig {
        delay_ms: Some(0),
        ..TableSyncConfig::default()
    });
    let engine = memory_engine([table]);
    let users = ImportKey::new("users");

    engine.sync_due_tables().await;

    assert!(engine.need_sync(&users).await.unwrap());
}

#[tokio::test]
async fn failing_table_does_not_block_the_others() {
    init_test_tracing();
    let source = MemorySource::new();
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let engine = memory_engine_with(
        MemoryStore::new(),
        source.clone(),
        destination.clone(),
        ConfigRouter::new(DEFAULT_REPLICA),
        SyncConfig::default(),
        [users_table(), orders_table()],
    );
    let users = ImportKey::new("users");
    let orders = ImportKey::new("orders");

    source
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;
    source
        .upsert_row("orders", "10", object(json!({"id": 10, "total": 42})))
        .await;
    let recorder = engine.recorder();
    recorder.record(&users, OperationKind::Create, ["1"]).await.unwrap();
    recorder.record(&orders, OperationKind::Create, ["10"]).await.unwrap();

    destination
        .fail_inserts_into("orders_ch", ErrorKind::DestinationWriteFailure)
        .await;

    let outcomes = engine.sync_due_tables().await;
    assert_eq!(outcomes.len(), 2);

    for (import_key, outcome) in &outcomes {
        if *import_key == users {
            assert!(matches!(outcome, RoundOutcome::Committed { rows: 1, .. }));
        } else {
            assert_eq!(
                outcome.error().unwrap().kind(),
                ErrorKind::DestinationWriteFailure
            );
        }
    }

    assert_eq!(engine.queue_size(&users).await.unwrap(), 0);
    assert_eq!(engine.queue_size(&orders).await.unwrap(), 1);
}

#[tokio::test]
async fn configured_table_settings_reach_the_engine() {
    init_test_tracing();
    let config: SyncServiceConfig = serde_json::from_value(json!({
        "sync": {"batch_size": 100},
        "databases": {
            "default": {"url": "http://ch-1:8123"},
            "analytics": {"url": "http://ch-2:8123"}
        },
        "tables": {
            "users": {"batch_size": 1, "routing": {"write": ["analytics"]}},
            "orders": {"enabled": false}
        }
    }))
    .unwrap();
    let mut engine = SyncEngine::from_config(
        MemoryStore::new(),
        MemorySource::new(),
        MemoryDestination::new(),
        &config,
    )
    .unwrap();
    engine.register(users_table()).unwrap();
    engine.register(orders_table()).unwrap();
    let users = ImportKey::new("users");

    assert_eq!(engine.round_context(&users).unwrap().batch_size, 1);
    assert_eq!(
        engine
            .round_context(&ImportKey::new("orders"))
            .unwrap()
            .batch_size,
        100
    );
    assert!(!engine.need_sync(&ImportKey::new("orders")).await.unwrap());

    for (id, name) in [("1", "ada"), ("2", "grace")] {
        engine
            .source()
            .upsert_row("users", id, object(json!({"id": id, "name": name})))
            .await;
    }
    engine
        .recorder()
        .record(&users, OperationKind::Create, ["1", "2"])
        .await
        .unwrap();

    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { operations: 1, .. }
    ));
    assert_eq!(engine.queue_size(&users).await.unwrap(), 1);

    let inserts = engine.destination().inserts().await;
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].replica.as_str(), "analytics");
}

#[tokio::test]
async fn invalid_service_config_is_rejected() {
    init_test_tracing();
    let config: SyncServiceConfig = serde_json::from_value(json!({
        "databases": {"main": {"url": "http://ch:8123"}}
    }))
    .unwrap();

    let err = SyncEngine::from_config(
        MemoryStore::new(),
        MemorySource::new(),
        MemoryDestination::new(),
        &config,
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}
