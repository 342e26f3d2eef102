use chsync::destination::memory::MemoryDestination;
use chsync::error::ErrorKind;
use chsync::recorder::ChangeRecorder;
use chsync::router::ConfigRouter;
use chsync::source::memory::MemorySource;
use chsync::store::both::memory::MemoryStore;
use chsync::store::queue::QueueStore;
use chsync::sync::{RoundOutcome, SyncTarget, TableEngine, TableSync};
use chsync::test_utils::fixtures::{
    DEFAULT_REPLICA, default_replica, memory_engine, memory_engine_with, object, users_table,
};
use chsync::test_utils::test_source::TestSourceWrapper;
use chsync::types::{ImportKey, OperationKind, PrimaryKey};
use chsync_config::shared::{SyncConfig, TableSyncConfig};
use chsync_telemetry::init_test_tracing;
use futures::FutureExt;
use serde_json::json;

#[tokio::test]
async fn round_commits_final_state_with_increasing_versions() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada lovelace"})))
        .await;
    engine
        .source()
        .upsert_row("users", "2", object(json!({"id": 2, "name": "grace hopper"})))
        .await;

    let recorder = engine.recorder();
    recorder.record(&users, OperationKind::Create, ["1"]).await.unwrap();
    recorder.record(&users, OperationKind::Update, ["1"]).await.unwrap();
    recorder.record(&users, OperationKind::Create, ["2"]).await.unwrap();

    let outcome = engine.sync_round(&users).await;

    assert_eq!(
        outcome,
        RoundOutcome::Committed {
            operations: 3,
            rows: 2
        }
    );
    assert_eq!(engine.queue_size(&users).await.unwrap(), 0);

    let rows = engine
        .destination()
        .rows(&default_replica(), "users_ch")
        .await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].primary_key("id"), Some(PrimaryKey::new("1")));
    assert_eq!(rows[0].get("name"), Some(&json!("ada lovelace")));
    assert_eq!(rows[1].primary_key("id"), Some(PrimaryKey::new("2")));

    let first = rows[0].get_u64("version").unwrap();
    let second = rows[1].get_u64("version").unwrap();
    assert!(first < second);

    // A single insert carried the whole batch.
    assert_eq!(engine.destination().inserts().await.len(), 1);
}

#[tokio::test]
async fn create_then_update_writes_only_the_final_state() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");
    let recorder = engine.recorder();

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;
    recorder.record(&users, OperationKind::Create, ["1"]).await.unwrap();

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada lovelace"})))
        .await;
    recorder.record(&users, OperationKind::Update, ["1"]).await.unwrap();

    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { rows: 1, .. }
    ));

    let rows = engine.destination().all_rows("users_ch").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("ada lovelace")));
}

#[tokio::test]
async fn create_then_delete_writes_nothing() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");
    let recorder = engine.recorder();

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;
    recorder.record(&users, OperationKind::Create, ["1"]).await.unwrap();
    engine
        .source()
        .delete_row("users", &PrimaryKey::new("1"))
        .await;
    recorder.record(&users, OperationKind::Delete, ["1"]).await.unwrap();

    assert_eq!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed {
            operations: 2,
            rows: 0
        }
    );
    assert!(engine.destination().inserts().await.is_empty());
    assert_eq!(engine.queue_size(&users).await.unwrap(), 0);
}

#[tokio::test]
async fn rows_missing_from_the_source_are_skipped() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");
    let recorder = engine.recorder();

    engine
        .source()
        .upsert_row("users", "2", object(json!({"id": 2, "name": "grace"})))
        .await;
    // Row 1 was deleted after its update was captured, the delete is not in the queue yet.
    recorder
        .record(&users, OperationKind::Update, ["1", "2"])
        .await
        .unwrap();

    assert_eq!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed {
            operations: 2,
            rows: 1
        }
    );

    let rows = engine.destination().all_rows("users_ch").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].primary_key("id"), Some(PrimaryKey::new("2")));
}

#[tokio::test]
async fn round_drains_at_most_one_batch() {
    init_test_tracing();
    let table = users_table().with_overrides(TableSyncConfig {
        batch_size: Some(2),
        ..TableSyncConfig::default()
    });
    let engine = memory_engine([table]);
    let users = ImportKey::new("users");

    for id in 1..=3_i64 {
        engine
            .source()
            .upsert_row("users", id, object(json!({"id": id, "name": format!("user {id}")})))
            .await;
    }
    engine
        .recorder()
        .record(&users, OperationKind::Create, [1_i64, 2, 3])
        .await
        .unwrap();

    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { operations: 2, .. }
    ));
    assert_eq!(engine.queue_size(&users).await.unwrap(), 1);

    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { operations: 1, .. }
    ));
    assert_eq!(engine.sync_round(&users).await, RoundOutcome::Empty);
}

#[tokio::test]
async fn commit_keeps_operations_queued_after_the_batch_was_drained() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");
    let recorder = engine.recorder();

    recorder
        .record(&users, OperationKind::Create, ["1", "2"])
        .await
        .unwrap();
    let batch = engine.store().peek_batch(&users, 10).await.unwrap();

    recorder.record(&users, OperationKind::Update, ["1"]).await.unwrap();

    assert_eq!(engine.store().commit(&users, &batch).await.unwrap(), 2);
    assert_eq!(engine.queue_size(&users).await.unwrap(), 1);

    // Committing again removes nothing.
    assert_eq!(engine.store().commit(&users, &batch).await.unwrap(), 0);

    let remaining = engine.store().peek_batch(&users, 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining.operations()[0].kind, OperationKind::Update);
}

#[tokio::test]
async fn operations_recorded_during_a_round_stay_queued() {
    init_test_tracing();
    let store = MemoryStore::new();
    let source = TestSourceWrapper::wrap(MemorySource::new());
    let users = ImportKey::new("users");

    source
        .wrapped()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;

    // The row changes again while the round is reading it.
    let recorder = ChangeRecorder::new(store.clone());
    source
        .before_next_fetch(move || {
            async move {
                recorder
                    .record(&ImportKey::new("users"), OperationKind::Update, ["1"])
                    .await
                    .unwrap();
            }
            .boxed()
        })
        .await;

    let engine = memory_engine_with(
        store,
        source,
        MemoryDestination::new(),
        ConfigRouter::new(DEFAULT_REPLICA),
        SyncConfig::default(),
        [users_table()],
    );
    engine
        .recorder()
        .record(&users, OperationKind::Create, ["1"])
        .await
        .unwrap();

    assert_eq!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed {
            operations: 1,
            rows: 1
        }
    );
    assert_eq!(engine.queue_size(&users).await.unwrap(), 1);

    let remaining = engine.store().peek_batch(&users, 10).await.unwrap();
    assert_eq!(remaining.operations()[0].kind, OperationKind::Update);

    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { operations: 1, .. }
    ));
    assert_eq!(engine.sync_round(&users).await, RoundOutcome::Empty);
}

#[tokio::test]
async fn zero_delay_tables_commit() {
    init_test_tracing();
    let table = users_table().with_overrides(TableSyncConfig {
        delay_ms: Some(0),
        ..TableSyncConfig::default()
    });
    let engine = memory_engine([table]);
    let users = ImportKey::new("users");

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;
    engine
        .recorder()
        .record(&users, OperationKind::Create, ["1"])
        .await
        .unwrap();

    assert!(!engine.round_context(&users).unwrap().lock_ttl.is_zero());
    assert_eq!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed {
            operations: 1,
            rows: 1
        }
    );
    assert_eq!(engine.queue_size(&users).await.unwrap(), 0);
}

#[tokio::test]
async fn empty_queue_ends_the_round() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);

    assert_eq!(
        engine.sync_round(&ImportKey::new("users")).await,
        RoundOutcome::Empty
    );
    assert!(engine.destination().inserts().await.is_empty());
}

#[tokio::test]
async fn unregistered_import_key_fails_the_round() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);

    let outcome = engine.sync_round(&ImportKey::new("orders")).await;

    assert_eq!(outcome.error().unwrap().kind(), ErrorKind::UnknownTable);
}

#[tokio::test]
async fn registration_rejects_invalid_overrides() {
    init_test_tracing();
    let mut engine = memory_engine(Vec::<TableSync>::new());

    let err = engine
        .register(users_table().with_overrides(TableSyncConfig {
            lock_ttl_ms: Some(0),
            ..TableSyncConfig::default()
        }))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(engine.table(&ImportKey::new("users")).is_none());
}

#[tokio::test]
async fn registration_rejects_duplicates_and_tables_without_targets() {
    init_test_tracing();
    let mut engine = memory_engine([users_table()]);

    let err = engine.register(users_table()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);

    let err = engine
        .register(TableSync::new("orders", "id"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);

    engine
        .register(
            TableSync::new("orders", "id")
                .with_target(SyncTarget::new("orders_ch", TableEngine::MergeTree)),
        )
        .unwrap();
    assert_eq!(engine.import_keys().count(), 2);
}
