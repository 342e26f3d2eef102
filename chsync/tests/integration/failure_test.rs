use chsync::destination::memory::MemoryDestination;
use chsync::error::ErrorKind;
use chsync::router::ConfigRouter;
use chsync::source::memory::MemorySource;
use chsync::store::both::memory::MemoryStore;
use chsync::sync::RoundOutcome;
use chsync::test_utils::faulty_store::{FaultInjectingStore, FaultType, StoreOperation};
use chsync::test_utils::fixtures::{DEFAULT_REPLICA, memory_engine_with, object, users_table};
use chsync::test_utils::test_destination::TestDestinationWrapper;
use chsync::types::{ImportKey, OperationKind, PrimaryKey};
use chsync_config::shared::SyncConfig;
use chsync_telemetry::init_test_tracing;
use serde_json::json;

type FaultyEngine = chsync::sync::SyncEngine<
    FaultInjectingStore<MemoryStore>,
    MemorySource,
    TestDestinationWrapper<MemoryDestination>,
>;

async fn faulty_engine() -> FaultyEngine {
    let engine = memory_engine_with(
        FaultInjectingStore::wrap(MemoryStore::new()),
        MemorySource::new(),
        TestDestinationWrapper::wrap(MemoryDestination::new()),
        ConfigRouter::new(DEFAULT_REPLICA),
        SyncConfig::default(),
        [users_table()],
    );

    for (id, name) in [(1_i64, "ada"), (2, "grace")] {
        engine
            .source()
            .upsert_row("users", id, object(json!({"id": id, "name": name})))
            .await;
    }
    engine
        .recorder()
        .record(&ImportKey::new("users"), OperationKind::Create, [1_i64, 2])
        .await
        .unwrap();

    engine
}

#[tokio::test]
async fn destination_failure_leaves_the_queue_untouched() {
    init_test_tracing();
    let engine = faulty_engine().await;
    let users = ImportKey::new("users");

    engine
        .destination()
        .fail_inserts(ErrorKind::DestinationWriteFailure)
        .await;

    let outcome = engine.sync_round(&users).await;

    assert_eq!(
        outcome.error().unwrap().kind(),
        ErrorKind::DestinationWriteFailure
    );
    assert_eq!(engine.queue_size(&users).await.unwrap(), 2);
    assert_eq!(engine.store().calls(StoreOperation::Fail).await, 1);
    assert_eq!(engine.store().calls(StoreOperation::Commit).await, 0);
    assert!(engine.destination().wrapped().inserts().await.is_empty());

    // The next round retries the same operations.
    engine.destination().succeed_inserts().await;
    assert_eq!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed {
            operations: 2,
            rows: 2
        }
    );
    assert_eq!(engine.queue_size(&users).await.unwrap(), 0);
}

#[tokio::test]
async fn partial_write_counts_as_a_failed_round() {
    init_test_tracing();
    let engine = faulty_engine().await;
    let users = ImportKey::new("users");

    engine
        .destination()
        .fail_inserts_into("users_ch", ErrorKind::PartialDestinationWrite)
        .await;

    let outcome = engine.sync_round(&users).await;

    assert_eq!(
        outcome.error().unwrap().kind(),
        ErrorKind::PartialDestinationWrite
    );
    assert_eq!(engine.queue_size(&users).await.unwrap(), 2);
}

#[tokio::test]
async fn failed_commit_redelivers_without_changing_current_state() {
    init_test_tracing();
    let engine = faulty_engine().await;
    let users = ImportKey::new("users");

    engine
        .store()
        .inject(StoreOperation::Commit, FaultType::Unavailable)
        .await;

    let outcome = engine.sync_round(&users).await;
    assert_eq!(outcome.error().unwrap().kind(), ErrorKind::QueueUnavailable);
    assert_eq!(engine.queue_size(&users).await.unwrap(), 2);
    assert_eq!(engine.store().calls(StoreOperation::Fail).await, 1);

    let destination = engine.destination().wrapped();
    let after_failed_round = destination.latest_rows("users_ch", "id", "version").await;
    assert_eq!(after_failed_round.len(), 2);

    engine.store().clear(StoreOperation::Commit).await;
    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { rows: 2, .. }
    ));

    // Both batches landed, the newer versions win on read.
    assert_eq!(destination.all_rows("users_ch").await.len(), 4);
    let current = destination.latest_rows("users_ch", "id", "version").await;
    assert_eq!(current.len(), 2);
    for (key, row) in &current {
        let previous = &after_failed_round[key];
        assert_eq!(row.get("name"), previous.get("name"));
        assert!(row.get_u64("version") > previous.get_u64("version"));
    }
    assert_eq!(
        current[&PrimaryKey::new("1")].get("name"),
        Some(&json!("ada"))
    );
}

#[tokio::test]
async fn lost_lock_stops_the_round_before_writing() {
    init_test_tracing();
    let engine = faulty_engine().await;
    let users = ImportKey::new("users");

    engine
        .store()
        .inject(StoreOperation::RenewLock, FaultType::LockLost)
        .await;

    let outcome = engine.sync_round(&users).await;

    assert_eq!(outcome.error().unwrap().kind(), ErrorKind::LockLost);
    assert!(engine.destination().insert_calls().await.is_empty());
    assert_eq!(engine.queue_size(&users).await.unwrap(), 2);
}

#[tokio::test]
async fn unavailable_lock_store_fails_the_round() {
    init_test_tracing();
    let engine = faulty_engine().await;
    let users = ImportKey::new("users");

    engine
        .store()
        .inject(StoreOperation::AcquireLock, FaultType::Unavailable)
        .await;

    let outcome = engine.sync_round(&users).await;

    assert_eq!(outcome.error().unwrap().kind(), ErrorKind::QueueUnavailable);
    assert_eq!(engine.store().calls(StoreOperation::PeekBatch).await, 0);
}

#[tokio::test]
async fn failed_release_does_not_fail_a_committed_round() {
    init_test_tracing();
    let engine = faulty_engine().await;
    let users = ImportKey::new("users");

    engine
        .store()
        .inject(StoreOperation::ReleaseLock, FaultType::Unavailable)
        .await;

    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { operations: 2, .. }
    ));
}

#[tokio::test]
async fn enqueue_errors_reach_the_recorder() {
    init_test_tracing();
    let engine = faulty_engine().await;
    let users = ImportKey::new("users");

    engine
        .store()
        .inject(StoreOperation::Enqueue, FaultType::Unavailable)
        .await;

    let err = engine
        .recorder()
        .record(&users, OperationKind::Update, ["1"])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::QueueUnavailable);
    assert_eq!(engine.queue_size(&users).await.unwrap(), 2);
}
