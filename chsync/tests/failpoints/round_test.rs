use chsync::destination::memory::MemoryDestination;
use chsync::error::ErrorKind;
use chsync::failpoints::{
    SYNC_ROUND_AFTER_WRITE, SYNC_ROUND_BEFORE_DRAIN, SYNC_ROUND_BEFORE_RESOLVE,
    SYNC_ROUND_BEFORE_SERIALIZE, SYNC_ROUND_BEFORE_WRITE,
};
use chsync::router::ConfigRouter;
use chsync::source::memory::MemorySource;
use chsync::store::both::memory::MemoryStore;
use chsync::sync::{RoundOutcome, SyncEngine};
use chsync::test_utils::failpoints::CustomFailScenario;
use chsync::test_utils::fixtures::{DEFAULT_REPLICA, memory_engine_with, object, users_table};
use chsync::test_utils::test_destination::TestDestinationWrapper;
use chsync::types::{ImportKey, OperationKind};
use chsync_config::shared::SyncConfig;
use chsync_telemetry::init_test_tracing;
use serde_json::json;

type Engine = SyncEngine<MemoryStore, MemorySource, TestDestinationWrapper<MemoryDestination>>;

async fn engine_with_pending_users() -> Engine {
    let engine = memory_engine_with(
        MemoryStore::new(),
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
async fn failure_before_each_step_leaves_the_queue_untouched() {
    init_test_tracing();
    let users = ImportKey::new("users");

    let cases = [
        (SYNC_ROUND_BEFORE_DRAIN, "return(queue)", ErrorKind::QueueUnavailable),
        (SYNC_ROUND_BEFORE_RESOLVE, "return(source)", ErrorKind::SourceReadFailure),
        (
            SYNC_ROUND_BEFORE_SERIALIZE,
            "return(serialization)",
            ErrorKind::SerializationFailure,
        ),
        (
            SYNC_ROUND_BEFORE_WRITE,
            "return(destination)",
            ErrorKind::DestinationWriteFailure,
        ),
    ];

    for (failpoint, action, kind) in cases {
        let engine = engine_with_pending_users().await;
        let scenario = CustomFailScenario::setup(&[(failpoint, action)]);

        let outcome = engine.sync_round(&users).await;
        assert_eq!(outcome.error().unwrap().kind(), kind, "fail point {failpoint}");
        assert_eq!(engine.queue_size(&users).await.unwrap(), 2);
        assert!(engine.destination().insert_calls().await.is_empty());

        // The lock was released, so the next round goes through.
        scenario.disable(failpoint);
        assert!(matches!(
            engine.sync_round(&users).await,
            RoundOutcome::Committed { operations: 2, .. }
        ));

        scenario.teardown();
    }
}

#[tokio::test]
async fn failure_after_write_redelivers_the_batch() {
    init_test_tracing();
    let users = ImportKey::new("users");
    let engine = engine_with_pending_users().await;
    let scenario = CustomFailScenario::setup(&[(SYNC_ROUND_AFTER_WRITE, "return(queue)")]);

    let outcome = engine.sync_round(&users).await;
    assert_eq!(outcome.error().unwrap().kind(), ErrorKind::QueueUnavailable);
    assert_eq!(engine.destination().insert_calls().await.len(), 1);
    assert_eq!(engine.queue_size(&users).await.unwrap(), 2);

    scenario.disable(SYNC_ROUND_AFTER_WRITE);
    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { rows: 2, .. }
    ));

    let destination = engine.destination().wrapped();
    assert_eq!(destination.all_rows("users_ch").await.len(), 4);
    let current = destination.latest_rows("users_ch", "id", "version").await;
    assert_eq!(current.len(), 2);
    assert!(current.values().all(|row| row.get_u64("version") > Some(2)));

    scenario.teardown();
}

#[tokio::test]
async fn unknown_fail_point_argument_injects_a_fault() {
    init_test_tracing();
    let users = ImportKey::new("users");
    let engine = engine_with_pending_users().await;
    let scenario = CustomFailScenario::setup(&[(SYNC_ROUND_BEFORE_WRITE, "return")]);

    let outcome = engine.sync_round(&users).await;
    assert_eq!(outcome.error().unwrap().kind(), ErrorKind::InjectedFault);

    scenario.teardown();
}
