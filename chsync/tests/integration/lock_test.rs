use std::time::Duration;

use chsync::destination::memory::MemoryDestination;
use chsync::router::ConfigRouter;
use chsync::source::memory::MemorySource;
use chsync::store::both::memory::MemoryStore;
use chsync::store::lock::{LockAcquisition, LockStore};
use chsync::sync::RoundOutcome;
use chsync::test_utils::fixtures::{
    DEFAULT_REPLICA, memory_engine, memory_engine_with, object, users_table,
};
use chsync::test_utils::test_source::TestSourceWrapper;
use chsync::types::{ImportKey, OperationKind};
use chsync_config::shared::{SyncConfig, TableSyncConfig};
use chsync_telemetry::init_test_tracing;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;

fn acquired(acquisition: LockAcquisition) -> (chsync::store::lock::LockToken, bool) {
    match acquisition {
        LockAcquisition::Acquired {
            token,
            hard_released,
        } => (token, hard_released),
        LockAcquisition::Busy => panic!("expected the lock to be acquired"),
    }
}

#[tokio::test]
async fn round_is_skipped_while_another_owner_holds_the_lock() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
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

    let (token, _) = acquired(
        engine
            .store()
            .acquire_lock(&users, Duration::from_secs(60))
            .await
            .unwrap(),
    );

    assert_eq!(engine.sync_round(&users).await, RoundOutcome::Skipped);
    assert_eq!(engine.queue_size(&users).await.unwrap(), 1);
    assert!(engine.destination().inserts().await.is_empty());

    assert!(engine.store().release_lock(&users, token).await.unwrap());
    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { operations: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn concurrent_rounds_of_one_key_are_mutually_exclusive() {
    init_test_tracing();
    let source = TestSourceWrapper::wrap(MemorySource::new());
    source.set_fetch_delay(Duration::from_millis(100)).await;
    let engine = memory_engine_with(
        MemoryStore::new(),
        source,
        MemoryDestination::new(),
        ConfigRouter::new(DEFAULT_REPLICA),
        SyncConfig::default(),
        [users_table()],
    );
    let users = ImportKey::new("users");

    engine
        .source()
        .wrapped()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;
    engine
        .recorder()
        .record(&users, OperationKind::Create, ["1"])
        .await
        .unwrap();

    let (first, second) = tokio::join!(engine.sync_round(&users), engine.sync_round(&users));

    let mut outcomes = [first.as_static_str(), second.as_static_str()];
    outcomes.sort_unstable();
    assert_eq!(outcomes, ["committed", "skipped"]);
    assert_eq!(engine.source().fetch_calls().await, 1);
    assert_eq!(engine.destination().inserts().await.len(), 1);
    assert_eq!(engine.queue_size(&users).await.unwrap(), 0);
}

#[test]
fn round_taking_over_an_expired_lock_counts_a_hard_release() {
    init_test_tracing();
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let engine = memory_engine([users_table()]);
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

            // An owner that dies without releasing.
            engine
                .store()
                .acquire_lock(&users, Duration::from_secs(1))
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(2)).await;

            assert!(matches!(
                engine.sync_round(&users).await,
                RoundOutcome::Committed { operations: 1, .. }
            ));
        })
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("chsync_lock_hard_releases_total{import_key=\"users\"} 1"),
        "{rendered}"
    );
}

#[tokio::test]
async fn round_releases_its_lock() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");

    assert_eq!(engine.sync_round(&users).await, RoundOutcome::Empty);

    let (_, hard_released) = acquired(
        engine
            .store()
            .acquire_lock(&users, Duration::from_secs(60))
            .await
            .unwrap(),
    );
    assert!(!hard_released);
}

#[tokio::test]
async fn locks_of_different_tables_are_independent() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);

    engine
        .store()
        .acquire_lock(&ImportKey::new("orders"), Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(
        engine.sync_round(&ImportKey::new("users")).await,
        RoundOutcome::Empty
    );
}

#[tokio::test(start_paused = true)]
async fn abandoned_lock_expires_and_is_reported_as_hard_released() {
    init_test_tracing();
    let table = users_table().with_overrides(TableSyncConfig {
        lock_ttl_ms: Some(5_000),
        ..TableSyncConfig::default()
    });
    let engine = memory_engine([table]);
    let users = ImportKey::new("users");
    let store = engine.store();

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;
    engine
        .recorder()
        .record(&users, OperationKind::Create, ["1"])
        .await
        .unwrap();

    // An owner that dies without releasing.
    let (dead_token, _) = acquired(
        store
            .acquire_lock(&users, Duration::from_secs(5))
            .await
            .unwrap(),
    );
    assert_eq!(engine.sync_round(&users).await, RoundOutcome::Skipped);

    tokio::time::advance(Duration::from_secs(6)).await;

    let (token, hard_released) = acquired(
        store
            .acquire_lock(&users, Duration::from_secs(5))
            .await
            .unwrap(),
    );
    assert!(hard_released);

    // The dead owner's token no longer releases or renews anything.
    assert!(!store.release_lock(&users, dead_token).await.unwrap());
    assert!(
        !store
            .renew_lock(&users, dead_token, Duration::from_secs(5))
            .await
            .unwrap()
    );
    assert_eq!(
        store
            .acquire_lock(&users, Duration::from_secs(5))
            .await
            .unwrap(),
        LockAcquisition::Busy
    );

    assert!(store.release_lock(&users, token).await.unwrap());
    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { operations: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn renewal_keeps_the_lock_alive() {
    init_test_tracing();
    let engine = memory_engine([users_table()]);
    let users = ImportKey::new("users");
    let store = engine.store();

    let (token, _) = acquired(
        store
            .acquire_lock(&users, Duration::from_secs(5))
            .await
            .unwrap(),
    );

    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(
        store
            .renew_lock(&users, token, Duration::from_secs(5))
            .await
            .unwrap()
    );

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(
        store
            .acquire_lock(&users, Duration::from_secs(5))
            .await
            .unwrap(),
        LockAcquisition::Busy
    );
    assert!(store.release_lock(&users, token).await.unwrap());
}
