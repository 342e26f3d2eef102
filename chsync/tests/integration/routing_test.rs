use chsync::destination::memory::MemoryDestination;
use chsync::router::{ConfigRouter, TableRoutes};
use chsync::serializer::JsonRowSerializer;
use chsync::source::memory::MemorySource;
use chsync::store::both::memory::MemoryStore;
use chsync::sync::{RoundOutcome, SyncTarget, TableEngine, TableSync};
use chsync::test_utils::fixtures::{memory_engine_with, object, users_table};
use chsync::types::{ImportKey, OperationKind, ReplicaAlias};
use chsync_config::shared::{SyncConfig, WriteMode};
use chsync_telemetry::init_test_tracing;
use serde_json::json;

fn replicas() -> Vec<ReplicaAlias> {
    vec![ReplicaAlias::new("ch-1"), ReplicaAlias::new("ch-2")]
}

async fn seed_users(source: &MemorySource) {
    for (id, name) in [(1_i64, "ada"), (2, "grace")] {
        source
            .upsert_row(
                "users",
                id,
                object(json!({"id": id, "name": name, "email": format!("{name}@example.com")})),
            )
            .await;
    }
}

#[tokio::test]
async fn fan_out_writes_the_batch_to_every_replica() {
    init_test_tracing();
    let router = ConfigRouter::new("ch-1").with_table(
        "users",
        TableRoutes {
            write: replicas(),
            write_mode: WriteMode::All,
            ..TableRoutes::default()
        },
    );
    let destination = MemoryDestination::new();
    let source = MemorySource::new();
    seed_users(&source).await;
    let engine = memory_engine_with(
        MemoryStore::new(),
        source,
        destination.clone(),
        router,
        SyncConfig::default(),
        [users_table()],
    );
    let users = ImportKey::new("users");

    engine
        .recorder()
        .record(&users, OperationKind::Create, [1_i64, 2])
        .await
        .unwrap();

    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { rows: 2, .. }
    ));

    let inserts = destination.inserts().await;
    assert_eq!(inserts.len(), 2);
    for replica in replicas() {
        assert_eq!(destination.rows(&replica, "users_ch").await.len(), 2);
    }
}

#[tokio::test]
async fn any_of_writes_the_batch_to_a_single_candidate() {
    init_test_tracing();
    let router = ConfigRouter::new("ch-1").with_table(
        "users",
        TableRoutes {
            write: replicas(),
            ..TableRoutes::default()
        },
    );
    let destination = MemoryDestination::new();
    let source = MemorySource::new();
    seed_users(&source).await;
    let engine = memory_engine_with(
        MemoryStore::new(),
        source,
        destination.clone(),
        router,
        SyncConfig::default(),
        [users_table()],
    );
    let users = ImportKey::new("users");

    engine
        .recorder()
        .record(&users, OperationKind::Create, [1_i64, 2])
        .await
        .unwrap();
    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { .. }
    ));

    let inserts = destination.inserts().await;
    assert_eq!(inserts.len(), 1);
    assert!(replicas().contains(&inserts[0].replica));
    assert_eq!(inserts[0].rows, 2);
}

#[tokio::test]
async fn every_target_table_gets_its_own_row_shape() {
    init_test_tracing();
    let table = users_table().with_target(
        SyncTarget::new("users_directory", TableEngine::MergeTree)
            .with_serializer(JsonRowSerializer::new().with_fields(["id", "name"])),
    );
    let destination = MemoryDestination::new();
    let source = MemorySource::new();
    seed_users(&source).await;
    let engine = memory_engine_with(
        MemoryStore::new(),
        source,
        destination.clone(),
        ConfigRouter::new("ch-1"),
        SyncConfig::default(),
        [table],
    );
    let users = ImportKey::new("users");

    engine
        .recorder()
        .record(&users, OperationKind::Create, [1_i64, 2])
        .await
        .unwrap();

    assert_eq!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed {
            operations: 2,
            rows: 4
        }
    );

    let versioned = destination.all_rows("users_ch").await;
    assert!(versioned.iter().all(|row| row.get_u64("version").is_some()));
    assert!(versioned.iter().all(|row| row.get("email").is_some()));

    let directory = destination.all_rows("users_directory").await;
    assert_eq!(directory.len(), 2);
    assert!(directory.iter().all(|row| row.values.len() == 2));
}

#[tokio::test]
async fn summing_targets_get_plain_rows() {
    init_test_tracing();
    let table = TableSync::new("orders", "id").with_target(
        SyncTarget::new("order_totals", TableEngine::SummingMergeTree)
            .with_serializer(JsonRowSerializer::new().with_fields(["id", "amount"])),
    );
    let destination = MemoryDestination::new();
    let source = MemorySource::new();
    source
        .upsert_row("orders", "1", object(json!({"id": 1, "amount": 30, "note": "gift"})))
        .await;
    let engine = memory_engine_with(
        MemoryStore::new(),
        source,
        destination.clone(),
        ConfigRouter::new("ch-1"),
        SyncConfig::default(),
        [table],
    );
    let orders = ImportKey::new("orders");

    engine
        .recorder()
        .record(&orders, OperationKind::Create, ["1"])
        .await
        .unwrap();

    assert_eq!(
        engine.sync_round(&orders).await,
        RoundOutcome::Committed {
            operations: 1,
            rows: 1
        }
    );

    let totals = destination.all_rows("order_totals").await;
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].values.len(), 2);
    assert_eq!(totals[0].get("amount"), Some(&json!(30)));
}
