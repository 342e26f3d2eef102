use chsync::sync::RoundOutcome;
use chsync::test_utils::fixtures::{collapsing_users_table, default_replica, memory_engine, object};
use chsync::types::{ImportKey, OperationKind};
use chsync_telemetry::init_test_tracing;
use serde_json::{Value, json};

#[tokio::test]
async fn updates_cancel_the_stored_row_before_writing_the_new_one() {
    init_test_tracing();
    let engine = memory_engine([collapsing_users_table()]);
    let users = ImportKey::new("users");
    let recorder = engine.recorder();

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada"})))
        .await;
    recorder.record(&users, OperationKind::Create, ["1"]).await.unwrap();
    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { rows: 1, .. }
    ));

    engine
        .source()
        .upsert_row("users", "1", object(json!({"id": 1, "name": "ada lovelace"})))
        .await;
    recorder.record(&users, OperationKind::Update, ["1"]).await.unwrap();
    assert!(matches!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed { rows: 2, .. }
    ));

    let rows = engine
        .destination()
        .rows(&default_replica(), "users_log")
        .await;
    let shape: Vec<(Value, Value, Value)> = rows
        .iter()
        .map(|row| {
            (
                row.get("name").cloned().unwrap(),
                row.get("sign").cloned().unwrap(),
                row.get("version").cloned().unwrap(),
            )
        })
        .collect();

    assert_eq!(
        shape,
        vec![
            (json!("ada"), json!(1), json!(1)),
            (json!("ada"), json!(-1), json!(1)),
            (json!("ada lovelace"), json!(1), json!(2)),
        ]
    );

    // Collapsed, only the current state keeps a positive sign balance.
    let balance: i64 = rows
        .iter()
        .map(|row| row.get("sign").and_then(Value::as_i64).unwrap())
        .sum();
    assert_eq!(balance, 1);
}

#[tokio::test]
async fn first_write_of_a_key_has_nothing_to_cancel() {
    init_test_tracing();
    let engine = memory_engine([collapsing_users_table()]);
    let users = ImportKey::new("users");

    engine
        .source()
        .upsert_row("users", "7", object(json!({"id": 7, "name": "grace"})))
        .await;
    engine
        .recorder()
        .record(&users, OperationKind::Create, ["7"])
        .await
        .unwrap();

    assert_eq!(
        engine.sync_round(&users).await,
        RoundOutcome::Committed {
            operations: 1,
            rows: 1
        }
    );
}
