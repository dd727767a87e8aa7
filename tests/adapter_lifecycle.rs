//! End-to-end adapter tests against the scripted mock driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use pg_driver_adapter::app::{PgAdapter, PgAdapterOptions, TYPE_NAME_QUERY};
use pg_driver_adapter::domain::{
    AdapterError, ColumnType, DriverAdapter, DriverError, ErrorKind, FieldDescription,
    IsolationLevel, Query, RawResult, ResultValue, SqlQueryable,
};
use pg_driver_adapter::test_utils::{MockConfig, MockDriver};

const MOOD_OID: u32 = 16_385;

fn people() -> RawResult {
    RawResult {
        fields: vec![
            FieldDescription::new("id", 20),
            FieldDescription::new("mood", MOOD_OID),
            FieldDescription::new("meta", 3802),
            FieldDescription::new("tags", 1009),
        ],
        rows: vec![
            vec![
                ResultValue::Int(1),
                "happy".into(),
                ResultValue::JsonNull,
                ResultValue::Array(vec!["a".into(), ResultValue::Null]),
            ],
            vec![
                ResultValue::Int(2),
                "sad".into(),
                ResultValue::Null,
                ResultValue::Null,
            ],
        ],
        row_count: Some(2),
    }
}

fn create_adapter(driver: &Arc<MockDriver>) -> PgAdapter {
    PgAdapter::new(Arc::clone(driver), PgAdapterOptions::default())
}

fn catalog_lookups(driver: &MockDriver) -> usize {
    driver
        .statements()
        .iter()
        .filter(|sql| sql.as_str() == TYPE_NAME_QUERY)
        .count()
}

#[tokio::test]
async fn test_query_result_serializes_for_the_engine() {
    let driver = Arc::new(
        MockDriver::new()
            .with_type(MOOD_OID, "mood")
            .with_result("SELECT * FROM people", people()),
    );
    let adapter = create_adapter(&driver);

    let result = adapter.query_raw(Query::new("SELECT * FROM people")).await.unwrap();

    assert_eq!(result.column_names, vec!["id", "mood", "meta", "tags"]);
    assert_eq!(
        result.column_types,
        vec![
            ColumnType::Int64,
            ColumnType::Enum,
            ColumnType::Json,
            ColumnType::TextArray
        ]
    );
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({
            "columnNames": ["id", "mood", "meta", "tags"],
            "columnTypes": [1, 12, 11, 71],
            "rows": [
                [1, "happy", {"$type": "JsonNull"}, ["a", null]],
                [2, "sad", null, null]
            ]
        })
    );
}

#[tokio::test]
async fn test_custom_types_are_looked_up_once_across_queries() {
    let driver = Arc::new(
        MockDriver::new()
            .with_type(MOOD_OID, "mood")
            .with_result("SELECT * FROM people", people()),
    );
    let adapter = create_adapter(&driver);

    for _ in 0..3 {
        adapter.query_raw(Query::new("SELECT * FROM people")).await.unwrap();
    }

    assert_eq!(catalog_lookups(&driver), 1);
}

#[tokio::test]
async fn test_unsupported_column_fails_the_whole_query() {
    let driver = Arc::new(MockDriver::new().with_result(
        "SELECT id, location FROM places",
        RawResult {
            fields: vec![
                FieldDescription::new("id", 23),
                FieldDescription::new("location", 600),
            ],
            rows: vec![vec![ResultValue::Int(1), "(1,2)".into()]],
            row_count: Some(1),
        },
    ));
    let adapter = create_adapter(&driver);

    let err = adapter
        .query_raw(Query::new("SELECT id, location FROM places"))
        .await
        .unwrap_err();

    assert_eq!(
        err.kind(),
        Some(&ErrorKind::UnsupportedNativeDataType {
            type_name: "point".to_string(),
            oid: 600,
        })
    );
    assert_eq!(err.to_string(), "Unsupported column type point (OID=600)");
}

#[tokio::test]
async fn test_transaction_round_trip() {
    let driver = Arc::new(
        MockDriver::new()
            .with_type(MOOD_OID, "mood")
            .with_result("SELECT * FROM people", people())
            .with_result(
                "UPDATE people SET mood = $1",
                RawResult {
                    row_count: Some(2),
                    ..RawResult::default()
                },
            ),
    );
    let adapter = create_adapter(&driver);

    let tx = adapter
        .start_transaction(Some(IsolationLevel::RepeatableRead))
        .await
        .unwrap();
    let updated = tx
        .execute_raw(Query::new("UPDATE people SET mood = $1").bind("happy"))
        .await
        .unwrap();
    let rows = tx.query_raw(Query::new("SELECT * FROM people")).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(updated, 2);
    assert_eq!(rows.len(), 2);
    assert_eq!(driver.release_count(), 1);
    assert_eq!(driver.discard_count(), 0);

    let on_connection: Vec<String> = driver
        .log()
        .into_iter()
        .filter(|entry| entry.connection == Some(0))
        .map(|entry| entry.sql)
        .collect();
    assert_eq!(
        on_connection,
        vec![
            "BEGIN",
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            "UPDATE people SET mood = $1",
            "SELECT * FROM people",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn test_transaction_statements_keep_issue_order() {
    let driver = Arc::new(MockDriver::with_config(MockConfig::success().with_latency(20)));
    let adapter = create_adapter(&driver);

    let tx = adapter.start_transaction(None).await.unwrap();
    let (first, second, third) = tokio::join!(
        tx.execute_raw(Query::new("INSERT INTO log VALUES (1)")),
        tx.execute_raw(Query::new("INSERT INTO log VALUES (2)")),
        tx.execute_raw(Query::new("INSERT INTO log VALUES (3)")),
    );
    first.unwrap();
    second.unwrap();
    third.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "BEGIN",
            "INSERT INTO log VALUES (1)",
            "INSERT INTO log VALUES (2)",
            "INSERT INTO log VALUES (3)",
            "ROLLBACK"
        ]
    );
}

#[tokio::test]
async fn test_server_error_inside_transaction_is_classified() {
    let driver = Arc::new(MockDriver::new().with_error(
        "INSERT INTO users VALUES (1)",
        DriverError::server("23505", "ERROR", "duplicate key value violates unique constraint"),
    ));
    let adapter = create_adapter(&driver);

    let tx = adapter.start_transaction(None).await.unwrap();
    let err = assert_err!(tx.execute_raw(Query::new("INSERT INTO users VALUES (1)")).await);
    tx.rollback().await.unwrap();

    match err {
        AdapterError::Kind(ErrorKind::Postgres(pg)) => {
            assert_eq!(pg.code, "23505");
            assert_eq!(pg.severity, "ERROR");
        }
        other => panic!("expected a Postgres error, got {other:?}"),
    }
    assert_eq!(driver.release_count(), 1);
}

#[tokio::test]
async fn test_callbacks_fire_for_out_of_band_errors() {
    let pool_errors = Arc::new(AtomicUsize::new(0));
    let connection_errors = Arc::new(AtomicUsize::new(0));
    let driver = Arc::new(MockDriver::new());

    let pool_counter = Arc::clone(&pool_errors);
    let connection_counter = Arc::clone(&connection_errors);
    let options = PgAdapterOptions::default()
        .on_pool_error(Arc::new(move |_: &DriverError| {
            pool_counter.fetch_add(1, Ordering::SeqCst);
        }))
        .on_connection_error(Arc::new(move |_: &DriverError| {
            connection_counter.fetch_add(1, Ordering::SeqCst);
        }));
    let adapter = PgAdapter::new(Arc::clone(&driver), options);

    driver.emit_pool_error(&DriverError::Io("idle connection reset".to_string()));
    let tx = adapter.start_transaction(None).await.unwrap();
    driver.emit_connection_error(0, &DriverError::Io("connection reset".to_string()));
    tx.commit().await.unwrap();

    // Detached after commit: no further callbacks for this connection.
    driver.emit_connection_error(0, &DriverError::Io("late".to_string()));

    assert_eq!(pool_errors.load(Ordering::SeqCst), 1);
    assert_eq!(connection_errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_then_close_again() {
    let driver = Arc::new(MockDriver::new());
    let adapter = create_adapter(&driver);
    assert_eq!(driver.pool_listener_count(), 1);

    assert_ok!(adapter.close().await);
    assert_ok!(adapter.close().await);

    assert!(!adapter.is_running().await);
    assert_eq!(driver.end_count(), 1);
    assert_eq!(driver.pool_listener_count(), 0);
}

#[tokio::test]
async fn test_script_runs_through_the_pool() {
    let driver = Arc::new(MockDriver::new());
    let adapter = create_adapter(&driver);

    adapter
        .execute_script(
            "CREATE TABLE t (id int);\n INSERT INTO t VALUES (1);;\n INSERT INTO t VALUES (2);",
        )
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "CREATE TABLE t (id int)",
            "INSERT INTO t VALUES (1)",
            "INSERT INTO t VALUES (2)"
        ]
    );
    assert!(driver.log().iter().all(|entry| entry.connection.is_none()));
}
