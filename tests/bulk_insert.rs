#![cfg(feature = "sqlite")]

mod common;

use std::error::Error;
use std::time::Duration;

use common::{count_rows, open_sqlite};
use instrumented_db::prelude::*;

const TABLE: &str = "test_bulk_insert";
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn create_table(db: &Db, ctx: &QueryContext) -> Result<(), DbError> {
    db.execute(
        ctx,
        &format!(
            "CREATE TABLE {TABLE} (
                colA VARCHAR(255) NOT NULL,
                colB TEXT,
                PRIMARY KEY (colA)
            )"
        ),
        &[],
    )
    .await
    .map(drop)
}

fn texts(values: &[&str]) -> Vec<RowValues> {
    values.iter().copied().map(RowValues::from).collect()
}

struct Case {
    name: &'static str,
    columns: &'static [&'static str],
    values: Vec<RowValues>,
    conflict: Option<&'static str>,
    want_err: bool,
    want_count: i64,
}

#[tokio::test]
async fn bulk_insert_cases() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_cases").await?;
    let do_nothing = DatabaseType::Sqlite.on_conflict_do_nothing();

    let cases = vec![
        Case {
            name: "one-row",
            columns: &["colA"],
            values: texts(&["valueA"]),
            conflict: None,
            want_err: false,
            want_count: 1,
        },
        Case {
            name: "multiple-rows",
            columns: &["colA"],
            values: texts(&["valueA1", "valueA2", "valueA3"]),
            conflict: None,
            want_err: false,
            want_count: 3,
        },
        Case {
            name: "two-columns",
            columns: &["colA", "colB"],
            values: texts(&["valueA1", "valueB1", "valueA2", "valueB2"]),
            conflict: None,
            want_err: false,
            want_count: 2,
        },
        Case {
            name: "invalid-column-name",
            columns: &["invalid_col"],
            values: texts(&["valueA"]),
            conflict: None,
            want_err: true,
            want_count: 0,
        },
        Case {
            name: "mismatch-num-cols-and-vals",
            columns: &["colA", "colB"],
            values: texts(&["valueA1", "valueB1", "valueA2"]),
            conflict: None,
            want_err: true,
            want_count: 0,
        },
        Case {
            name: "conflict",
            columns: &["colA"],
            values: texts(&["valueA", "valueA"]),
            conflict: None,
            want_err: true,
            want_count: 0,
        },
        Case {
            name: "conflict-do-nothing",
            columns: &["colA"],
            values: texts(&["valueA", "valueA"]),
            conflict: Some(do_nothing),
            want_err: false,
            want_count: 1,
        },
        Case {
            name: "sql-injection",
            columns: &["colA"],
            values: texts(&[&format!("''); DROP TABLE {TABLE};))")]),
            conflict: Some(do_nothing),
            want_err: false,
            want_count: 1,
        },
    ];

    for case in cases {
        let ctx = QueryContext::with_timeout(TEST_TIMEOUT);
        create_table(&db, &ctx).await?;

        let result = db
            .bulk_insert(&ctx, TABLE, case.columns, &case.values, case.conflict)
            .await;
        assert_eq!(
            result.is_err(),
            case.want_err,
            "{}: got {result:?}, want_err {}",
            case.name,
            case.want_err
        );
        if result.is_ok() {
            assert_eq!(count_rows(&db, TABLE).await?, case.want_count, "{}", case.name);
        }

        db.execute(&ctx, &format!("DROP TABLE {TABLE}"), &[]).await?;
    }
    db.close();
    Ok(())
}

#[tokio::test]
async fn injected_text_is_stored_verbatim() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_injection").await?;
    let ctx = QueryContext::with_timeout(TEST_TIMEOUT);
    create_table(&db, &ctx).await?;

    let payload = format!("'); DROP TABLE {TABLE}; --");
    db.bulk_insert(&ctx, TABLE, &["colA"], &[RowValues::from(payload.as_str())], None)
        .await?;

    let stored: String = db
        .query_row(&ctx, &format!("SELECT colA FROM {TABLE}"), &[])
        .await
        .scan_value()?;
    assert_eq!(stored, payload);
    Ok(())
}

#[tokio::test]
async fn fifteen_hundred_rows_take_two_statements() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_chunks").await?;
    let ctx = QueryContext::with_timeout(TEST_TIMEOUT);
    create_table(&db, &ctx).await?;

    let values: Vec<RowValues> = (0..1500).map(|i| RowValues::from(format!("v{i}"))).collect();
    let before = db.logger().queries_issued();
    let outcome = db.bulk_insert(&ctx, TABLE, &["colA"], &values, None).await?;

    assert_eq!(outcome.chunks, 2);
    assert_eq!(outcome.rows_affected, 1500);
    // one prepare and one execution per chunk
    assert_eq!(db.logger().queries_issued() - before, 4);
    assert_eq!(count_rows(&db, TABLE).await?, 1500);
    Ok(())
}

#[tokio::test]
async fn arity_mismatch_sends_no_statement() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_arity").await?;
    let ctx = QueryContext::background();

    let before = db.logger().queries_issued();
    let err = db
        .bulk_insert(&ctx, TABLE, &["colA", "colB"], &texts(&["a", "b", "c"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ArityMismatch { columns: 2, values: 3 }));

    let err = db
        .bulk_insert(&ctx, TABLE, &[], &texts(&["a"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ArityMismatch { columns: 0, .. }));
    assert_eq!(db.logger().queries_issued(), before);
    Ok(())
}

#[tokio::test]
async fn too_many_columns_sends_no_statement() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_wide").await?;
    let ctx = QueryContext::background();

    let names: Vec<String> = (0..1001).map(|i| format!("c{i}")).collect();
    let columns: Vec<&str> = names.iter().map(String::as_str).collect();
    let values = vec![RowValues::Int(1); 1001];

    let before = db.logger().queries_issued();
    let err = db
        .bulk_insert(&ctx, TABLE, &columns, &values, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::TooManyColumns { columns: 1001, max: 1000 }));
    assert_eq!(db.logger().queries_issued(), before);
    Ok(())
}

#[tokio::test]
async fn empty_values_are_a_no_op() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_empty").await?;
    let ctx = QueryContext::background();

    let before = db.logger().queries_issued();
    let outcome = db.bulk_insert(&ctx, TABLE, &["colA"], &[], None).await?;
    assert_eq!(outcome, BulkInsertOutcome::default());
    assert_eq!(db.logger().queries_issued(), before);
    Ok(())
}

#[tokio::test]
async fn failing_chunk_reports_its_range_and_keeps_earlier_chunks() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_partial").await?;
    let ctx = QueryContext::with_timeout(TEST_TIMEOUT);
    create_table(&db, &ctx).await?;

    let mut values: Vec<RowValues> = (0..1500).map(|i| RowValues::from(format!("v{i}"))).collect();
    // a duplicate key inside the second chunk
    values[1200] = RowValues::from("v10");

    let err = db
        .bulk_insert(&ctx, TABLE, &["colA"], &values, None)
        .await
        .unwrap_err();
    match &err {
        DbError::ChunkExecution {
            table, start, end, ..
        } => {
            assert_eq!(table, TABLE);
            assert_eq!((*start, *end), (1000, 1500));
        }
        other => panic!("expected a chunk failure, got {other:?}"),
    }
    assert!(err.to_string().contains("values[1000:1500]"));
    assert_eq!(count_rows(&db, TABLE).await?, 1000);
    Ok(())
}

#[tokio::test]
async fn returning_columns_reach_the_consumer() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_returning").await?;
    let ctx = QueryContext::with_timeout(TEST_TIMEOUT);
    db.execute(
        &ctx,
        "CREATE TABLE fortune_cookies (id INTEGER PRIMARY KEY AUTOINCREMENT, value TEXT NOT NULL UNIQUE)",
        &[],
    )
    .await?;

    let values: Vec<RowValues> = (0..1200).map(|i| RowValues::from(format!("fortune {i}"))).collect();
    let returning = ["id", "value"];
    let req = BulkInsert::new("fortune_cookies", &["value"], &values)
        .on_conflict(DatabaseType::Sqlite.on_conflict_do_nothing())
        .returning(&returning);

    let mut seen: Vec<(i64, String)> = Vec::new();
    let mut collect = |row: &DbRow| -> Result<(), DbError> {
        let id = row.get("id").and_then(RowValues::as_int).copied();
        let value = row.get("value").and_then(RowValues::as_text).map(str::to_owned);
        match (id, value) {
            (Some(id), Some(value)) => {
                seen.push((id, value));
                Ok(())
            }
            _ => Err(DbError::ExecutionError(format!("unexpected row {row:?}"))),
        }
    };
    let outcome = db.bulk_insert_returning(&ctx, &req, &mut collect).await?;

    assert_eq!(outcome.chunks, 2);
    assert_eq!(outcome.rows_affected, 1200);
    assert_eq!(seen.len(), 1200);
    assert_eq!(seen[0].1, "fortune 0");
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    Ok(())
}

#[tokio::test]
async fn consumer_error_fails_the_chunk() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_consumer").await?;
    let ctx = QueryContext::with_timeout(TEST_TIMEOUT);
    create_table(&db, &ctx).await?;

    let values = texts(&["a", "b"]);
    let returning = ["colA"];
    let req = BulkInsert::new(TABLE, &["colA"], &values).returning(&returning);
    let mut reject = |_: &DbRow| -> Result<(), DbError> { Err(DbError::ExecutionError("rejected".into())) };

    let err = db
        .bulk_insert_returning(&ctx, &req, &mut reject)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ChunkExecution { start: 0, end: 2, .. }));
    assert!(err.to_string().contains("rejected"));
    Ok(())
}

#[tokio::test]
async fn cancelled_context_is_returned_unwrapped() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let db = open_sqlite(dir.path(), "bulk_cancel").await?;
    let ctx = QueryContext::background();
    create_table(&db, &ctx).await?;

    ctx.cancel();
    let err = db
        .bulk_insert(&ctx, TABLE, &["colA"], &texts(&["a"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Cancelled));
    assert!(err.is_cancellation());
    Ok(())
}
