//! Scenarios against a live postgres server.
//!
//! Ignored by default; point `PGHOST`/`PGUSER`/`PGPASSWORD`/`PGDATABASE`
//! at a scratch database and run with `cargo test -- --ignored`.
use std::time::Duration;

use postgate::{PgValue, Pool, PoolConfig, sql, types::oid};

fn config() -> PoolConfig {
    PoolConfig::from_env()
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn basic_select() {
    let pool = Pool::connect_with(config()).await.unwrap();

    let result = pool
        .run(
            sql()
                .raw("select 1::int4 a, ")
                .bind(2)
                .raw("::int4 b, ")
                .bind(3)
                .raw("::int4 c")
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.rows.len(), 1);

    let row = &result.rows[0];
    assert_eq!(row.get("a"), Some(&PgValue::Int4(1)));
    assert_eq!(row.get("b"), Some(&PgValue::Int4(2)));
    assert_eq!(row.get("c"), Some(&PgValue::Int4(3)));
    assert!(row.columns().iter().all(|c| c.type_oid == oid::INT4));

    pool.destroy().await;
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn metadata_inference() {
    let pool = Pool::connect_with(config()).await.unwrap();

    let meta = pool.metadata("select 1::int4 a, $1::text b").await.unwrap();
    assert_eq!(meta.param_types, vec![oid::TEXT]);
    assert_eq!(meta.columns.len(), 2);
    assert_eq!(meta.columns[0].type_oid, oid::INT4);
    assert_eq!(meta.columns[1].type_oid, oid::TEXT);

    // DDL has no result shape
    let meta = pool.metadata("create temp table if not exists m (v int)").await.unwrap();
    assert!(meta.columns.is_empty());

    pool.destroy().await;
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn transaction_rollback_and_commit() {
    let pool = Pool::connect_with(config()).await.unwrap();
    let table = format!("postgate_tx_{}", std::process::id());

    pool.run(format!("create table {table} (v text)").as_str()).await.unwrap();

    // failing body: the insert must not survive
    let err = pool
        .transaction(async |tx| {
            tx.run(sql().raw(&format!("insert into {table} values(")).bind("c").raw(")").build())
                .await?;
            tx.run("select definitely_not_a_column").await?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert_eq!(err.as_database().unwrap().code_class(), "42");

    let count = pool.run(format!("select count(*) n from {table}").as_str()).await.unwrap();
    assert_eq!(count.rows[0].get("n"), Some(&PgValue::Int8(0)));

    // happy path commits
    pool.transaction(async |tx| {
        tx.run(sql().raw(&format!("insert into {table} values(")).bind("c").raw(")").build())
            .await?;
        Ok(())
    })
    .await
    .unwrap();

    let count = pool.run(format!("select count(*) n from {table}").as_str()).await.unwrap();
    assert_eq!(count.rows[0].get("n"), Some(&PgValue::Int8(1)));

    pool.run(format!("drop table {table}").as_str()).await.unwrap();
    pool.destroy().await;
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn cancel_during_execution() {
    let pool = Pool::connect_with(config()).await.unwrap();

    let run = pool.run("select pg_sleep(30)");
    let cancel = run.cancel_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let err = run.await.unwrap_err();
    assert!(err.is_cancelled(), "expected cancellation, got {err}");

    // the pool keeps working afterwards
    let after = pool.run("select 1::int4 v").await.unwrap();
    assert_eq!(after.rows[0].get("v"), Some(&PgValue::Int4(1)));

    pool.destroy().await;
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn query_timeout_cancels() {
    let pool = Pool::connect_with(config().query_timeout(Duration::from_millis(200)))
        .await
        .unwrap();

    let err = pool.run("select pg_sleep(30)").await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.is_timeout());

    pool.destroy().await;
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn numeric_extremes() {
    let pool = Pool::connect_with(config()).await.unwrap();

    let huge = format!("{}.{}", "9".repeat(131_072), "9".repeat(16_383));
    for text in [huge.as_str(), "NaN", "0.123400000000"] {
        let result = pool
            .run(
                sql()
                    .raw("select ")
                    .bind(PgValue::Numeric(text.to_string()))
                    .raw("::numeric v")
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(result.rows[0].get("v"), Some(&PgValue::Numeric(text.to_string())));
    }

    // the sign of zero is normalized away
    let result = pool
        .run(sql().raw("select ").bind(PgValue::Numeric("-0".into())).raw("::numeric v").build())
        .await
        .unwrap();
    assert_eq!(result.rows[0].get("v"), Some(&PgValue::Numeric("0".into())));

    pool.destroy().await;
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn reconnect_after_idle_close() {
    let pool = Pool::connect_with(
        config()
            .min_connections(0)
            .max_connections(2)
            .idle_timeout(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    let first = pool.run("select 1::int4 v").await.unwrap();
    assert_eq!(first.rows[0].get("v"), Some(&PgValue::Int4(1)));

    // idle reaper closes the connection, the next query opens a fresh one
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = pool.run("select 2::int4 v").await.unwrap();
    assert_eq!(second.rows[0].get("v"), Some(&PgValue::Int4(2)));

    pool.destroy().await;
}

#[tokio::test]
#[ignore = "needs a live postgres server"]
async fn statements_are_shared_between_renderings() {
    let pool = Pool::connect_with(config().max_connections(1)).await.unwrap();

    // same text, different values: one prepared statement per connection
    for n in [1, 2, 3] {
        let q = sql().raw("select ").bind(n).raw("::int4 + 0 v").build();
        let result = pool.run(q).await.unwrap();
        assert_eq!(result.rows[0].get("v"), Some(&PgValue::Int4(n)));
    }

    pool.destroy().await;
}
