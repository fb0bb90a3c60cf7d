//! End-to-end queries against an in-memory database

use jx_duck::{Database, DatabaseOptions, ExecutionError, Statement};
use jx_ir::ErrorKind;
use serde_json::{json, Value};

async fn seeded() -> Database {
    let db = Database::in_memory().unwrap();
    let guids = db
        .insert(
            "t",
            &[
                json!({"a": 1, "b": "x", "c": [{"d": 10}, {"d": 20}]}),
                json!({"a": 2, "b": "y", "c": []}),
                json!({"a": 3, "b": "x", "c": [{"d": 30}]}),
            ],
        )
        .await
        .unwrap();
    assert_eq!(guids.len(), 3);
    db
}

async fn data(db: &Database, jx: Value) -> Value {
    db.query(&jx).await.unwrap()["data"].clone()
}

#[tokio::test]
async fn test_list_with_filter() {
    let db = seeded().await;
    let result = data(&db, json!({"from": "t", "where": {"eq": {"b": "x"}}, "select": ["a"], "sort": "a"})).await;
    assert_eq!(result, json!([{"a": 1}, {"a": 3}]));
}

#[tokio::test]
async fn test_groupby_count() {
    let db = seeded().await;
    let result = data(
        &db,
        json!({"from": "t", "groupby": "b", "select": {"name": "n", "value": ".", "aggregate": "count"}}),
    )
    .await;
    assert_eq!(result, json!([{"b": "x", "n": 2}, {"b": "y", "n": 1}]));
}

#[tokio::test]
async fn test_cube_with_null_partition() {
    let db = seeded().await;
    let result = db
        .query(&json!({
            "from": "t",
            "edges": [{"name": "b", "value": "b", "allowNulls": true}],
            "select": {"name": "n", "value": ".", "aggregate": "count"},
            "format": "cube"
        }))
        .await
        .unwrap();
    assert_eq!(result["meta"]["format"], "cube");
    assert_eq!(result["edges"][0]["domain"]["partitions"], json!(["x", "y"]));
    assert_eq!(result["data"]["n"], json!([2, 1, 0]));
}

#[tokio::test]
async fn test_nested_projection() {
    let db = seeded().await;
    let result = data(&db, json!({"from": "t.c", "select": ["d"], "sort": "d"})).await;
    assert_eq!(result, json!([{"d": 10}, {"d": 20}, {"d": 30}]));
}

#[tokio::test]
async fn test_aggregate_over_nested() {
    let db = seeded().await;
    let result = data(&db, json!({"from": "t", "select": {"name": "s", "value": "c.d", "aggregate": "sum"}})).await;
    assert_eq!(result, json!({"s": 60}));
}

#[tokio::test]
async fn test_null_decisive_equality() {
    let db = seeded().await;
    let result = data(&db, json!({"from": "t", "where": {"eq": ["a", {"literal": null}]}, "select": "a"})).await;
    assert_eq!(result, json!([]));

    let result = data(&db, json!({"from": "t", "where": {"missing": "c.d"}, "select": "a", "sort": "a"})).await;
    assert_eq!(result, json!([{"a": 2}]));
}

#[tokio::test]
async fn test_whole_documents() {
    let db = seeded().await;
    let result = data(&db, json!({"from": "t", "sort": "a"})).await;
    assert_eq!(
        result,
        json!([
            {"a": 1, "b": "x", "c": [{"d": 10}, {"d": 20}]},
            {"a": 2, "b": "y"},
            {"a": 3, "b": "x", "c": [{"d": 30}]}
        ])
    );
}

#[tokio::test]
async fn test_table_format() {
    let db = seeded().await;
    let result = db
        .query(&json!({"from": "t", "select": ["a", "b"], "sort": {"a": "desc"}, "limit": 2, "format": "table"}))
        .await
        .unwrap();
    assert_eq!(result["header"], json!(["a", "b"]));
    assert_eq!(result["data"], json!([[3, "x"], [2, "y"]]));
}

#[tokio::test]
async fn test_object_becomes_nested_table() {
    let db = Database::in_memory().unwrap();
    db.insert("t", &[json!({"a": 1, "c": {"d": 5}})]).await.unwrap();
    db.insert("t", &[json!({"a": 2, "c": [{"d": 6}, {"d": 7}]})]).await.unwrap();

    let result = data(&db, json!({"from": "t.c", "select": ["d"], "sort": "d"})).await;
    assert_eq!(result, json!([{"d": 5}, {"d": 6}, {"d": 7}]));
    let result = data(&db, json!({"from": "t", "select": {"name": "n", "value": "c.d", "aggregate": "count"}})).await;
    assert_eq!(result, json!({"n": 3}));
}

#[tokio::test]
async fn test_unknown_fact() {
    let db = seeded().await;
    let err = db.query(&json!({"from": "nope"})).await.unwrap_err();
    assert!(matches!(err, ExecutionError::UnknownFact(_)));
    assert_eq!(err.kind(), ErrorKind::SchemaError);
}

#[tokio::test]
async fn test_failed_insert_leaves_catalog_alone() {
    let db = seeded().await;
    let err = db.insert("t", &[json!({"a": 4}), json!([1, 2])]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaError);

    let result = data(&db, json!({"from": "t", "select": {"name": "n", "aggregate": "count"}})).await;
    assert_eq!(result, json!({"n": 3}));
}

#[tokio::test]
async fn test_transaction_error_sticks() {
    let db = seeded().await;
    let txn = db.begin().await.unwrap();
    let err = txn
        .execute(vec![Statement::new("INSERT INTO no_such_table VALUES (1)")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecuteError);
    let err = txn.query("SELECT 1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionError);
    let err = txn.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionError);

    // The database keeps working after the failed transaction.
    let rows = db.sql(r#"SELECT count(*) FROM "t""#).await.unwrap();
    assert_eq!(rows, vec![vec![json!(3)]]);
}

#[tokio::test]
async fn test_queries_wait_for_open_transaction() {
    let db = seeded().await;
    let txn = db.begin().await.unwrap();
    txn.execute(vec![Statement::new(r#"DELETE FROM "t" WHERE "a.$n" = 1"#)])
        .await
        .unwrap();

    let reader = db.clone();
    let waiting = tokio::spawn(async move { reader.sql(r#"SELECT count(*) FROM "t""#).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    txn.rollback().await.unwrap();
    let rows = waiting.await.unwrap().unwrap();
    assert_eq!(rows, vec![vec![json!(3)]]);
}

#[tokio::test]
async fn test_catalog_survives_reopen() {
    let dir = std::env::temp_dir().join(format!(
        "jx-duck-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let options = DatabaseOptions {
        path: Some(dir.join("jx.duckdb")),
        ..DatabaseOptions::default()
    };

    {
        let db = Database::open(options.clone()).unwrap();
        db.insert("t", &[json!({"a": 1, "c": [{"d": 10}]})]).await.unwrap();
        assert!(db.flush_catalog().await.unwrap() > 0);
        assert_eq!(db.flush_catalog().await.unwrap(), 0);
    }

    let db = Database::open(options).unwrap();
    db.insert("t", &[json!({"a": 2, "c": [{"d": 20}]})]).await.unwrap();
    let result = data(&db, json!({"from": "t.c", "select": ["d"], "sort": "d"})).await;
    assert_eq!(result, json!([{"d": 10}, {"d": 20}]));
    let result = data(&db, json!({"from": "t", "select": ["a"], "sort": "a"})).await;
    assert_eq!(result, json!([{"a": 1}, {"a": 2}]));

    drop(db);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_number_and_string_under_one_field() {
    let db = Database::in_memory().unwrap();
    db.insert("m", &[json!({"a": 1})]).await.unwrap();
    db.insert("m", &[json!({"a": "x"})]).await.unwrap();

    let result = data(&db, json!({"from": "m", "where": {"eq": {"a": 1}}, "select": ["a"]})).await;
    assert_eq!(result, json!([{"a": 1}]));
    let result = data(&db, json!({"from": "m", "where": {"eq": {"a": "1"}}, "select": ["a"]})).await;
    assert_eq!(result, json!([]));
    let result = data(&db, json!({"from": "m", "where": {"gt": {"a": 0}}, "select": ["a"]})).await;
    assert_eq!(result, json!([{"a": 1}]));
    let result = data(&db, json!({"from": "m", "where": {"eq": {"a": "x"}}, "select": ["a"]})).await;
    assert_eq!(result, json!([{"a": "x"}]));

    let result = data(&db, json!({"from": "m", "select": ["a"]})).await;
    let values = result.as_array().unwrap();
    assert_eq!(values.len(), 2);
    assert!(values.contains(&json!({"a": 1})), "{result}");
    assert!(values.contains(&json!({"a": "x"})), "{result}");
}

#[tokio::test]
async fn test_arrays_of_arrays_survive_whole_documents() {
    let db = Database::in_memory().unwrap();
    db.insert("n", &[json!({"a": [[1, 2], [3]], "b": 1})]).await.unwrap();
    let result = data(&db, json!({"from": "n"})).await;
    assert_eq!(result, json!([{"a": [[1, 2], [3]], "b": 1}]));
}

#[tokio::test]
async fn test_facts_sharing_a_path_survive_reopen() {
    let dir = std::env::temp_dir().join(format!(
        "jx-duck-facts-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let options = DatabaseOptions {
        path: Some(dir.join("jx.duckdb")),
        ..DatabaseOptions::default()
    };

    {
        let db = Database::open(options.clone()).unwrap();
        db.insert("t", &[json!({"a": 1})]).await.unwrap();
        assert!(db.flush_catalog().await.unwrap() > 0);
        db.insert("u", &[json!({"a": 2})]).await.unwrap();
        assert!(db.flush_catalog().await.unwrap() > 0);
    }

    let db = Database::open(options).unwrap();
    let result = data(&db, json!({"from": "t", "select": ["a"]})).await;
    assert_eq!(result, json!([{"a": 1}]));
    let result = data(&db, json!({"from": "u", "select": ["a"]})).await;
    assert_eq!(result, json!([{"a": 2}]));
    let records = db
        .sql("SELECT es_index FROM meta.columns WHERE name = 'a' ORDER BY es_index")
        .await
        .unwrap();
    assert_eq!(records, vec![vec![json!("t")], vec![json!("u")]]);

    drop(db);
    let _ = std::fs::remove_dir_all(&dir);
}
