//! Compile queries against a shredded snowflake and assemble hand-made result rows

use jx_ir::Query;
use jx_snowflake::{shred, Snowflake};
use jx_sql::{assemble, compile, Shape};
use serde_json::{json, Value};

fn snowflake() -> Snowflake {
    let mut s = Snowflake::new("t");
    shred(
        &mut s,
        &[
            json!({"a": 1, "b": "x", "c": [{"d": 10}, {"d": 20}]}),
            json!({"a": 2, "b": "y", "c": []}),
            json!({"a": 3, "b": "x", "c": [{"d": 30}]}),
        ],
    )
    .unwrap();
    s
}

fn query(s: &Snowflake, jx: Value) -> Query {
    Query::normalize(&jx, s).unwrap()
}

#[test]
fn test_list_filter() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(&s, json!({"from": "t", "where": {"eq": {"b": "x"}}, "select": ["a"], "sort": "a"}));
    let compiled = compile(&q, &s)?;
    assert_eq!(compiled.shape, Shape::Setop);

    let result = assemble(&compiled, &q, vec![vec![json!(1.0)], vec![json!(3.0)]])?;
    assert_eq!(result["data"], json!([{"a": 1}, {"a": 3}]));
    assert_eq!(result["meta"]["format"], "list");
    Ok(())
}

#[test]
fn test_groupby_rows() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(&s, json!({"from": "t", "groupby": "b", "select": {"name": "n", "value": ".", "aggregate": "count"}}));
    let compiled = compile(&q, &s)?;
    assert_eq!(compiled.shape, Shape::Grouped);

    let rows = vec![vec![json!("x"), json!(2)], vec![json!("y"), json!(1)]];
    let result = assemble(&compiled, &q, rows)?;
    assert_eq!(result["data"], json!([{"b": "x", "n": 2}, {"b": "y", "n": 1}]));
    Ok(())
}

#[test]
fn test_cube_with_null_partition() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(
        &s,
        json!({
            "from": "t",
            "edges": [{"name": "b", "value": "b", "allowNulls": true}],
            "select": {"name": "n", "value": ".", "aggregate": "count"},
            "format": "cube"
        }),
    );
    let compiled = compile(&q, &s)?;
    assert_eq!(compiled.shape, Shape::Edges);

    let rows = vec![
        vec![json!(0), json!("x"), json!(2)],
        vec![json!(1), json!("y"), json!(1)],
        vec![json!(2), Value::Null, json!(0)],
    ];
    let result = assemble(&compiled, &q, rows)?;
    assert_eq!(result["edges"][0]["domain"]["partitions"], json!(["x", "y"]));
    assert_eq!(result["data"]["n"], json!([2, 1, 0]));
    assert_eq!(result["select"], json!({"name": "n"}));
    Ok(())
}

#[test]
fn test_cube_has_a_cell_per_partition_pair() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(
        &s,
        json!({
            "from": "t",
            "edges": [
                {"name": "b", "value": "b", "domain": {"type": "set", "partitions": ["x", "y"]}},
                {"name": "a", "value": "a", "domain": {"type": "range", "min": 0, "max": 4, "interval": 2}}
            ],
            "select": {"name": "n", "aggregate": "count"}
        }),
    );
    let compiled = compile(&q, &s)?;

    // (2 + 1) * (2 + 1) cells, first edge fastest.
    let mut rows = Vec::new();
    for a in 0..3 {
        for b in 0..3 {
            let p = if a < 2 { json!(a * 2) } else { Value::Null };
            rows.push(vec![json!(b), Value::Null, json!(a), p, json!(a * 3 + b)]);
        }
    }
    let result = assemble(&compiled, &q, rows)?;
    assert_eq!(result["data"]["n"], json!([[0, 3, 6], [1, 4, 7], [2, 5, 8]]));
    assert_eq!(
        result["edges"][1]["domain"]["partitions"],
        json!([{"min": 0, "max": 2}, {"min": 2, "max": 4}])
    );
    Ok(())
}

#[test]
fn test_nested_projection() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(&s, json!({"from": "t.c", "select": ["d"], "sort": "d"}));
    let compiled = compile(&q, &s)?;
    assert!(compiled.sql.as_str().contains(r#"JOIN "t.c" "__t1""#));

    let rows = vec![vec![json!(10.0)], vec![json!(20.0)], vec![json!(30.0)]];
    let result = assemble(&compiled, &q, rows)?;
    assert_eq!(result["data"], json!([{"d": 10}, {"d": 20}, {"d": 30}]));
    Ok(())
}

#[test]
fn test_aggregate_is_one_object() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(&s, json!({"from": "t", "select": {"name": "s", "value": "c.d", "aggregate": "sum"}}));
    let compiled = compile(&q, &s)?;
    assert_eq!(compiled.shape, Shape::Aggregate);

    let result = assemble(&compiled, &q, vec![vec![json!(60.0)]])?;
    assert_eq!(result["data"], json!({"s": 60}));
    Ok(())
}

#[test]
fn test_missing_nested_compiles_to_not_exists() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(&s, json!({"from": "t", "where": {"missing": "c.d"}, "select": "a", "sort": "a"}));
    let compiled = compile(&q, &s)?;
    assert!(compiled.sql.as_str().contains("NOT EXISTS (SELECT 1 FROM \"t.c\""));
    Ok(())
}

#[test]
fn test_documents_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(&s, json!({"from": "t"}));
    let compiled = compile(&q, &s)?;
    let layout = compiled.documents.clone().expect("document layout");
    let width = compiled.mapping.len();

    let row = |kind: usize, uid: i64, pid: Option<i64>, order: &[Value], values: &[(&str, Value)]| {
        let mut row = vec![Value::Null; width];
        row[layout.kind] = json!(kind);
        row[layout.uid] = json!(uid);
        row[layout.pid] = pid.map_or(Value::Null, Value::from);
        for (i, v) in order.iter().enumerate() {
            row[layout.pid + 1 + i] = v.clone();
        }
        for (name, value) in values {
            let (pull, _) = layout.tables[kind]
                .columns
                .iter()
                .find(|(_, c)| c == name)
                .expect("column");
            row[*pull] = value.clone();
        }
        row
    };
    let rows = vec![
        row(0, 1, None, &[json!(1)], &[("a.$n", json!(1.0)), ("b.$s", json!("x"))]),
        row(1, 1, Some(1), &[json!(1), json!(1), json!(0)], &[("d.$n", json!(10.0))]),
        row(1, 2, Some(1), &[json!(1), json!(1), json!(1)], &[("d.$n", json!(20.0))]),
        row(0, 2, None, &[json!(2)], &[("a.$n", json!(2.0)), ("b.$s", json!("y"))]),
    ];
    let result = assemble(&compiled, &q, rows)?;
    assert_eq!(
        result["data"],
        json!([
            {"a": 1, "b": "x", "c": [{"d": 10}, {"d": 20}]},
            {"a": 2, "b": "y"}
        ])
    );
    Ok(())
}

#[test]
fn test_adding_deeper_tables_keeps_shallow_sql() -> Result<(), Box<dyn std::error::Error>> {
    let s = snowflake();
    let q = query(&s, json!({"from": "t", "select": ["a", "b"], "where": {"gt": {"a": 1}}}));
    let before = compile(&q, &s)?.sql;

    let mut deeper = s.clone();
    shred(&mut deeper, &[json!({"a": 4, "c": [{"d": 1, "e": [{"f": 1}]}]})])?;
    let after = compile(&q, &deeper)?.sql;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn test_cross_branch_select_is_rejected() {
    let mut s = snowflake();
    shred(&mut s, &[json!({"g": [{"h": 1}]})]).unwrap();
    let q = query(&s, json!({"from": "t.c", "select": ["d"]}));
    let mut bad = q.clone();
    bad.select[0].value = jx_ir::Expr::Variable(jx_ir::Variable::typed("g.h", jx_ir::JsonType::Number));
    let err = compile(&bad, &s).unwrap_err();
    assert_eq!(err.kind(), jx_ir::ErrorKind::DepthMismatch);
}
