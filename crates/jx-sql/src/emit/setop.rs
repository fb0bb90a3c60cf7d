//! Flat projection: one output row per query-path row

use jx_ir::query::{Query, Window, ALL_COLUMNS};
use jx_ir::types::{get_json_type, relative_field, starts_with_field};
use jx_ir::{merge_types, Aggregate, Expr, JsonType, Schema, Variable};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{limit, result_column, select_list, sort_term, sort_terms, where_clause, Compiled, Shape};
use crate::aggregate::window_function;
use crate::expr::{is_value_column, Scope};
use crate::mapping::MappingBuilder;
use crate::sql::Sql;
use crate::{sql, Result};

pub(super) fn compile(query: &Query, scope: &Scope) -> Result<Compiled> {
    let mut mapping = MappingBuilder::default();
    let mut columns = Vec::new();

    for s in &query.select {
        match &s.value {
            Expr::Leaves(path) => {
                for (name, value) in leaves(scope, path) {
                    project(scope, &mut columns, &mut mapping, &name, &value, None)?;
                }
            }
            _ if s.name == ALL_COLUMNS => {
                columns.push((scope.document(scope.path()), result_column(mapping.len())));
                mapping.push(".", JsonType::Object);
            }
            value => {
                let default = s.default.as_ref().filter(|d| !d.is_null());
                project(scope, &mut columns, &mut mapping, &s.name, value, default)?;
            }
        }
    }
    for w in &query.window {
        columns.push((window(scope, w)?, result_column(mapping.len())));
        let json_type = match &w.value {
            Some(v) => crate::aggregate::result_type(w.aggregate, v.data_type()),
            None => JsonType::Integer,
        };
        mapping.push(&w.name, json_type);
    }

    let mut sql = sql!(
        "SELECT {} FROM {} WHERE {}",
        select_list(&columns),
        scope.from_clause(),
        where_clause(scope, query)?
    );
    let order = sort_terms(scope, &query.sort)?;
    if !order.is_empty() {
        sql = sql!("{} ORDER BY {}", sql, Sql::join(", ", order));
    }
    sql = sql!("{} LIMIT {}", sql, limit(query));

    Ok(Compiled {
        sql,
        shape: Shape::Setop,
        mapping: mapping.finish(),
        documents: None,
    })
}

/// Add the result columns of one projected value.
///
/// A field stored under several scalar types gets one result column per
/// type; at most one of them is non-null in a row, so the assembler keeps
/// the value with its stored type.
fn project(
    scope: &Scope,
    columns: &mut Vec<(Sql, String)>,
    mapping: &mut MappingBuilder,
    name: &str,
    value: &Expr,
    default: Option<&Value>,
) -> Result<()> {
    let Some(alts) = value.alternatives() else {
        let mut sql = scope.expr(value)?;
        if let Some(default) = default {
            sql = sql!("COALESCE({}, {})", sql, Sql::quote_value(default));
        }
        columns.push((sql, result_column(mapping.len())));
        mapping.push(name, value.data_type());
        return Ok(());
    };
    for alt in alts {
        columns.push((scope.expr(alt)?, result_column(mapping.len())));
        mapping.push(name, alt.data_type());
    }
    if let Some(default) = default {
        let sql = sql!(
            "CASE WHEN {} THEN {} END",
            scope.expr(&value.missing())?,
            Sql::quote_value(default)
        );
        columns.push((sql, result_column(mapping.len())));
        mapping.push(name, get_json_type(default));
    }
    Ok(())
}

/// Scalar leaves under `path` that live in the query-path table, one
/// value per logical path.
fn leaves(scope: &Scope, path: &str) -> Vec<(String, Expr)> {
    let snowflake = scope.snowflake();
    let base = if path == "." { scope.path().to_string() } else { path.to_string() };
    let home = snowflake.nested_path_of(&base);
    let mut types: BTreeMap<String, Vec<JsonType>> = BTreeMap::new();
    for c in snowflake.columns() {
        if is_value_column(c) && c.home() == home && starts_with_field(&c.name, &base) && c.name != base {
            types.entry(c.name.clone()).or_default().push(c.json_type);
        }
    }
    types
        .into_iter()
        .map(|(name, mut stored)| {
            stored.sort();
            stored.dedup();
            let relative = relative_field(&name, &base);
            let value = match stored.as_slice() {
                [only] => Expr::Variable(Variable::typed(name, *only)),
                many if many.iter().all(|t| t.is_scalar()) => Expr::Coalesce(
                    many.iter()
                        .map(|t| Expr::Variable(Variable::typed(name.clone(), *t)))
                        .collect(),
                ),
                many => {
                    let merged = many.iter().copied().fold(many[0], merge_types);
                    let t = if merged == JsonType::Null { JsonType::String } else { merged };
                    Expr::Variable(Variable::typed(name, t))
                }
            };
            (relative, value)
        })
        .collect()
}

fn frame_bound(offset: Option<i64>, lower: bool) -> Sql {
    match offset {
        None if lower => sql!("UNBOUNDED PRECEDING"),
        None => sql!("UNBOUNDED FOLLOWING"),
        Some(0) => sql!("CURRENT ROW"),
        Some(n) if n < 0 => sql!("{} PRECEDING", Sql::int(-n)),
        Some(n) => sql!("{} FOLLOWING", Sql::int(n)),
    }
}

/// `PARTITION BY` and `ORDER BY` of a window.
fn over(scope: &Scope, w: &Window) -> Result<Sql> {
    let mut parts = Vec::new();
    if !w.edges.is_empty() {
        let edges = w
            .edges
            .iter()
            .map(|e| scope.expr(e))
            .collect::<Result<Vec<_>>>()?;
        parts.push(sql!("PARTITION BY {}", Sql::join(", ", edges)));
    }
    let mut order = sort_terms(scope, &w.sort)?;
    if order.is_empty() {
        order.extend(sort_term(Sql::qualified(&scope.alias(), jx_snowflake::UID), 1));
    }
    parts.push(sql!("ORDER BY {}", Sql::join(", ", order)));
    Ok(Sql::join(" ", parts))
}

fn window(scope: &Scope, w: &Window) -> Result<Sql> {
    let over = over(scope, w)?;
    let Some(value) = &w.value else {
        return Ok(sql!("(ROW_NUMBER() OVER ({}) - 1)", over));
    };
    let value = scope.expr(value)?;
    if w.aggregate == Aggregate::None && w.range.is_none() {
        return Ok(value);
    }
    let (min, max) = w.range.unwrap_or((None, None));
    let function = window_function(w.aggregate, &value, None)?;
    Ok(sql!(
        "{} OVER ({} ROWS BETWEEN {} AND {})",
        function,
        over,
        frame_bound(min, true),
        frame_bound(max, false)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jx_snowflake::Snowflake;
    use serde_json::json;

    fn snowflake() -> Snowflake {
        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Number).unwrap();
        s.add_column("b", JsonType::String).unwrap();
        s.add_column("o.x", JsonType::Number).unwrap();
        s.nest_column("c").unwrap();
        s.add_column("c.d", JsonType::Number).unwrap();
        s
    }

    fn sql(jx: serde_json::Value) -> String {
        let s = snowflake();
        let query = Query::normalize(&jx, &s).unwrap();
        let scope = Scope::new(&s, &query.query_path);
        compile(&query, &scope).unwrap().sql.into_string()
    }

    #[test]
    fn test_filter_sort_limit() {
        let text = sql(json!({"from": "t", "select": ["a"], "where": {"eq": {"b": "x"}}, "sort": "a"}));
        assert!(text.starts_with(r#"SELECT "__t0"."a.$n" AS "__c0" FROM "t" "__t0" WHERE "#));
        assert!(text.ends_with(r#"ORDER BY "__t0"."a.$n" ASC NULLS LAST LIMIT 10"#));
    }

    #[test]
    fn test_nested_perspective_joins_ancestors() {
        let text = sql(json!({"from": "t.c", "select": "d", "limit": 5}));
        assert_eq!(
            text,
            r#"SELECT "__t1"."d.$n" AS "__c0" FROM "t" "__t0" JOIN "t.c" "__t1" ON "__t1"."__parent__" = "__t0"."__id__" WHERE TRUE LIMIT 5"#
        );
    }

    #[test]
    fn test_star_expands_leaves() {
        let s = snowflake();
        let query = Query::normalize(&json!({"from": "t", "select": "*"}), &s).unwrap();
        let compiled = compile(&query, &Scope::new(&s, ".")).unwrap();
        let names: Vec<&str> = compiled.mapping.iter().map(|m| m.push_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "o.x"]);
    }

    #[test]
    fn test_window_frame() {
        let text = sql(json!({
            "from": "t",
            "select": "a",
            "window": {"name": "s", "value": "a", "aggregate": "sum", "sort": "a", "range": {"min": -1, "max": 0}}
        }));
        assert!(text.contains(
            r#"SUM("__t0"."a.$n") OVER (ORDER BY "__t0"."a.$n" ASC NULLS LAST ROWS BETWEEN 1 PRECEDING AND CURRENT ROW) AS "__c1""#
        ));
    }

    #[test]
    fn test_rownum() {
        let text = sql(json!({"from": "t", "select": "a", "window": {"name": "n", "value": "rownum", "edges": "b"}}));
        assert!(text.contains(
            r#"(ROW_NUMBER() OVER (PARTITION BY "__t0"."b.$s" ORDER BY "__t0"."__id__" ASC NULLS LAST) - 1) AS "__c1""#
        ));
    }

    #[test]
    fn test_default_replaces_missing() {
        let text = sql(json!({"from": "t", "select": {"name": "a", "value": "a", "default": 0}}));
        assert!(text.starts_with(r#"SELECT COALESCE("__t0"."a.$n", 0) AS "__c0""#));
    }

    #[test]
    fn test_polymorphic_select_keeps_one_column_per_type() {
        let mut s = snowflake();
        s.add_column("a", JsonType::String).unwrap();
        let query = Query::normalize(&json!({"from": "t", "select": ["a", "b"]}), &s).unwrap();
        let compiled = compile(&query, &Scope::new(&s, ".")).unwrap();
        assert!(compiled.sql.as_str().starts_with(
            r#"SELECT "__t0"."a.$n" AS "__c0", "__t0"."a.$s" AS "__c1", "__t0"."b.$s" AS "__c2""#
        ));
        let pushed: Vec<(usize, JsonType)> = compiled
            .mapping
            .iter()
            .map(|m| (m.push_column, m.json_type))
            .collect();
        assert_eq!(
            pushed,
            vec![(0, JsonType::Number), (0, JsonType::String), (1, JsonType::String)]
        );
    }

    #[test]
    fn test_document_select_with_other_columns() {
        let s = snowflake();
        let query = Query::normalize(&json!({"from": "t", "select": [".", "a"]}), &s).unwrap();
        let compiled = compile(&query, &Scope::new(&s, ".")).unwrap();
        assert_eq!(compiled.mapping[0].push_name, ".");
        assert!(compiled.sql.as_str().starts_with("SELECT struct_pack("));
    }
}
