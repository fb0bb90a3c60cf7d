//! Whole-document reconstruction
//!
//! The selected query-path rows go into a `__rows` CTE that fixes their
//! output order. One `UNION ALL` branch per table at or below the query path
//! then emits the rows of that table belonging to them. Sorting by the order
//! chain `(__o0, __k1, __o1, ...)` yields every document's rows in pre-order,
//! parents before children.

use jx_ir::query::Query;
use jx_ir::types::{relative_field, starts_with_field};
use jx_ir::JsonType;
use jx_snowflake::{ORDER, PARENT, UID};
use serde::Serialize;

use super::{limit, select_list, sort_terms, where_clause, Compiled, Shape};
use crate::expr::{alias, is_value_column, Scope};
use crate::mapping::MappingBuilder;
use crate::sql::Sql;
use crate::{sql, Result};

const ROWS: &str = "__rows";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableLayout {
    pub nested_path: String,
    /// Where the rows of this table go inside a parent row; `.` for the
    /// query-path table.
    pub path: String,
    pub parent: Option<usize>,
    /// `(pull, physical column)` for every value column of the table.
    pub columns: Vec<(usize, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLayout {
    /// Pull of the table index column.
    pub kind: usize,
    pub uid: usize,
    pub pid: usize,
    pub tables: Vec<TableLayout>,
}

fn order_column(depth: usize) -> String {
    format!("__o{depth}")
}

fn kind_column(depth: usize) -> String {
    format!("__k{depth}")
}

pub(super) fn compile(query: &Query, scope: &Scope) -> Result<Compiled> {
    let snowflake = scope.snowflake();
    let root = scope.path().to_string();
    let mut paths = vec![root.clone()];
    paths.extend(
        snowflake
            .nested_paths()
            .into_iter()
            .filter(|n| n != &root && starts_with_field(n, &root)),
    );
    let base_depth = snowflake.nested_path_list(&root).len();
    let depth_of = |nested: &str| snowflake.nested_path_list(nested).len() - base_depth;
    let max_depth = paths.iter().map(|p| depth_of(p)).max().unwrap_or(0);

    // Result columns shared by every branch.
    let mut mapping = MappingBuilder::default();
    let kind = mapping.push(&kind_column(0), JsonType::Integer);
    let uid = mapping.push("__uid", JsonType::Integer);
    let pid = mapping.push("__pid", JsonType::Integer);
    mapping.push(&order_column(0), JsonType::Integer);
    for depth in 1..=max_depth {
        mapping.push(&kind_column(depth), JsonType::Integer);
        mapping.push(&order_column(depth), JsonType::Integer);
    }
    let mut tables = Vec::new();
    for (index, nested) in paths.iter().enumerate() {
        let parent = match index {
            0 => None,
            _ => {
                let p = snowflake.parent_nested_path(nested);
                paths.iter().position(|q| q == &p)
            }
        };
        let mut columns = Vec::new();
        for c in snowflake.columns() {
            if is_value_column(c) && c.home() == nested.as_str() {
                let pull = mapping.push_child(&format!("__c{}", mapping.len()), &c.es_column, c.json_type, false);
                columns.push((pull, c.es_column.clone()));
            }
        }
        let path = match parent {
            Some(p) => relative_field(nested, &paths[p]),
            None => ".".to_string(),
        };
        tables.push(TableLayout {
            nested_path: nested.clone(),
            path,
            parent,
            columns,
        });
    }
    let width = mapping.len();

    let rows_alias = Sql::quote_column(ROWS);
    let root_alias = scope.alias();
    let mut row_order = sort_terms(scope, &query.sort)?;
    row_order.push(sql!("{} ASC", Sql::qualified(&root_alias, UID)));
    let rows_cte = sql!(
        "{} AS (SELECT {} AS \"__id\", ROW_NUMBER() OVER (ORDER BY {}) AS {} FROM {} WHERE {} ORDER BY {} LIMIT {})",
        rows_alias,
        Sql::qualified(&root_alias, UID),
        Sql::join(", ", row_order),
        Sql::quote_column(&order_column(0)),
        scope.from_clause(),
        where_clause(scope, query)?,
        Sql::quote_column(&order_column(0)),
        limit(query)
    );

    let mut branches = Vec::new();
    for (index, table) in tables.iter().enumerate() {
        // The chain of tables from the query path down to this one.
        let mut chain = vec![index];
        while let Some(parent) = tables[chain[0]].parent {
            chain.insert(0, parent);
        }
        let a = alias(snowflake, &table.nested_path);
        let mut from = sql!(
            "{} JOIN {} {} ON {} = {}",
            rows_alias,
            scope.table(&root),
            root_alias,
            Sql::qualified(&root_alias, UID),
            Sql::qualified(&rows_alias, "__id")
        );
        for pair in chain.windows(2) {
            let parent = alias(snowflake, &tables[pair[0]].nested_path);
            let child = alias(snowflake, &tables[pair[1]].nested_path);
            from = sql!(
                "{} JOIN {} {} ON {} = {}",
                from,
                scope.table(&tables[pair[1]].nested_path),
                child,
                Sql::qualified(&child, PARENT),
                Sql::qualified(&parent, UID)
            );
        }

        let mut values: Vec<Sql> = vec![sql!("NULL"); width];
        values[kind] = Sql::int(index as i64);
        values[uid] = Sql::qualified(&a, UID);
        if index > 0 {
            values[pid] = Sql::qualified(&a, PARENT);
        }
        values[pid + 1] = Sql::qualified(&rows_alias, &order_column(0));
        for (depth, &t) in chain.iter().enumerate().skip(1) {
            let ancestor = alias(snowflake, &tables[t].nested_path);
            values[pid + 2 * depth] = Sql::int(t as i64);
            values[pid + 2 * depth + 1] = Sql::qualified(&ancestor, ORDER);
        }
        for (pull, es_column) in &table.columns {
            values[*pull] = Sql::qualified(&a, es_column);
        }
        let columns: Vec<(Sql, String)> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (v, super::result_column(i)))
            .collect();
        branches.push(sql!("SELECT {} FROM {}", select_list(&columns), from));
    }

    let mut order = vec![sql!("{} ASC", Sql::quote_column(&super::result_column(pid + 1)))];
    for depth in 1..=max_depth {
        order.push(sql!(
            "{} ASC NULLS FIRST",
            Sql::quote_column(&super::result_column(pid + 2 * depth))
        ));
        order.push(sql!(
            "{} ASC NULLS FIRST",
            Sql::quote_column(&super::result_column(pid + 2 * depth + 1))
        ));
    }
    let sql = sql!(
        "WITH {} {} ORDER BY {}",
        rows_cte,
        Sql::join(" UNION ALL ", branches),
        Sql::join(", ", order)
    );

    Ok(Compiled {
        sql,
        shape: Shape::Documents,
        mapping: mapping.finish(),
        documents: Some(DocumentLayout {
            kind,
            uid,
            pid,
            tables,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jx_snowflake::Snowflake;
    use serde_json::json;

    fn snowflake() -> Snowflake {
        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Number).unwrap();
        s.nest_column("c").unwrap();
        s.add_column("c.d", JsonType::Number).unwrap();
        s.nest_column("c.e").unwrap();
        s.add_column("c.e.f", JsonType::String).unwrap();
        s
    }

    #[test]
    fn test_layout() {
        let s = snowflake();
        let query = Query::normalize(&json!({"from": "t"}), &s).unwrap();
        let compiled = compile(&query, &Scope::new(&s, ".")).unwrap();
        let layout = compiled.documents.unwrap();
        let paths: Vec<(&str, &str, Option<usize>)> = layout
            .tables
            .iter()
            .map(|t| (t.nested_path.as_str(), t.path.as_str(), t.parent))
            .collect();
        assert_eq!(paths, vec![(".", ".", None), ("c", "c", Some(0)), ("c.e", "e", Some(1))]);
        assert_eq!((layout.kind, layout.uid, layout.pid), (0, 1, 2));
        // Order chain: __o0, then (__k, __o) per depth.
        assert_eq!(layout.tables[0].columns, vec![(8, "a.$n".to_string())]);
        assert_eq!(layout.tables[2].columns, vec![(10, "f.$s".to_string())]);
    }

    #[test]
    fn test_branch_per_table() {
        let s = snowflake();
        let query = Query::normalize(&json!({"from": "t", "limit": 3}), &s).unwrap();
        let text = compile(&query, &Scope::new(&s, ".")).unwrap().sql.into_string();
        assert_eq!(text.matches("UNION ALL").count(), 2);
        assert!(text.starts_with(r#"WITH "__rows" AS (SELECT "__t0"."__id__" AS "__id", ROW_NUMBER() OVER (ORDER BY "__t0"."__id__" ASC) AS "__o0" FROM "t" "__t0" WHERE TRUE ORDER BY "__o0" LIMIT 3)"#));
        assert!(text.ends_with(r#"ORDER BY "__c3" ASC, "__c4" ASC NULLS FIRST, "__c5" ASC NULLS FIRST, "__c6" ASC NULLS FIRST, "__c7" ASC NULLS FIRST"#));
    }
}
