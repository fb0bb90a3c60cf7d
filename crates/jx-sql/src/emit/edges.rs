//! Edges: dense cubes
//!
//! Each fact row gets a partition index per edge (`__i{k}`). Every edge
//! domain becomes a CTE listing its partitions, plus the null partition
//! when the edge allows nulls. The cross product of the domains, left joined
//! to the aggregated facts, has one row per cube cell, so cells without
//! facts still appear.

use jx_ir::query::{Domain, Edge, Query};
use jx_ir::JsonType;
use serde_json::Value;

use super::grouped::{fact_values, output_order, select_aggregate, FACTS};
use super::{limit, result_column, select_list, where_clause, Compiled, Shape};
use crate::aggregate;
use crate::expr::Scope;
use crate::mapping::MappingBuilder;
use crate::sql::Sql;
use crate::{sql, Result};

const INDEXED: &str = "__indexed";
const PRIMARY: &str = "__primary";

fn edge_column(k: usize) -> String {
    format!("__e{k}")
}

fn index_column(k: usize) -> String {
    format!("__i{k}")
}

fn partition_column(k: usize) -> String {
    format!("__p{k}")
}

fn domain_name(k: usize) -> String {
    format!("__d{k}")
}

/// Partition index of the edge value `e`, `NULL` outside the domain unless
/// the edge collects those in the null partition.
fn index(edge: &Edge, e: &Sql, json_type: JsonType) -> Sql {
    let outside = |n: usize| {
        if edge.allow_nulls {
            Sql::int(n as i64)
        } else {
            sql!("NULL")
        }
    };
    match &edge.domain {
        Domain::Default => {
            let rank = sql!("(DENSE_RANK() OVER (ORDER BY {} ASC NULLS LAST) - 1)", e);
            if edge.allow_nulls {
                rank
            } else {
                sql!("CASE WHEN {} IS NULL THEN NULL ELSE {} END", e, rank)
            }
        }
        Domain::Set { partitions } => {
            let whens: Vec<Sql> = partitions
                .iter()
                .enumerate()
                .filter(|(_, p)| comparable(p, json_type))
                .map(|(i, p)| sql!("WHEN {} = {} THEN {}", e, Sql::quote_value(p), Sql::int(i as i64)))
                .collect();
            if whens.is_empty() {
                outside(partitions.len())
            } else {
                sql!(
                    "CASE {} ELSE {} END",
                    Sql::join(" ", whens),
                    outside(partitions.len())
                )
            }
        }
        domain => {
            let (min, max, interval) = domain.bounds().unwrap_or((0.0, 0.0, 1.0));
            let n = domain.interval_count().unwrap_or(0);
            sql!(
                "CASE WHEN {} >= {} AND {} < {} THEN CAST(FLOOR(({} - {}) / {}) AS BIGINT) ELSE {} END",
                e,
                Sql::float(min),
                e,
                Sql::float(max),
                e,
                Sql::float(min),
                Sql::float(interval),
                outside(n)
            )
        }
    }
}

/// Set partitions that can equal a value of `json_type` without a cast error.
fn comparable(partition: &Value, json_type: JsonType) -> bool {
    match partition {
        Value::Number(_) => json_type.is_numeric(),
        Value::String(_) => json_type == JsonType::String,
        Value::Bool(_) => json_type == JsonType::Boolean,
        _ => false,
    }
}

/// Rows `(__i{k}, __p{k})` of one edge domain.
fn domain(k: usize, edge: &Edge) -> Sql {
    let i = Sql::quote_column(&index_column(k));
    let p = Sql::quote_column(&partition_column(k));
    let e = Sql::quote_column(&edge_column(k));
    let indexed = Sql::quote_column(INDEXED);
    match &edge.domain {
        Domain::Default => {
            let observed = sql!(
                "SELECT DISTINCT {}, {} AS {} FROM {} WHERE {} IS NOT NULL",
                i,
                e,
                p,
                indexed,
                e
            );
            if edge.allow_nulls {
                sql!(
                    "{} UNION ALL SELECT (SELECT COUNT(DISTINCT {}) FROM {}) AS {}, NULL AS {}",
                    observed,
                    e,
                    Sql::quote_column(FACTS),
                    i,
                    p
                )
            } else {
                observed
            }
        }
        Domain::Set { partitions } => {
            let n = partitions.len() + usize::from(edge.allow_nulls);
            sql!(
                "SELECT range AS {}, NULL AS {} FROM range(0, {})",
                i,
                p,
                Sql::int(n as i64)
            )
        }
        domain => {
            let (min, _, interval) = domain.bounds().unwrap_or((0.0, 0.0, 1.0));
            let parts = domain.interval_count().unwrap_or(0);
            let n = parts + usize::from(edge.allow_nulls);
            sql!(
                "SELECT range AS {}, CASE WHEN range < {} THEN {} + range * {} END AS {} FROM range(0, {})",
                i,
                Sql::int(parts as i64),
                Sql::float(min),
                Sql::float(interval),
                p,
                Sql::int(n as i64)
            )
        }
    }
}

pub(super) fn compile(query: &Query, scope: &Scope) -> Result<Compiled> {
    let mut facts = fact_values(scope, &query.select)?;
    for (k, edge) in query.edges.iter().enumerate() {
        facts.push((scope.expr(&edge.value)?, edge_column(k)));
    }
    let facts_cte = sql!(
        "{} AS (SELECT {} FROM {} WHERE {})",
        Sql::quote_column(FACTS),
        select_list(&facts),
        scope.from_clause(),
        where_clause(scope, query)?
    );

    let indexes: Vec<(Sql, String)> = query
        .edges
        .iter()
        .enumerate()
        .map(|(k, edge)| {
            let e = Sql::quote_column(&edge_column(k));
            (index(edge, &e, edge.value.data_type()), index_column(k))
        })
        .collect();
    let indexed_cte = sql!(
        "{} AS (SELECT *, {} FROM {})",
        Sql::quote_column(INDEXED),
        select_list(&indexes),
        Sql::quote_column(FACTS)
    );

    let domain_ctes: Vec<Sql> = query
        .edges
        .iter()
        .enumerate()
        .map(|(k, edge)| sql!("{} AS ({})", Sql::quote_column(&domain_name(k)), domain(k, edge)))
        .collect();

    let index_columns: Vec<Sql> = (0..query.edges.len())
        .map(|k| Sql::quote_column(&index_column(k)))
        .collect();
    let mut aggregates = Vec::new();
    for (i, s) in query.select.iter().enumerate() {
        aggregates.push((select_aggregate(scope, i, s)?, format!("__a{i}")));
    }
    let group_list = Sql::join(", ", &index_columns);
    let primary_columns = if aggregates.is_empty() {
        group_list.clone()
    } else {
        sql!("{}, {}", group_list, select_list(&aggregates))
    };
    let primary_cte = sql!(
        "{} AS (SELECT {} FROM {} GROUP BY {})",
        Sql::quote_column(PRIMARY),
        primary_columns,
        Sql::quote_column(INDEXED),
        group_list
    );

    // Cells: the cross product of every domain, left joined to the facts.
    let mut mapping = MappingBuilder::default();
    let mut columns = Vec::new();
    let primary = Sql::quote_column(PRIMARY);
    let mut from = Sql::default();
    let mut on = Vec::new();
    for (k, edge) in query.edges.iter().enumerate() {
        let d = Sql::quote_column(&domain_name(k));
        from = if k == 0 {
            d.clone()
        } else {
            sql!("{} CROSS JOIN {}", from, d)
        };
        let i = Sql::qualified(&d, &index_column(k));
        on.push(sql!(
            "{} IS NOT DISTINCT FROM {}",
            Sql::qualified(&primary, &index_column(k)),
            i
        ));
        columns.push((i, result_column(mapping.len())));
        mapping.push_child(&edge.name, "index", JsonType::Integer, true);
        columns.push((
            Sql::qualified(&d, &partition_column(k)),
            result_column(mapping.len()),
        ));
        mapping.push_edge(&edge.name, edge.value.data_type());
    }
    for (i, s) in query.select.iter().enumerate() {
        let value = Sql::qualified(&primary, &format!("__a{i}"));
        let value = match s.default.as_ref().filter(|d| !d.is_null()) {
            Some(default) => sql!("COALESCE({}, {})", value, Sql::quote_value(default)),
            None => value,
        };
        columns.push((value, result_column(mapping.len())));
        mapping.push(&s.name, aggregate::result_type(s.aggregate, s.value.data_type()));
    }

    // The first edge varies fastest.
    let mut order: Vec<Sql> = (0..query.edges.len())
        .rev()
        .map(|k| {
            sql!(
                "{} ASC NULLS LAST",
                Sql::qualified(&Sql::quote_column(&domain_name(k)), &index_column(k))
            )
        })
        .collect();
    let names: Vec<String> = query.select.iter().map(|s| s.name.clone()).collect();
    if !query.sort.is_empty() && query.format != jx_ir::Format::Cube {
        let mut sorted = output_order(query, &names)?;
        sorted.append(&mut order);
        order = sorted;
    }

    let mut sql = sql!(
        "WITH {}, {}, {}, {} SELECT {} FROM {} LEFT JOIN {} ON {} ORDER BY {}",
        facts_cte,
        indexed_cte,
        Sql::join(", ", domain_ctes),
        primary_cte,
        select_list(&columns),
        from,
        primary,
        Sql::join(" AND ", on),
        Sql::join(", ", order)
    );
    if query.format != jx_ir::Format::Cube {
        sql = sql!("{} LIMIT {}", sql, limit(query));
    }

    Ok(Compiled {
        sql,
        shape: Shape::Edges,
        mapping: mapping.finish(),
        documents: None,
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
        s.add_column("b", JsonType::String).unwrap();
        s
    }

    fn compiled(jx: serde_json::Value) -> Compiled {
        let s = snowflake();
        let query = Query::normalize(&jx, &s).unwrap();
        compile(&query, &Scope::new(&s, ".")).unwrap()
    }

    #[test]
    fn test_default_domain_has_null_partition() {
        let c = compiled(json!({
            "from": "t",
            "edges": [{"name": "b", "value": "b", "allowNulls": true}],
            "select": {"name": "n", "value": ".", "aggregate": "count"},
            "format": "cube"
        }));
        let text = c.sql.as_str();
        assert!(text.contains(r#"(DENSE_RANK() OVER (ORDER BY "__e0" ASC NULLS LAST) - 1) AS "__i0""#));
        assert!(text.contains(r#"UNION ALL SELECT (SELECT COUNT(DISTINCT "__e0") FROM "__facts") AS "__i0", NULL AS "__p0""#));
        assert!(text.contains(r#"FROM "__d0" LEFT JOIN "__primary" ON "__primary"."__i0" IS NOT DISTINCT FROM "__d0"."__i0""#));
        assert!(!text.contains("LIMIT"));
        let edges: Vec<bool> = c.mapping.iter().map(|m| m.is_edge).collect();
        assert_eq!(edges, vec![true, true, false]);
    }

    #[test]
    fn test_range_domain_index() {
        let c = compiled(json!({
            "from": "t",
            "edges": [{"name": "a", "value": "a", "domain": {"type": "range", "min": 0, "max": 10, "interval": 5}}],
            "select": {"aggregate": "count"}
        }));
        let text = c.sql.as_str();
        assert!(text.contains(
            r#"CASE WHEN "__e0" >= CAST(0.0 AS DOUBLE) AND "__e0" < CAST(10.0 AS DOUBLE) THEN CAST(FLOOR(("__e0" - CAST(0.0 AS DOUBLE)) / CAST(5.0 AS DOUBLE)) AS BIGINT) ELSE 2 END"#
        ));
        assert!(text.contains("FROM range(0, 3)"));
    }

    #[test]
    fn test_set_domain_skips_incomparable_partitions() {
        let c = compiled(json!({
            "from": "t",
            "edges": [{"name": "b", "value": "b", "allowNulls": false, "domain": {"type": "set", "partitions": ["x", 1]}}],
            "select": {"aggregate": "count"}
        }));
        let text = c.sql.as_str();
        assert!(text.contains(r#"CASE WHEN "__e0" = 'x' THEN 0 ELSE NULL END AS "__i0""#));
        assert!(text.contains("FROM range(0, 2)"));
    }

    #[test]
    fn test_two_edges_order_last_edge_first() {
        let c = compiled(json!({
            "from": "t",
            "edges": ["a", "b"],
            "select": {"aggregate": "count"}
        }));
        assert!(c
            .sql
            .as_str()
            .ends_with(r#"ORDER BY "__d1"."__i1" ASC NULLS LAST, "__d0"."__i0" ASC NULLS LAST"#));
    }
}
