//! `groupby` and whole-table aggregates
//!
//! Row-level values are computed once in a `__facts` CTE; the outer query
//! groups and aggregates over its columns.

use jx_ir::query::{Query, SelectColumn};
use jx_ir::{Aggregate, Expr};
use jx_snowflake::UID;

use super::{limit, result_column, select_list, sort_term, where_clause, Compiled, Shape};
use crate::aggregate::{self, EXISTS};
use crate::expr::Scope;
use crate::mapping::MappingBuilder;
use crate::sql::Sql;
use crate::{sql, CompileError, Result};

pub(super) const FACTS: &str = "__facts";

/// `true` for `count` of the whole row.
pub(super) fn counts_rows(s: &SelectColumn) -> bool {
    s.aggregate == Aggregate::Count && matches!(&s.value, Expr::Variable(v) if v.path == ".")
}

/// The `__facts` column list for the select values: `__v{i}` per select,
/// skipping row counts.
pub(super) fn fact_values(scope: &Scope, select: &[SelectColumn]) -> Result<Vec<(Sql, String)>> {
    let mut out = vec![(Sql::qualified(&scope.alias(), UID), EXISTS.to_string())];
    for (i, s) in select.iter().enumerate() {
        if counts_rows(s) {
            continue;
        }
        if let Expr::Variable(v) = &s.value {
            if v.path == "." {
                return Err(CompileError::Unsupported(format!(
                    "{} of the whole document",
                    s.aggregate.name()
                )));
            }
        }
        out.push((scope.expr(&s.value)?, value_column(i)));
    }
    Ok(out)
}

pub(super) fn value_column(i: usize) -> String {
    format!("__v{i}")
}

/// Aggregate SQL for one select over `__facts` (or a CTE derived from it).
pub(super) fn select_aggregate(scope: &Scope, i: usize, s: &SelectColumn) -> Result<Sql> {
    let value = Sql::quote_column(&value_column(i));
    let deep = scope.is_list(&s.value)?;
    let sql = aggregate::aggregate(s.aggregate, &value, counts_rows(s), deep, s.percentile)?;
    Ok(match s.default.as_ref().filter(|d| !d.is_null()) {
        Some(default) => sql!("COALESCE({}, {})", sql, Sql::quote_value(default)),
        None => sql,
    })
}

pub(super) fn compile(query: &Query, scope: &Scope, shape: Shape) -> Result<Compiled> {
    let mut facts = fact_values(scope, &query.select)?;
    let mut groups = Vec::new();
    for (i, g) in query.groupby.iter().enumerate() {
        let name = format!("__g{i}");
        facts.push((scope.expr(&g.value)?, name.clone()));
        groups.push(Sql::quote_column(&name));
    }

    let mut mapping = MappingBuilder::default();
    let mut columns = Vec::new();
    for (g, column) in query.groupby.iter().zip(&groups) {
        columns.push((column.clone(), result_column(mapping.len())));
        mapping.push(&g.name, g.value.data_type());
    }
    for (i, s) in query.select.iter().enumerate() {
        let sql = match s.aggregate {
            Aggregate::None => {
                let position = query
                    .groupby
                    .iter()
                    .position(|g| g.value == s.value)
                    .ok_or_else(|| {
                        CompileError::Unsupported(format!(
                            "{:?} is neither aggregated nor grouped",
                            s.name
                        ))
                    })?;
                groups[position].clone()
            }
            _ => select_aggregate(scope, i, s)?,
        };
        columns.push((sql, result_column(mapping.len())));
        mapping.push(
            &s.name,
            aggregate::result_type(s.aggregate, s.value.data_type()),
        );
    }

    let mut sql = sql!(
        "WITH {} AS (SELECT {} FROM {} WHERE {}) SELECT {} FROM {}",
        Sql::quote_column(FACTS),
        select_list(&facts),
        scope.from_clause(),
        where_clause(scope, query)?,
        select_list(&columns),
        Sql::quote_column(FACTS)
    );
    if shape == Shape::Grouped {
        sql = sql!("{} GROUP BY {}", sql, Sql::join(", ", &groups));
        let order = output_order(query, &mapping_names(query))?;
        let order = if order.is_empty() {
            groups
                .iter()
                .filter_map(|g| sort_term(g.clone(), 1))
                .collect()
        } else {
            order
        };
        sql = sql!("{} ORDER BY {} LIMIT {}", sql, Sql::join(", ", order), limit(query));
    }

    Ok(Compiled {
        sql,
        shape,
        mapping: mapping.finish(),
        documents: None,
    })
}

/// Output names in result-column order.
fn mapping_names(query: &Query) -> Vec<String> {
    query
        .groupby
        .iter()
        .map(|g| g.name.clone())
        .chain(query.select.iter().map(|s| s.name.clone()))
        .collect()
}

/// `ORDER BY` over output columns; sorting on anything else is not
/// possible after grouping.
pub(super) fn output_order(query: &Query, names: &[String]) -> Result<Vec<Sql>> {
    let mut out = Vec::new();
    for key in &query.sort {
        let position = match &key.column {
            Some(name) => names.iter().position(|n| n == name),
            None => query
                .groupby
                .iter()
                .position(|g| g.value == key.value)
                .or_else(|| query.edges.iter().position(|e| e.value == key.value)),
        }
        .ok_or_else(|| CompileError::Unsupported("sort on a value that is not an output".into()))?;
        if let Some(term) = sort_term(Sql::quote_column(&result_column(position)), key.direction) {
            out.push(term);
        }
    }
    Ok(out)
}
