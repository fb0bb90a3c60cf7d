//! SQL emission
//!
//! [`compile`] picks one statement shape per query and returns the SQL with
//! everything the assembler needs to rebuild the response.

mod documents;
mod edges;
mod grouped;
mod setop;

use jx_ir::query::{Query, SortKey, ALL_COLUMNS};
use jx_ir::{Expr, JxError, Schema};
use jx_snowflake::Snowflake;
use serde::Serialize;
use tracing::debug;

use crate::expr::Scope;
use crate::mapping::ColumnMapping;
use crate::sql::Sql;
use crate::{sql, CompileError, Result};

pub use documents::{DocumentLayout, TableLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// One output row per query-path row.
    Setop,
    /// Whole documents rebuilt from every table under the query path.
    Documents,
    /// Aggregates without groups: exactly one output row.
    Aggregate,
    Grouped,
    /// Dense cube over the edge domains.
    Edges,
}

impl Shape {
    pub fn of(query: &Query) -> Shape {
        if !query.edges.is_empty() {
            Shape::Edges
        } else if !query.groupby.is_empty() {
            Shape::Grouped
        } else if query.is_aggregate() {
            Shape::Aggregate
        } else if query.window.is_empty()
            && query.select.len() == 1
            && query.select[0].name == ALL_COLUMNS
        {
            Shape::Documents
        } else {
            Shape::Setop
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compiled {
    pub sql: Sql,
    pub shape: Shape,
    pub mapping: Vec<ColumnMapping>,
    /// Set for [`Shape::Documents`].
    pub documents: Option<DocumentLayout>,
}

/// Compile a normalized query into one DuckDB statement.
pub fn compile(query: &Query, snowflake: &Snowflake) -> Result<Compiled> {
    if query.fact != snowflake.fact_table() {
        return Err(JxError::Schema(format!("Unknown table {:?}", query.fact)).into());
    }
    if query.query_path != "." && !snowflake.is_nested(&query.query_path) {
        return Err(JxError::Schema(format!("{:?} is not a nested table", query.from)).into());
    }

    let shape = Shape::of(query);
    if !query.window.is_empty() && shape != Shape::Setop {
        return Err(CompileError::Unsupported(
            "window with groupby, edges or aggregates".into(),
        ));
    }
    let scope = Scope::new(snowflake, &query.query_path);
    let compiled = match shape {
        Shape::Setop => setop::compile(query, &scope)?,
        Shape::Documents => documents::compile(query, &scope)?,
        Shape::Aggregate | Shape::Grouped => grouped::compile(query, &scope, shape)?,
        Shape::Edges => edges::compile(query, &scope)?,
    };
    debug!(
        fingerprint = %query.fingerprint,
        shape = ?compiled.shape,
        sql = %compiled.sql,
        "compiled query"
    );
    Ok(compiled)
}

/// `AS "name"` column list.
fn select_list(columns: &[(Sql, String)]) -> Sql {
    Sql::join(
        ", ",
        columns
            .iter()
            .map(|(value, name)| sql!("{} AS {}", value, Sql::quote_column(name))),
    )
}

/// Name of result column `i`.
fn result_column(i: usize) -> String {
    format!("__c{i}")
}

fn sort_term(value: Sql, direction: i8) -> Option<Sql> {
    match direction {
        d if d > 0 => Some(sql!("{} ASC NULLS LAST", value)),
        d if d < 0 => Some(sql!("{} DESC NULLS LAST", value)),
        _ => None,
    }
}

/// `ORDER BY` terms for document-level sort keys.
fn sort_terms(scope: &Scope, sort: &[SortKey]) -> Result<Vec<Sql>> {
    let mut out = Vec::new();
    for key in sort {
        if let Some(term) = sort_term(scope.expr(&key.value)?, key.direction) {
            out.push(term);
        }
    }
    Ok(out)
}

fn where_clause(scope: &Scope, query: &Query) -> Result<Sql> {
    match &query.where_ {
        Expr::True => Ok(sql!("TRUE")),
        w => scope.expr(w),
    }
}

fn limit(query: &Query) -> Sql {
    Sql::int(i64::try_from(query.limit).unwrap_or(i64::MAX))
}
