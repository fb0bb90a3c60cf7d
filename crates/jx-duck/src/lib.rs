//! DuckDB engine for JX
//!
//! One worker thread owns the connection and runs commands in submission
//! order. Transactions hold the connection until they end; anything else
//! submitted meanwhile waits behind them. The column catalog lives in
//! memory as copy-on-write snapshots and is persisted to `meta.columns` by a
//! background flusher.

use std::panic::Location;

use jx_ir::{ErrorKind, JxError};
use jx_snowflake::SchemaError;
use jx_sql::CompileError;
use thiserror::Error;

mod catalog;
mod convert;
mod database;
mod ddl;
mod worker;

pub use catalog::Catalog;
pub use convert::{to_json, to_param};
pub use database::{Database, DatabaseOptions, Transaction};
pub use worker::{Rows, Statement};

/// Longest SQL text carried in an error.
const SQL_IN_ERRORS: usize = 200;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Query(#[from] JxError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Database error: {message}\n  sql: {sql}\n  caller: {caller}")]
    Execute {
        message: String,
        sql: String,
        caller: &'static Location<'static>,
    },

    #[error("Transaction already failed: {cause}")]
    Transaction { cause: String },

    #[error("Unknown fact table: {0}")]
    UnknownFact(String),

    #[error("Database worker stopped")]
    WorkerGone,
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Query(e) => e.kind(),
            ExecutionError::Compile(e) => e.kind(),
            ExecutionError::Schema(e) => e.kind(),
            ExecutionError::Execute { .. } | ExecutionError::WorkerGone => ErrorKind::ExecuteError,
            ExecutionError::Transaction { .. } => ErrorKind::TransactionError,
            ExecutionError::UnknownFact(_) => ErrorKind::SchemaError,
        }
    }

    pub(crate) fn execute(
        error: impl std::fmt::Display,
        sql: &str,
        caller: &'static Location<'static>,
    ) -> Self {
        ExecutionError::Execute {
            message: error.to_string(),
            sql: truncate(sql, SQL_IN_ERRORS),
            caller,
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_error_truncates_sql() {
        let sql = "x".repeat(500);
        let err = ExecutionError::execute("boom", &sql, Location::caller());
        let ExecutionError::Execute { sql, caller, .. } = &err else {
            panic!("expected execute error");
        };
        assert_eq!(sql.len(), SQL_IN_ERRORS + 3);
        assert!(caller.file().ends_with("lib.rs"));
        assert_eq!(err.kind(), ErrorKind::ExecuteError);
    }

    #[test]
    fn test_kinds_pass_through() {
        let err: ExecutionError = JxError::Domain("min == max".into()).into();
        assert_eq!(err.kind(), ErrorKind::DomainError);
        let err = ExecutionError::Transaction { cause: "first".into() };
        assert_eq!(err.kind(), ErrorKind::TransactionError);
    }
}
