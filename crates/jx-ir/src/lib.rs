//! JX Intermediate Representation
//!
//! The JSON type lattice, the typed-column codec, the expression algebra with
//! its partial evaluator, and the normalized query record that the SQL
//! emitter consumes. Nothing in this crate touches a database.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod date;
pub mod expr;
pub mod query;
pub mod schema;
pub mod types;

pub use expr::{Expr, InequalityOp, ParseOptions, Variable};
pub use query::{
    Aggregate, Domain, Edge, Format, GroupBy, Query, SelectColumn, SortKey, Window,
};
pub use schema::{Schema, Untyped};
pub use types::{get_json_type, merge_types, typed_column, untype, JsonType};

/// Error kinds shared by every layer of the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    SchemaError,
    DepthMismatch,
    ArityError,
    DomainError,
    ExecuteError,
    TransactionError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::SchemaError => "schema_error",
            ErrorKind::DepthMismatch => "depth_mismatch",
            ErrorKind::ArityError => "arity_error",
            ErrorKind::DomainError => "domain_error",
            ErrorKind::ExecuteError => "execute_error",
            ErrorKind::TransactionError => "transaction_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JxError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Variable {path} is not reachable from query path {query_path}")]
    DepthMismatch { path: String, query_path: String },

    #[error("Operator {op} expects {expected} operands, got {actual}")]
    Arity {
        op: String,
        expected: String,
        actual: usize,
    },

    #[error("Domain error: {0}")]
    Domain(String),
}

impl JxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JxError::Parse(_) | JxError::UnknownOperator(_) => ErrorKind::ParseError,
            JxError::Schema(_) => ErrorKind::SchemaError,
            JxError::DepthMismatch { .. } => ErrorKind::DepthMismatch,
            JxError::Arity { .. } => ErrorKind::ArityError,
            JxError::Domain(_) => ErrorKind::DomainError,
        }
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        JxError::Parse(msg.into())
    }

    pub(crate) fn arity(op: &str, expected: &str, actual: usize) -> Self {
        JxError::Arity {
            op: op.to_string(),
            expected: expected.to_string(),
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, JxError>;
