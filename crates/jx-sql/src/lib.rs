//! JX SQL
//!
//! Compiles a normalized [`jx_ir::Query`] against a [`jx_snowflake::Snowflake`]
//! into one DuckDB statement plus a column mapping, and assembles the flat
//! result rows back into the list, table or cube response.

use jx_ir::{ErrorKind, JxError};
use thiserror::Error;

pub mod aggregate;
pub mod assemble;
pub mod emit;
pub mod expr;
pub mod mapping;
pub mod sql;

pub use assemble::assemble;
pub use emit::{compile, Compiled, DocumentLayout, Shape};
pub use expr::Scope;
pub use mapping::ColumnMapping;
pub use sql::Sql;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Query(#[from] JxError),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{0} and {1} are in different branches of the snowflake")]
    CrossBranch(String, String),

    #[error("Result assembly failed: {0}")]
    Assembly(String),
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Query(e) => e.kind(),
            CompileError::Unsupported(_) => ErrorKind::ParseError,
            CompileError::CrossBranch(..) => ErrorKind::DepthMismatch,
            CompileError::Assembly(_) => ErrorKind::ExecuteError,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
