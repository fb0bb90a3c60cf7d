//! JX Snowflake
//!
//! The column catalog for one fact table and its child tables, schema
//! mutations expressed as [`SchemaChange`] plans, and the document shredder
//! that turns JSON documents into per-table row batches.

use jx_ir::{ErrorKind, JsonType};
use thiserror::Error;

pub mod catalog;
pub mod shred;
pub mod snowflake;

pub use catalog::Column;
pub use shred::{shred, Batch, Shredded};
pub use snowflake::{ColumnMove, SchemaChange, Snowflake};

/// Surrogate key of every row.
pub const UID: &str = "__id__";
/// User-visible document identifier, fact table only.
pub const GUID: &str = "__guid__";
/// Key of the containing row, child tables only.
pub const PARENT: &str = "__parent__";
/// Index within the containing array, child tables only.
pub const ORDER: &str = "__order__";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Cannot store {json_type} values at {path}")]
    Incompatible { path: String, json_type: JsonType },

    #[error("Documents must be JSON objects, got {0}")]
    NotAnObject(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid catalog record: {0}")]
    Record(String),
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SchemaError
    }
}

pub type Result<T> = std::result::Result<T, SchemaError>;
