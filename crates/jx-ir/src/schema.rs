//! Schema view consulted during variable typing and query normalization

use crate::types::JsonType;

/// What the compiler needs to know about one snowflake.
///
/// All paths are logical dotted paths measured from the fact table root.
pub trait Schema {
    /// Name of the fact table.
    fn fact(&self) -> &str;

    /// Types stored at `path`. `None` means the schema does not describe
    /// paths at all; `Some(vec![])` means the path has no columns.
    fn types_at(&self, path: &str) -> Option<Vec<JsonType>>;

    /// `true` when `path` is a nested (child table) path.
    fn is_nested(&self, path: &str) -> bool;

    /// Deepest nested path containing `path`, or `.` for fact-level paths.
    fn nested_path_of(&self, path: &str) -> String;

    /// `true` when some column lies strictly beneath `path` (an object path).
    fn has_descendants(&self, _path: &str) -> bool {
        false
    }
}

/// The schema-free view: every variable keeps its declared type.
#[derive(Debug, Default, Clone, Copy)]
pub struct Untyped;

impl Schema for Untyped {
    fn fact(&self) -> &str {
        ""
    }

    fn types_at(&self, _path: &str) -> Option<Vec<JsonType>> {
        None
    }

    fn is_nested(&self, _path: &str) -> bool {
        false
    }

    fn nested_path_of(&self, _path: &str) -> String {
        ".".to_string()
    }
}
