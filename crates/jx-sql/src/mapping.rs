//! Result column mapping
//!
//! Every column of the emitted statement has one [`ColumnMapping`] telling
//! the assembler where its value goes in the response.

use jx_ir::JsonType;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMapping {
    /// Output property (list format) or edge/select name (cube format).
    pub push_name: String,
    /// Output column position, for table headers.
    pub push_column: usize,
    pub push_column_name: String,
    /// Path inside the output property; `.` is the property itself.
    pub push_child: String,
    /// Index of the result column.
    pub pull: usize,
    pub is_edge: bool,
    pub num_push_columns: usize,
    pub json_type: JsonType,
}

/// Accumulates mappings while an emitter adds `SELECT` columns.
#[derive(Debug, Default)]
pub(crate) struct MappingBuilder {
    mappings: Vec<ColumnMapping>,
    push_columns: usize,
}

impl MappingBuilder {
    /// Register the next result column as a new output column.
    pub fn push(&mut self, name: &str, json_type: JsonType) -> usize {
        self.push_child(name, ".", json_type, false)
    }

    pub fn push_edge(&mut self, name: &str, json_type: JsonType) -> usize {
        self.push_child(name, ".", json_type, true)
    }

    pub fn push_child(&mut self, name: &str, child: &str, json_type: JsonType, is_edge: bool) -> usize {
        let pull = self.mappings.len();
        let push_column = match self.mappings.iter().find(|m| m.push_name == name) {
            Some(existing) => existing.push_column,
            None => {
                self.push_columns += 1;
                self.push_columns - 1
            }
        };
        self.mappings.push(ColumnMapping {
            push_name: name.to_string(),
            push_column,
            push_column_name: name.to_string(),
            push_child: child.to_string(),
            pull,
            is_edge,
            num_push_columns: 0,
            json_type,
        });
        pull
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn finish(mut self) -> Vec<ColumnMapping> {
        for m in &mut self.mappings {
            m.num_push_columns = self.push_columns;
        }
        self.mappings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_share_push_column() {
        let mut b = MappingBuilder::default();
        b.push("a", JsonType::Number);
        b.push_child("o", "x", JsonType::String, false);
        b.push_child("o", "y", JsonType::String, false);
        b.push_edge("e", JsonType::String);
        let m = b.finish();
        assert_eq!(m.len(), 4);
        assert!(m[3].is_edge && m[3].push_child == ".");
        assert_eq!(m[2].pull, 2);
        assert_eq!(m[2].push_column, 1);
        assert!(m.iter().all(|c| c.num_push_columns == 3));
    }
}
