//! Column catalog records
//!
//! One [`Column`] per physical column, plus one `nested` marker per child
//! table. The field names follow the `meta.columns` table so a record can be
//! written and read back with serde.

use jx_ir::types::{relative_field, typed_column};
use jx_ir::JsonType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, SchemaError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Logical path from the fact root.
    pub name: String,
    /// Physical column name inside `table`; for `nested` markers, the child table.
    pub es_column: String,
    #[serde(rename = "es_index")]
    pub table: String,
    pub json_type: JsonType,
    /// Array ancestors of the column, deepest first, ending with `.`.
    pub nested_path: Vec<String>,
    #[serde(default)]
    pub cardinality: Option<u64>,
    #[serde(default)]
    pub count: Option<u64>,
    /// Longest array seen; only tracked on `exists` columns.
    #[serde(default)]
    pub multi: Option<u64>,
    #[serde(default)]
    pub partitions: Option<Vec<Value>>,
    pub last_updated: f64,
}

impl Column {
    pub(crate) fn new(name: &str, json_type: JsonType, table: String, home: &[String]) -> Self {
        let nested = home.first().map(String::as_str).unwrap_or(".");
        let es_column = match json_type {
            JsonType::Nested => String::new(),
            t => typed_column(&relative_field(name, nested), t),
        };
        Column {
            name: name.to_string(),
            es_column,
            table,
            json_type,
            nested_path: home.to_vec(),
            cardinality: None,
            count: None,
            multi: None,
            partitions: None,
            last_updated: now(),
        }
    }

    /// Nested path of the table holding this column.
    pub fn home(&self) -> &str {
        self.nested_path.first().map(String::as_str).unwrap_or(".")
    }

    /// `true` for columns that exist in a table (everything except `nested` markers).
    pub fn is_physical(&self) -> bool {
        self.json_type != JsonType::Nested
    }

    /// Fact table owning this column: its table minus the nested path.
    pub fn fact(&self) -> &str {
        let home = self.home();
        if home == "." {
            return &self.table;
        }
        self.table
            .strip_suffix(home)
            .and_then(|t| t.strip_suffix('.'))
            .unwrap_or(&self.table)
    }

    /// Tables along the column's nested path, deepest first. Nesting only
    /// ever moves a column down this chain.
    pub fn tables(&self) -> Vec<String> {
        let fact = self.fact();
        self.nested_path
            .iter()
            .map(|p| match p.as_str() {
                "." => fact.to_string(),
                p => format!("{fact}.{p}"),
            })
            .collect()
    }

    /// Catalog identity: one record per fact, logical path and type.
    pub fn key(&self) -> (String, String, JsonType) {
        (self.fact().to_string(), self.name.clone(), self.json_type)
    }

    /// `meta.columns` row as a JSON object; `nested_path` and `partitions`
    /// are stored as JSON text.
    pub fn to_record(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "es_column": self.es_column,
            "es_index": self.table,
            "json_type": self.json_type.name(),
            "nested_path": serde_json::to_string(&self.nested_path).unwrap_or_default(),
            "cardinality": self.cardinality,
            "count": self.count,
            "multi": self.multi,
            "partitions": self.partitions.as_ref().map(|p| Value::Array(p.clone()).to_string()),
            "last_updated": self.last_updated,
        })
    }

    /// Inverse of [`Column::to_record`].
    pub fn from_record(record: &Value) -> Result<Self> {
        let text = |key: &str| -> Result<String> {
            record
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| SchemaError::Record(format!("missing {key} in {record}")))
        };
        let count = |key: &str| record.get(key).and_then(Value::as_u64);

        let json_type = JsonType::from_name(&text("json_type")?)
            .ok_or_else(|| SchemaError::Record(format!("bad json_type in {record}")))?;
        let nested_path: Vec<String> = serde_json::from_str(&text("nested_path")?)
            .map_err(|e| SchemaError::Record(format!("bad nested_path: {e}")))?;
        if nested_path.last().map(String::as_str) != Some(".") {
            return Err(SchemaError::Record(format!(
                "nested_path must end with '.': {nested_path:?}"
            )));
        }
        let partitions = match record.get("partitions").and_then(Value::as_str) {
            Some(p) => serde_json::from_str(p)
                .map_err(|e| SchemaError::Record(format!("bad partitions: {e}")))?,
            None => None,
        };

        Ok(Column {
            name: text("name")?,
            es_column: text("es_column")?,
            table: text("es_index")?,
            json_type,
            nested_path,
            cardinality: count("cardinality"),
            count: count("count"),
            multi: count("multi"),
            partitions,
            last_updated: record
                .get("last_updated")
                .and_then(Value::as_f64)
                .unwrap_or_default(),
        })
    }
}

/// Seconds since the epoch, with sub-second precision.
pub(crate) fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_physical_name_is_relative_to_table() {
        let c = Column::new("c.d", JsonType::Number, "t.c".into(), &home(&["c", "."]));
        assert_eq!(c.es_column, "d.$n");
        assert_eq!(c.home(), "c");

        let root = Column::new("c", JsonType::String, "t.c".into(), &home(&["c", "."]));
        assert_eq!(root.es_column, ".$s");

        let top = Column::new("a.b", JsonType::Integer, "t".into(), &home(&["."]));
        assert_eq!(top.es_column, "a.b.$n");
    }

    #[test]
    fn test_fact_and_table_chain() {
        let c = Column::new("c.d", JsonType::Number, "t.c".into(), &home(&["c", "."]));
        assert_eq!(c.fact(), "t");
        assert_eq!(c.tables(), vec!["t.c".to_string(), "t".to_string()]);
        assert_eq!(c.key(), ("t".to_string(), "c.d".to_string(), JsonType::Number));

        let a = Column::new("a", JsonType::Number, "u".into(), &home(&["."]));
        let b = Column::new("a", JsonType::Number, "t".into(), &home(&["."]));
        assert_eq!(a.tables(), vec!["u".to_string()]);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_record_round_trip() {
        let mut c = Column::new("c.d", JsonType::Number, "t.c".into(), &home(&["c", "."]));
        c.multi = Some(3);
        c.partitions = Some(vec![serde_json::json!("x")]);

        let record = c.to_record();
        assert_eq!(record["es_index"], "t.c");
        assert_eq!(record["nested_path"], r#"["c","."]"#);
        assert_eq!(Column::from_record(&record).unwrap(), c);
    }

    #[test]
    fn test_record_rejects_bad_nested_path() {
        let mut record = Column::new("a", JsonType::Number, "t".into(), &home(&["."])).to_record();
        record["nested_path"] = Value::String(r#"["c"]"#.into());
        assert!(matches!(
            Column::from_record(&record),
            Err(SchemaError::Record(_))
        ));
    }
}
