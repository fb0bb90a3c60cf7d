//! Document shredding
//!
//! Documents are walked twice. The first walk promotes every path that holds
//! an array to a child table, so the second walk sees the final shape and
//! never has to move rows it already produced.

use std::collections::{BTreeMap, BTreeSet};

use jx_ir::types::{concat_field, escape_key, split_field};
use jx_ir::{get_json_type, JsonType, Schema};
use serde_json::{Map, Value};
use tracing::debug;

use crate::snowflake::{SchemaChange, Snowflake};
use crate::{Result, SchemaError, GUID, ORDER, PARENT, UID};

/// Rows bound for one table; every row has a value for every column.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shredded {
    /// DDL to run before inserting, in order.
    pub changes: Vec<SchemaChange>,
    /// One batch per table, parents before children.
    pub batches: Vec<Batch>,
    pub guids: Vec<String>,
}

type Row = Map<String, Value>;

struct Shredder<'a> {
    snowflake: &'a mut Snowflake,
    changes: Vec<SchemaChange>,
    rows: BTreeMap<String, Vec<Row>>,
}

/// Shred `docs` into `snowflake`, growing its schema as needed.
///
/// The caller owns `snowflake`; on failure it should be discarded, since
/// some schema changes may already have been applied to it.
pub fn shred(snowflake: &mut Snowflake, docs: &[Value]) -> Result<Shredded> {
    let mut shredder = Shredder {
        snowflake,
        changes: Vec::new(),
        rows: BTreeMap::new(),
    };
    for doc in docs {
        if !doc.is_object() {
            return Err(SchemaError::NotAnObject(get_json_type(doc).to_string()));
        }
        shredder.discover(".", doc)?;
    }

    let fact = shredder.snowflake.fact_table().to_string();
    let mut guids = Vec::with_capacity(docs.len());
    for doc in docs {
        let uid = shredder.snowflake.next_uid(&fact);
        let guid = uuid::Uuid::new_v4().to_string();
        let mut row = Row::new();
        row.insert(UID.into(), Value::from(uid));
        row.insert(GUID.into(), Value::from(guid.clone()));
        if let Value::Object(fields) = doc {
            shredder.fields(".", fields, ".", &mut row, uid)?;
        }
        shredder.rows.entry(fact.clone()).or_default().push(row);
        guids.push(guid);
    }

    let Shredder {
        snowflake,
        changes,
        rows,
    } = shredder;
    let batches = batches(snowflake, rows);
    debug!(
        docs = docs.len(),
        tables = batches.len(),
        changes = changes.len(),
        "Shredded documents"
    );
    Ok(Shredded {
        changes,
        batches,
        guids,
    })
}

fn non_null(items: &[Value]) -> Vec<&Value> {
    items.iter().filter(|v| !v.is_null()).collect()
}

/// An array is stored as JSON text when any element is itself an array.
fn is_opaque(items: &[&Value]) -> bool {
    items.iter().any(|v| v.is_array())
}

impl Shredder<'_> {
    fn discover(&mut self, path: &str, value: &Value) -> Result<()> {
        match value {
            Value::Object(fields) => {
                for (key, v) in fields {
                    self.discover(&concat_field(path, &escape_key(key)), v)?;
                }
            }
            Value::Array(items) => {
                let items = non_null(items);
                if items.is_empty() || is_opaque(&items) {
                    return Ok(());
                }
                let changes = self.snowflake.nest_column(path)?;
                self.changes.extend(changes);
                for item in items {
                    if let Value::Object(fields) = item {
                        for (key, v) in fields {
                            self.discover(&concat_field(path, &escape_key(key)), v)?;
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn fields(
        &mut self,
        path: &str,
        fields: &Map<String, Value>,
        home: &str,
        row: &mut Row,
        uid: i64,
    ) -> Result<()> {
        for (key, v) in fields {
            self.value(&concat_field(path, &escape_key(key)), v, home, row, uid)?;
        }
        Ok(())
    }

    fn value(&mut self, path: &str, value: &Value, home: &str, row: &mut Row, uid: i64) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if path != home && self.snowflake.is_nested(path) {
            return match value {
                Value::Array(items) => self.children(path, &non_null(items), row, uid),
                single => self.children(path, &[single], row, uid),
            };
        }
        match value {
            Value::Object(fields) => self.fields(path, fields, home, row, uid),
            Value::Array(items) => {
                let items = non_null(items);
                if items.is_empty() {
                    Ok(())
                } else {
                    self.leaf(path, JsonType::Object, Value::String(value.to_string()), row)
                }
            }
            scalar => self.leaf(path, get_json_type(scalar), scalar.clone(), row),
        }
    }

    /// One child row per item; the item count goes to the parent's exists column.
    fn children(&mut self, path: &str, items: &[&Value], parent: &mut Row, parent_uid: i64) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let length = items.len() as u64;
        self.leaf(path, JsonType::Exists, Value::from(length), parent)?;
        self.snowflake.observe_length(path, length);

        let table = self.snowflake.table_name(path);
        for (order, item) in items.iter().enumerate() {
            let uid = self.snowflake.next_uid(&table);
            let mut row = Row::new();
            row.insert(UID.into(), Value::from(uid));
            row.insert(PARENT.into(), Value::from(parent_uid));
            row.insert(ORDER.into(), Value::from(order as u64));
            match item {
                Value::Object(fields) => self.fields(path, fields, path, &mut row, uid)?,
                Value::Array(_) => {
                    self.leaf(path, JsonType::Object, Value::String(item.to_string()), &mut row)?
                }
                scalar => self.leaf(path, get_json_type(scalar), (*scalar).clone(), &mut row)?,
            }
            self.rows.entry(table.clone()).or_default().push(row);
        }
        Ok(())
    }

    fn leaf(&mut self, path: &str, json_type: JsonType, value: Value, row: &mut Row) -> Result<()> {
        let (column, changes) = self.snowflake.add_column(path, json_type)?;
        self.changes.extend(changes);
        row.insert(column.es_column, value);
        Ok(())
    }
}

fn batches(snowflake: &Snowflake, mut rows: BTreeMap<String, Vec<Row>>) -> Vec<Batch> {
    let mut out = Vec::new();
    for table in snowflake.tables() {
        let Some(rows) = rows.remove(&table) else {
            continue;
        };
        let reserved: &[&str] = if table == snowflake.fact_table() {
            &[UID, GUID]
        } else {
            &[UID, PARENT, ORDER]
        };
        let mut data: BTreeSet<&str> = BTreeSet::new();
        for row in &rows {
            data.extend(
                row.keys()
                    .map(String::as_str)
                    .filter(|k| !reserved.contains(k)),
            );
        }
        let columns: Vec<String> = reserved
            .iter()
            .copied()
            .chain(data)
            .map(str::to_string)
            .collect();
        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        out.push(Batch {
            table,
            columns,
            rows,
        });
    }
    debug_assert!(
        out.windows(2).all(|w| {
            let depth = |t: &str| split_field(t).len();
            depth(&w[0].table) <= depth(&w[1].table)
        }),
        "batches must be parent-first"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column<'a>(batch: &'a Batch, name: &str) -> Vec<&'a Value> {
        let i = batch.columns.iter().position(|c| c == name).unwrap();
        batch.rows.iter().map(|r| &r[i]).collect()
    }

    fn seeded() -> (Snowflake, Shredded) {
        let mut s = Snowflake::new("t");
        let docs = vec![
            json!({"a": 1, "b": "x", "c": [{"d": 10}, {"d": 20}]}),
            json!({"a": 2, "b": "y", "c": []}),
            json!({"a": 3, "b": "x", "c": [{"d": 30}]}),
        ];
        let out = shred(&mut s, &docs).unwrap();
        (s, out)
    }

    #[test]
    fn test_parent_first_batches() {
        let (s, out) = seeded();
        let tables: Vec<&str> = out.batches.iter().map(|b| b.table.as_str()).collect();
        assert_eq!(tables, vec!["t", "t.c"]);
        assert_eq!(out.guids.len(), 3);
        assert!(s.is_nested("c"));

        let fact = &out.batches[0];
        assert_eq!(fact.columns[..2], [UID.to_string(), GUID.to_string()]);
        assert_eq!(column(fact, "a.$n"), vec![&json!(1), &json!(2), &json!(3)]);
        assert_eq!(column(fact, "c.$e"), vec![&json!(2), &Value::Null, &json!(1)]);
    }

    #[test]
    fn test_child_rows_link_to_parents() {
        let (_, out) = seeded();
        let child = &out.batches[1];
        assert_eq!(
            child.columns,
            vec![UID, PARENT, ORDER, "d.$n"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(column(child, PARENT), vec![&json!(1), &json!(1), &json!(3)]);
        assert_eq!(column(child, ORDER), vec![&json!(0), &json!(1), &json!(0)]);
        assert_eq!(column(child, "d.$n"), vec![&json!(10), &json!(20), &json!(30)]);
    }

    #[test]
    fn test_schema_changes_precede_use() {
        let (_, out) = seeded();
        let created = out
            .changes
            .iter()
            .position(|c| matches!(c, SchemaChange::CreateTable { table, .. } if table == "t.c"))
            .unwrap();
        let added = out
            .changes
            .iter()
            .position(|c| matches!(c, SchemaChange::AddColumn { table, .. } if table == "t.c"))
            .unwrap();
        assert!(created < added);
    }

    #[test]
    fn test_scalar_at_nested_path_becomes_one_child() {
        let mut s = Snowflake::new("t");
        let out = shred(&mut s, &[json!({"c": [1, 2]}), json!({"c": 5})]).unwrap();
        let child = &out.batches[1];
        assert_eq!(column(child, ".$n"), vec![&json!(1), &json!(2), &json!(5)]);
        assert_eq!(column(child, PARENT), vec![&json!(1), &json!(1), &json!(2)]);
        assert_eq!(column(child, ORDER), vec![&json!(0), &json!(1), &json!(0)]);
        assert_eq!(column(&out.batches[0], "c.$e"), vec![&json!(2), &json!(1)]);
    }

    #[test]
    fn test_arrays_of_arrays_are_json_text() {
        let mut s = Snowflake::new("t");
        let out = shred(&mut s, &[json!({"m": [[1, 2], [3]]})]).unwrap();
        assert!(!s.is_nested("m"));
        assert_eq!(column(&out.batches[0], "m.$j"), vec![&json!("[[1,2],[3]]")]);
    }

    #[test]
    fn test_escaped_keys_and_polymorphism() {
        let mut s = Snowflake::new("t");
        let out = shred(&mut s, &[json!({"a.b": 1}), json!({"a": {"b": "x"}})]).unwrap();
        let fact = &out.batches[0];
        assert_eq!(column(fact, "a\\.b.$n"), vec![&json!(1), &Value::Null]);
        assert_eq!(column(fact, "a.b.$s"), vec![&Value::Null, &json!("x")]);
    }

    #[test]
    fn test_deep_nesting() {
        let mut s = Snowflake::new("t");
        let out = shred(
            &mut s,
            &[json!({"c": [{"e": [{"f": true}, {"f": false}]}, {"e": []}]})],
        )
        .unwrap();
        let tables: Vec<&str> = out.batches.iter().map(|b| b.table.as_str()).collect();
        assert_eq!(tables, vec!["t", "t.c", "t.c.e"]);
        let grandchild = &out.batches[2];
        assert_eq!(column(grandchild, PARENT), vec![&json!(1), &json!(1)]);
        assert_eq!(column(grandchild, "f.$b"), vec![&json!(true), &json!(false)]);
        assert_eq!(column(&out.batches[1], "e.$e"), vec![&json!(2), &Value::Null]);
    }

    #[test]
    fn test_rejects_non_objects() {
        let mut s = Snowflake::new("t");
        assert_eq!(
            shred(&mut s, &[json!([1])]),
            Err(SchemaError::NotAnObject("nested".into()))
        );
    }
}
