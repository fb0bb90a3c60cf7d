//! The snowflake: a fact table, its child tables and their columns
//!
//! Mutations never touch a database. They update the in-memory catalog and
//! return [`SchemaChange`] plans that the engine turns into DDL.

use std::collections::{BTreeMap, BTreeSet};

use jx_ir::types::{split_field, starts_with_field};
use jx_ir::{JsonType, Schema};
use tracing::info;

use crate::catalog::{now, Column};
use crate::{Result, SchemaError};

/// A column carried from a parent table into a new child table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMove {
    pub from: String,
    pub to: String,
    pub json_type: JsonType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    /// A fact table (`parent: None`) or a child table of `parent`.
    CreateTable {
        table: String,
        parent: Option<String>,
    },
    AddColumn {
        table: String,
        column: String,
        json_type: JsonType,
    },
    /// Existing parent rows with any non-null value among `moves` each get
    /// one child row with `UID = PARENT = parent.UID` and `ORDER = 0`; the
    /// values move into it, `exists` is set to 1, and the moved columns are
    /// dropped from the parent. Grandchildren of `reparent` tables already
    /// point at the right rows because child UIDs reuse parent UIDs.
    NestColumn {
        parent: String,
        child: String,
        exists: String,
        moves: Vec<ColumnMove>,
        reparent: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Snowflake {
    fact: String,
    columns: Vec<Column>,
    /// Logical paths of child tables; `.` is implied.
    nested: BTreeSet<String>,
    next_uid: BTreeMap<String, i64>,
    dirty: BTreeSet<(String, String, JsonType)>,
}

impl Snowflake {
    /// A snowflake with no columns and no child tables.
    pub fn new(fact: impl Into<String>) -> Self {
        let fact = fact.into();
        let mut next_uid = BTreeMap::new();
        next_uid.insert(fact.clone(), 1);
        Snowflake {
            fact,
            columns: Vec::new(),
            nested: BTreeSet::new(),
            next_uid,
            dirty: BTreeSet::new(),
        }
    }

    /// New fact table plus the DDL that creates it.
    pub fn create_fact(name: &str) -> (Self, SchemaChange) {
        info!(fact = %name, "Creating fact table");
        let change = SchemaChange::CreateTable {
            table: name.to_string(),
            parent: None,
        };
        (Snowflake::new(name), change)
    }

    /// Rebuild from persisted catalog records and per-table `MAX(UID)`.
    pub fn from_columns(
        fact: impl Into<String>,
        columns: Vec<Column>,
        max_uids: &BTreeMap<String, i64>,
    ) -> Self {
        let mut snowflake = Snowflake::new(fact);
        for column in columns {
            if column.json_type == JsonType::Nested {
                snowflake.nested.insert(column.name.clone());
            }
            snowflake.columns.push(column);
        }
        for (table, max) in max_uids {
            snowflake.next_uid.insert(table.clone(), max + 1);
        }
        for table in snowflake.tables() {
            snowflake.next_uid.entry(table).or_insert(1);
        }
        snowflake
    }

    pub fn fact_table(&self) -> &str {
        &self.fact
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Table holding rows for a nested path.
    pub fn table_name(&self, nested_path: &str) -> String {
        if nested_path == "." {
            self.fact.clone()
        } else {
            format!("{}.{}", self.fact, nested_path)
        }
    }

    /// Nested path of a table name, if the table belongs to this snowflake.
    pub fn nested_path_of_table(&self, table: &str) -> Option<String> {
        if table == self.fact {
            return Some(".".to_string());
        }
        let path = table.strip_prefix(&self.fact)?.strip_prefix('.')?;
        self.nested.contains(path).then(|| path.to_string())
    }

    /// Child table paths, shallowest first.
    pub fn nested_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.nested.iter().cloned().collect();
        paths.sort_by_key(|p| (split_field(p).len(), p.clone()));
        paths
    }

    /// All table names, parents before children.
    pub fn tables(&self) -> Vec<String> {
        std::iter::once(self.fact.clone())
            .chain(self.nested_paths().iter().map(|p| self.table_name(p)))
            .collect()
    }

    /// `nested_path` followed by its array ancestors, ending with `.`.
    pub fn nested_path_list(&self, nested_path: &str) -> Vec<String> {
        let mut list: Vec<String> = self
            .nested
            .iter()
            .filter(|n| starts_with_field(nested_path, n))
            .cloned()
            .collect();
        list.sort_by_key(|n| std::cmp::Reverse(split_field(n).len()));
        list.push(".".to_string());
        list
    }

    /// Nested path directly containing the child table at `nested_path`.
    pub fn parent_nested_path(&self, nested_path: &str) -> String {
        self.nested_path_list(nested_path)
            .into_iter()
            .find(|n| n != nested_path)
            .unwrap_or_else(|| ".".to_string())
    }

    /// Every typed variant stored at a logical path.
    pub fn columns_at(&self, path: &str) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.name == path).collect()
    }

    pub fn find(&self, path: &str, json_type: JsonType) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == path && c.json_type == json_type)
    }

    /// Columns addressable from `query_path`: those in its own table, its
    /// ancestors, and its descendants. Other branches are not visible.
    pub fn get_columns(&self, query_path: &str) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| {
                let home = c.home();
                starts_with_field(query_path, home) || starts_with_field(home, query_path)
            })
            .collect()
    }

    /// Physical columns of one table, in catalog order.
    pub fn table_columns(&self, table: &str) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.is_physical() && c.table == table)
            .collect()
    }

    /// Allocate the next UID of a table.
    pub fn next_uid(&mut self, table: &str) -> i64 {
        let next = self.next_uid.entry(table.to_string()).or_insert(1);
        let uid = *next;
        *next += 1;
        uid
    }

    /// Columns changed since the last call, for catalog persistence.
    pub fn take_dirty(&mut self) -> Vec<Column> {
        let dirty = std::mem::take(&mut self.dirty);
        self.columns
            .iter()
            .filter(|c| dirty.contains(&c.key()))
            .cloned()
            .collect()
    }

    /// Table holding values of `json_type` at `path`.
    fn home_of(&self, path: &str, json_type: JsonType) -> String {
        match json_type {
            JsonType::Exists | JsonType::Nested => self.parent_nested_path(path),
            _ => Schema::nested_path_of(self, path),
        }
    }

    fn place(&self, column: &mut Column) {
        let home = self.home_of(&column.name, column.json_type);
        let placed = Column::new(
            &column.name,
            column.json_type,
            self.table_name(&home),
            &self.nested_path_list(&home),
        );
        column.table = placed.table;
        column.nested_path = placed.nested_path;
        column.es_column = match column.json_type {
            JsonType::Nested => self.table_name(&column.name),
            _ => placed.es_column,
        };
        column.last_updated = now();
    }

    /// Ensure a typed column exists at `path`; idempotent.
    ///
    /// Values are stored by storage type, so `integer` lands in the number
    /// column. Asking for `nested` promotes the path with [`Self::nest_column`].
    pub fn add_column(
        &mut self,
        path: &str,
        json_type: JsonType,
    ) -> Result<(Column, Vec<SchemaChange>)> {
        let json_type = json_type.storage();
        if json_type == JsonType::Nested {
            let changes = self.nest_column(path)?;
            let marker = self.find(path, JsonType::Nested).cloned().ok_or_else(|| {
                SchemaError::Incompatible {
                    path: path.to_string(),
                    json_type,
                }
            })?;
            return Ok((marker, changes));
        }
        if json_type == JsonType::Exists && !self.nested.contains(path) {
            return Err(SchemaError::Incompatible {
                path: path.to_string(),
                json_type,
            });
        }
        if let Some(existing) = self.find(path, json_type) {
            return Ok((existing.clone(), Vec::new()));
        }

        let mut column = Column::new(path, json_type, String::new(), &[]);
        self.place(&mut column);
        info!(
            table = %column.table,
            column = %column.es_column,
            json_type = %json_type,
            "Adding column"
        );
        let change = SchemaChange::AddColumn {
            table: column.table.clone(),
            column: column.es_column.clone(),
            json_type,
        };
        self.dirty.insert(column.key());
        self.columns.push(column.clone());
        Ok((column, vec![change]))
    }

    /// Promote `path` to a child table, migrating columns beneath it.
    pub fn nest_column(&mut self, path: &str) -> Result<Vec<SchemaChange>> {
        if path == "." {
            return Err(SchemaError::Incompatible {
                path: path.to_string(),
                json_type: JsonType::Nested,
            });
        }
        if self.nested.contains(path) {
            return Ok(Vec::new());
        }

        let parent_path = Schema::nested_path_of(self, path);
        let parent = self.table_name(&parent_path);
        let child = self.table_name(path);
        info!(parent = %parent, child = %child, "Nesting column");

        let mut changes = vec![SchemaChange::CreateTable {
            table: child.clone(),
            parent: Some(parent.clone()),
        }];
        let reparent: Vec<String> = self
            .nested
            .iter()
            .filter(|n| starts_with_field(n, path) && self.parent_nested_path(n) == parent_path)
            .map(|n| self.table_name(n))
            .collect();

        self.nested.insert(path.to_string());
        let parent_uid = self.next_uid.get(&parent).copied().unwrap_or(1);
        self.next_uid.insert(child.clone(), parent_uid);

        let mut moves = Vec::new();
        let mut columns = std::mem::take(&mut self.columns);
        for column in columns
            .iter_mut()
            .filter(|c| starts_with_field(&c.name, path))
        {
            let (table, es_column) = (column.table.clone(), column.es_column.clone());
            self.place(column);
            self.dirty.insert(column.key());
            if column.is_physical() && table == parent && column.table == child {
                moves.push(ColumnMove {
                    from: es_column,
                    to: column.es_column.clone(),
                    json_type: column.json_type,
                });
            }
        }
        self.columns = columns;

        let mut marker = Column::new(path, JsonType::Nested, String::new(), &[]);
        self.place(&mut marker);
        self.dirty.insert(marker.key());
        self.columns.push(marker);

        let (exists, add) = self.add_column(path, JsonType::Exists)?;
        changes.extend(add);
        if !moves.is_empty() || !reparent.is_empty() {
            changes.push(SchemaChange::NestColumn {
                parent,
                child,
                exists: exists.es_column,
                moves,
                reparent,
            });
        }
        Ok(changes)
    }

    /// Record the longest array observed at a nested path.
    pub(crate) fn observe_length(&mut self, path: &str, length: u64) {
        if let Some(column) = self
            .columns
            .iter_mut()
            .find(|c| c.name == path && c.json_type == JsonType::Exists)
        {
            if column.multi.map_or(true, |m| m < length) {
                column.multi = Some(length);
                column.last_updated = now();
                self.dirty.insert(column.key());
            }
        }
    }
}

impl Schema for Snowflake {
    fn fact(&self) -> &str {
        &self.fact
    }

    fn types_at(&self, path: &str) -> Option<Vec<JsonType>> {
        let mut types: Vec<JsonType> = self.columns_at(path).iter().map(|c| c.json_type).collect();
        types.sort();
        types.dedup();
        Some(types)
    }

    fn is_nested(&self, path: &str) -> bool {
        self.nested.contains(path)
    }

    fn nested_path_of(&self, path: &str) -> String {
        self.nested_path_list(path)
            .into_iter()
            .next()
            .unwrap_or_else(|| ".".to_string())
    }

    fn has_descendants(&self, path: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.name != path && starts_with_field(&c.name, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snowflake() -> Snowflake {
        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Integer).unwrap();
        s.add_column("b", JsonType::String).unwrap();
        s.nest_column("c").unwrap();
        s.add_column("c.d", JsonType::Number).unwrap();
        s
    }

    #[test]
    fn test_add_column_is_idempotent() {
        let mut s = Snowflake::new("t");
        let (first, changes) = s.add_column("a", JsonType::Integer).unwrap();
        assert_eq!(first.es_column, "a.$n");
        assert_eq!(
            changes,
            vec![SchemaChange::AddColumn {
                table: "t".into(),
                column: "a.$n".into(),
                json_type: JsonType::Number,
            }]
        );
        let (again, changes) = s.add_column("a", JsonType::Number).unwrap();
        assert_eq!(again, first);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_polymorphic_path_gets_sibling_columns() {
        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Number).unwrap();
        s.add_column("a", JsonType::String).unwrap();
        let names: Vec<&str> = s.columns_at("a").iter().map(|c| c.es_column.as_str()).collect();
        assert_eq!(names, vec!["a.$n", "a.$s"]);
        assert_eq!(
            s.types_at("a"),
            Some(vec![JsonType::Number, JsonType::String])
        );
    }

    #[test]
    fn test_child_columns_are_relative() {
        let s = snowflake();
        let d = s.find("c.d", JsonType::Number).unwrap();
        assert_eq!(d.table, "t.c");
        assert_eq!(d.es_column, "d.$n");
        assert_eq!(d.nested_path, vec!["c".to_string(), ".".to_string()]);

        let exists = s.find("c", JsonType::Exists).unwrap();
        assert_eq!(exists.table, "t");
        assert_eq!(exists.es_column, "c.$e");
        assert_eq!(s.types_at("c"), Some(vec![JsonType::Nested, JsonType::Exists]));
    }

    #[test]
    fn test_schema_view() {
        let s = snowflake();
        assert!(s.is_nested("c"));
        assert_eq!(s.nested_path_of("c.d"), "c");
        assert_eq!(s.nested_path_of("c"), "c");
        assert_eq!(s.nested_path_of("a"), ".");
        assert_eq!(s.parent_nested_path("c"), ".");
        assert!(s.has_descendants("c"));
        assert!(!s.has_descendants("a"));
        assert_eq!(s.types_at("zzz"), Some(vec![]));
    }

    #[test]
    fn test_get_columns_excludes_other_branches() {
        let mut s = snowflake();
        s.nest_column("e").unwrap();
        s.add_column("e.f", JsonType::String).unwrap();

        let from_c: Vec<&str> = s.get_columns("c").iter().map(|c| c.name.as_str()).collect();
        assert!(from_c.contains(&"a"));
        assert!(from_c.contains(&"c.d"));
        assert!(!from_c.contains(&"e.f"));

        let from_root = s.get_columns(".");
        assert!(from_root.iter().any(|c| c.name == "e.f"));
    }

    #[test]
    fn test_nest_column_migrates_scalar() {
        let mut s = Snowflake::new("t");
        s.add_column("c", JsonType::Number).unwrap();
        s.add_column("c.x", JsonType::String).unwrap();
        s.next_uid("t");
        s.next_uid("t");

        let changes = s.nest_column("c").unwrap();
        assert_eq!(
            changes[0],
            SchemaChange::CreateTable {
                table: "t.c".into(),
                parent: Some("t".into()),
            }
        );
        assert_eq!(
            changes.last(),
            Some(&SchemaChange::NestColumn {
                parent: "t".into(),
                child: "t.c".into(),
                exists: "c.$e".into(),
                moves: vec![
                    ColumnMove {
                        from: "c.$n".into(),
                        to: ".$n".into(),
                        json_type: JsonType::Number,
                    },
                    ColumnMove {
                        from: "c.x.$s".into(),
                        to: "x.$s".into(),
                        json_type: JsonType::String,
                    },
                ],
                reparent: vec![],
            })
        );
        assert_eq!(s.find("c", JsonType::Number).unwrap().table, "t.c");
        // child UIDs continue after the migrated rows, which reuse parent UIDs
        assert_eq!(s.next_uid("t.c"), 3);
        assert!(s.nest_column("c").unwrap().is_empty());
    }

    #[test]
    fn test_nest_above_existing_child_reparents() {
        let mut s = Snowflake::new("t");
        s.nest_column("a.b").unwrap();
        s.add_column("a.b.x", JsonType::Number).unwrap();

        let changes = s.nest_column("a").unwrap();
        let Some(SchemaChange::NestColumn { moves, reparent, .. }) = changes.last() else {
            panic!("expected a migration: {changes:?}");
        };
        assert_eq!(reparent, &vec!["t.a.b".to_string()]);
        assert_eq!(moves[0].from, "a.b.$e");
        assert_eq!(moves[0].to, "b.$e");

        let x = s.find("a.b.x", JsonType::Number).unwrap();
        assert_eq!(x.table, "t.a.b");
        assert_eq!(x.nested_path, vec!["a.b", "a", "."]);
        assert_eq!(s.parent_nested_path("a.b"), "a");
        assert_eq!(s.tables(), vec!["t", "t.a", "t.a.b"]);
    }

    #[test]
    fn test_exists_requires_nested_path() {
        let mut s = Snowflake::new("t");
        assert!(matches!(
            s.add_column("a", JsonType::Exists),
            Err(SchemaError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_rebuild_from_records() {
        let mut s = snowflake();
        s.next_uid("t");
        let columns: Vec<Column> = s
            .columns()
            .iter()
            .map(|c| Column::from_record(&c.to_record()).unwrap())
            .collect();
        let mut uids = BTreeMap::new();
        uids.insert("t".to_string(), 7);

        let mut rebuilt = Snowflake::from_columns("t", columns, &uids);
        assert!(rebuilt.is_nested("c"));
        assert_eq!(rebuilt.next_uid("t"), 8);
        assert_eq!(rebuilt.next_uid("t.c"), 1);
        assert_eq!(rebuilt.nested_path_of_table("t.c"), Some("c".into()));
    }

    #[test]
    fn test_take_dirty_drains() {
        let mut s = snowflake();
        assert_eq!(s.take_dirty().len(), s.columns().len());
        assert!(s.take_dirty().is_empty());
        s.observe_length("c", 4);
        let dirty = s.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].multi, Some(4));
    }
}
