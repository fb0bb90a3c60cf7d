//! In-memory column catalog
//!
//! Readers take an `Arc<Snowflake>` snapshot and never wait on writers; a
//! writer clones the snapshot, mutates the clone and publishes it once its
//! rows are committed. Changed columns queue up for the flusher.

use std::collections::{BTreeMap, HashMap};
use std::panic::Location;
use std::sync::Arc;

use duckdb::Connection;
use jx_ir::{JsonType, Query};
use jx_snowflake::{Column, Snowflake, UID};
use jx_sql::Sql;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::ddl::{self, META_FIELDS};
use crate::worker::{self, Statement};
use crate::{ExecutionError, Result};

#[derive(Default)]
pub struct Catalog {
    facts: RwLock<HashMap<String, Arc<Snowflake>>>,
    pending: Mutex<BTreeMap<(String, String, JsonType), Column>>,
}

impl Catalog {
    /// Snapshot of one fact's snowflake.
    pub fn snapshot(&self, fact: &str) -> Option<Arc<Snowflake>> {
        self.facts.read().get(fact).cloned()
    }

    /// Snapshot for the fact a JX query reads from.
    pub fn resolve(&self, jx: &Value) -> Result<Arc<Snowflake>> {
        let fact = Query::fact_name(jx)?;
        self.snapshot(&fact)
            .ok_or(ExecutionError::UnknownFact(fact))
    }

    pub fn facts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.facts.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace a fact's snowflake; its dirty columns queue for flushing.
    pub(crate) fn publish(&self, mut snowflake: Snowflake) {
        let dirty = snowflake.take_dirty();
        if !dirty.is_empty() {
            let mut pending = self.pending.lock();
            for column in dirty {
                pending.insert(column.key(), column);
            }
        }
        let fact = snowflake.fact_table().to_string();
        self.facts.write().insert(fact, Arc::new(snowflake));
    }

    /// Statements persisting every queued column, and the columns themselves
    /// for [`Catalog::requeue`] if they fail.
    pub(crate) fn take_pending(&self) -> (Vec<Statement>, Vec<Column>) {
        let columns: Vec<Column> = std::mem::take(&mut *self.pending.lock())
            .into_values()
            .collect();
        (ddl::catalog_records(&columns), columns)
    }

    /// Put columns back after a failed flush, unless newer versions queued.
    pub(crate) fn requeue(&self, columns: Vec<Column>) {
        let mut pending = self.pending.lock();
        for column in columns {
            pending.entry(column.key()).or_insert(column);
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Create `meta.columns` if needed and rebuild every fact from it.
    pub(crate) fn load(conn: &Connection) -> Result<Catalog> {
        let caller = Location::caller();
        conn.execute_batch(ddl::CREATE_META)
            .map_err(|e| ExecutionError::execute(e, ddl::CREATE_META, caller))?;

        let rows = worker::query(conn, &Statement::new(ddl::select_catalog()), caller)?;
        let mut by_fact: BTreeMap<String, Vec<Column>> = BTreeMap::new();
        for row in rows {
            let record: Map<String, Value> = META_FIELDS
                .iter()
                .map(|f| f.to_string())
                .zip(row)
                .collect();
            let column = Column::from_record(&Value::Object(record))?;
            by_fact.entry(column.fact().to_string()).or_default().push(column);
        }

        let mut facts = HashMap::new();
        for (fact, mut columns) in by_fact {
            columns.sort_by(|a, b| a.last_updated.total_cmp(&b.last_updated));
            let shape = Snowflake::from_columns(fact.clone(), columns, &BTreeMap::new());
            let mut max_uids = BTreeMap::new();
            for table in shape.tables() {
                let sql = format!(
                    "SELECT MAX({}) FROM {}",
                    Sql::quote_column(UID).as_str(),
                    Sql::quote_column(&table).as_str()
                );
                let rows = worker::query(conn, &Statement::new(sql), caller)?;
                if let Some(max) = rows.first().and_then(|r| r.first()).and_then(Value::as_i64) {
                    max_uids.insert(table, max);
                }
            }
            let columns = shape.columns().to_vec();
            facts.insert(fact.clone(), Arc::new(Snowflake::from_columns(fact, columns, &max_uids)));
        }

        // Fact tables that never got a column are only known to DuckDB.
        let tables = worker::query(
            conn,
            &Statement::new(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'main' AND table_type = 'BASE TABLE'",
            ),
            caller,
        )?;
        for name in tables.iter().filter_map(|r| r.first()).filter_map(Value::as_str) {
            let known = facts
                .values()
                .any(|s: &Arc<Snowflake>| s.nested_path_of_table(name).is_some());
            if !known {
                debug!(fact = %name, "Found fact table without columns");
                facts.insert(name.to_string(), Arc::new(Snowflake::new(name)));
            }
        }

        info!(facts = facts.len(), "Loaded column catalog");
        Ok(Catalog {
            facts: RwLock::new(facts),
            pending: Mutex::new(BTreeMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_know_their_fact() {
        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Number).unwrap();
        s.nest_column("c").unwrap();
        s.add_column("c.d", JsonType::Number).unwrap();
        for column in s.columns() {
            assert_eq!(column.fact(), "t", "{column:?}");
        }
    }

    #[test]
    fn test_publish_queues_dirty_columns() {
        let catalog = Catalog::default();
        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Number).unwrap();
        catalog.publish(s);
        assert!(catalog.has_pending());
        assert_eq!(catalog.facts(), vec!["t".to_string()]);

        let (statements, columns) = catalog.take_pending();
        assert_eq!(columns.len(), 1);
        assert_eq!(statements.len(), 2);
        assert!(!catalog.has_pending());

        catalog.requeue(columns);
        assert!(catalog.has_pending());
    }

    #[test]
    fn test_snapshots_are_stable() {
        let catalog = Catalog::default();
        catalog.publish(Snowflake::new("t"));
        let before = catalog.snapshot("t").unwrap();

        let mut next = (*before).clone();
        next.add_column("a", JsonType::String).unwrap();
        catalog.publish(next);

        assert!(before.columns().is_empty());
        assert_eq!(catalog.snapshot("t").unwrap().columns().len(), 1);
    }

    #[test]
    fn test_load_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        let catalog = Catalog::load(&conn).unwrap();
        assert!(catalog.facts().is_empty());

        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Number).unwrap();
        s.nest_column("c").unwrap();
        s.add_column("c.d", JsonType::String).unwrap();
        let here = Location::caller();
        let mut statements = vec![
            Statement::new(r#"CREATE TABLE "t" ("__id__" BIGINT, "__guid__" VARCHAR, "a.$n" DOUBLE, "c.$e" INTEGER)"#),
            Statement::new(r#"CREATE TABLE "t.c" ("__id__" BIGINT, "__parent__" BIGINT, "__order__" INTEGER, "d.$s" VARCHAR)"#),
            Statement::new(r#"INSERT INTO "t" VALUES (7, 'g', 1, 1)"#),
            Statement::new(r#"CREATE TABLE "empty" ("__id__" BIGINT, "__guid__" VARCHAR)"#),
        ];
        statements.extend(ddl::catalog_records(&s.take_dirty()));
        for statement in &statements {
            worker::execute(&conn, statement, here).unwrap();
        }

        let catalog = Catalog::load(&conn).unwrap();
        assert_eq!(catalog.facts(), vec!["empty".to_string(), "t".to_string()]);
        let mut t = (*catalog.snapshot("t").unwrap()).clone();
        assert_eq!(t.nested_paths(), vec!["c".to_string()]);
        assert_eq!(t.columns().len(), s.columns().len());
        assert_eq!(t.next_uid("t"), 8);
    }
}
