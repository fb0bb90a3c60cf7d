//! The database facade: JX queries in, JSON results out

use std::future::Future;
use std::panic::Location;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use duckdb::Connection;
use jx_ir::Query;
use jx_snowflake::{shred, Snowflake};
use jx_sql::{assemble, compile};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::ddl;
use crate::worker::{Op, Rows, Statement, TxnId, Worker};
use crate::{ExecutionError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseOptions {
    /// Database file; `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// How long a deferred command waits before the watchdog warns.
    pub watchdog: Duration,
    /// Interval of the background catalog flush.
    pub catalog_flush: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            path: None,
            watchdog: Duration::from_secs(10),
            catalog_flush: Duration::from_secs(1),
        }
    }
}

struct Inner {
    worker: Worker,
    catalog: Catalog,
    /// Serializes writers so each clones the latest snapshot.
    writer: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Queued ahead of shutdown, so the worker runs it before exiting.
        let (statements, _) = self.catalog.take_pending();
        if !statements.is_empty() {
            drop(self.worker.send(Op::Execute(statements), None, Location::caller()));
        }
    }
}

/// Shared handle to one DuckDB database. Clones share the connection.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    pub fn open(options: DatabaseOptions) -> Result<Database> {
        let caller = Location::caller();
        let conn = match &options.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| ExecutionError::execute(e, "open", caller))?;
        let catalog = Catalog::load(&conn)?;
        let worker = Worker::spawn(conn, options.watchdog)
            .map_err(|e| ExecutionError::execute(e, "spawn worker", caller))?;
        info!(
            path = ?options.path,
            watchdog_ms = options.watchdog.as_millis() as u64,
            "Opened database"
        );

        let inner = Arc::new(Inner {
            worker,
            catalog,
            writer: tokio::sync::Mutex::new(()),
        });
        spawn_flusher(Arc::downgrade(&inner), options.catalog_flush)
            .map_err(|e| ExecutionError::execute(e, "spawn flusher", caller))?;
        Ok(Database { inner })
    }

    pub fn in_memory() -> Result<Database> {
        Database::open(DatabaseOptions::default())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Run a JX query and assemble its result document.
    #[track_caller]
    pub fn query<'a>(&'a self, jx: &'a Value) -> impl Future<Output = Result<Value>> + 'a {
        let caller = Location::caller();
        async move {
            let started = Instant::now();
            let snowflake = self.inner.catalog.resolve(jx)?;
            let query = Query::normalize(jx, snowflake.as_ref())?;
            let compiled = compile(&query, &snowflake)?;
            let rows = self
                .inner
                .worker
                .run(Op::Query(Statement::new(compiled.sql.as_str())), None, caller)
                .await?;
            debug!(
                fingerprint = %query.fingerprint,
                rows = rows.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Query executed"
            );
            Ok(assemble(&compiled, &query, rows)?)
        }
    }

    /// Run raw SQL outside any transaction.
    #[track_caller]
    pub fn sql<'a>(&'a self, sql: &'a str) -> impl Future<Output = Result<Rows>> + 'a {
        let caller = Location::caller();
        async move {
            self.inner
                .worker
                .run(Op::Query(Statement::new(sql)), None, caller)
                .await
        }
    }

    /// Shred `docs` into `fact`, creating the fact and any new columns, and
    /// return the documents' GUIDs. All of it commits or none of it does.
    #[track_caller]
    pub fn insert<'a>(
        &'a self,
        fact: &'a str,
        docs: &'a [Value],
    ) -> impl Future<Output = Result<Vec<String>>> + 'a {
        let caller = Location::caller();
        async move {
            let _writer = self.inner.writer.lock().await;
            let (mut snowflake, mut changes) = match self.inner.catalog.snapshot(fact) {
                Some(current) => (Snowflake::clone(&current), Vec::new()),
                None => {
                    let (snowflake, create) = Snowflake::create_fact(fact);
                    (snowflake, vec![create])
                }
            };
            let shredded = shred(&mut snowflake, docs)?;
            changes.extend(shredded.changes);

            let mut statements: Vec<Statement> =
                changes.iter().flat_map(ddl::schema_change).collect();
            statements.extend(changes.iter().flat_map(ddl::migrations));
            statements.extend(shredded.batches.iter().flat_map(ddl::insert));

            let txn = self.begin_at(caller).await?;
            if let Err(e) = txn.execute_at(statements, caller).await {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Rollback after failed insert failed");
                }
                return Err(e);
            }
            txn.commit_at(caller).await?;

            info!(
                fact = %fact,
                docs = docs.len(),
                changes = changes.len(),
                "Inserted documents"
            );
            self.inner.catalog.publish(snowflake);
            Ok(shredded.guids)
        }
    }

    /// Persist queued catalog changes now.
    #[track_caller]
    pub fn flush_catalog(&self) -> impl Future<Output = Result<usize>> + '_ {
        let caller = Location::caller();
        async move {
            let (statements, columns) = self.inner.catalog.take_pending();
            if columns.is_empty() {
                return Ok(0);
            }
            let count = columns.len();
            match self.inner.worker.run(Op::Execute(statements), None, caller).await {
                Ok(_) => {
                    info!(columns = count, "Flushed column catalog");
                    Ok(count)
                }
                Err(e) => {
                    self.inner.catalog.requeue(columns);
                    Err(e)
                }
            }
        }
    }

    /// Open a transaction. Other work on this database waits until it ends.
    #[track_caller]
    pub fn begin(&self) -> impl Future<Output = Result<Transaction>> + '_ {
        let caller = Location::caller();
        self.begin_at(caller)
    }

    async fn begin_at(&self, caller: &'static Location<'static>) -> Result<Transaction> {
        let id = self.inner.worker.next_txn();
        self.inner.worker.run(Op::Begin, Some(id), caller).await?;
        Ok(Transaction {
            db: self.clone(),
            id,
            open: true,
        })
    }
}

/// An open transaction. Dropping it without committing rolls it back.
pub struct Transaction {
    db: Database,
    id: TxnId,
    open: bool,
}

impl Transaction {
    #[track_caller]
    pub fn execute(&self, statements: Vec<Statement>) -> impl Future<Output = Result<()>> + '_ {
        let caller = Location::caller();
        self.execute_at(statements, caller)
    }

    async fn execute_at(
        &self,
        statements: Vec<Statement>,
        caller: &'static Location<'static>,
    ) -> Result<()> {
        self.db
            .inner
            .worker
            .run(Op::Execute(statements), Some(self.id), caller)
            .await
            .map(|_| ())
    }

    #[track_caller]
    pub fn query<'a>(&'a self, sql: &'a str) -> impl Future<Output = Result<Rows>> + 'a {
        let caller = Location::caller();
        async move {
            self.db
                .inner
                .worker
                .run(Op::Query(Statement::new(sql)), Some(self.id), caller)
                .await
        }
    }

    #[track_caller]
    pub fn commit(self) -> impl Future<Output = Result<()>> {
        let caller = Location::caller();
        self.commit_at(caller)
    }

    async fn commit_at(mut self, caller: &'static Location<'static>) -> Result<()> {
        self.open = false;
        self.db
            .inner
            .worker
            .run(Op::Commit, Some(self.id), caller)
            .await
            .map(|_| ())
    }

    #[track_caller]
    pub fn rollback(mut self) -> impl Future<Output = Result<()>> {
        let caller = Location::caller();
        self.open = false;
        let db = self.db.clone();
        let id = self.id;
        async move {
            db.inner
                .worker
                .run(Op::Rollback, Some(id), caller)
                .await
                .map(|_| ())
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.open {
            drop(self.db.inner.worker.send(Op::Rollback, Some(self.id), Location::caller()));
        }
    }
}

fn spawn_flusher(inner: Weak<Inner>, interval: Duration) -> std::io::Result<()> {
    thread::Builder::new()
        .name("jx-catalog-flush".into())
        .spawn(move || loop {
            thread::sleep(interval);
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.catalog.has_pending() {
                continue;
            }
            let (statements, columns) = inner.catalog.take_pending();
            let count = columns.len();
            let reply = inner.worker.send(Op::Execute(statements), None, Location::caller());
            match reply.blocking_recv() {
                Ok(Ok(_)) => info!(columns = count, "Flushed column catalog"),
                Ok(Err(e)) => {
                    warn!(error = %e, "Catalog flush failed");
                    inner.catalog.requeue(columns);
                }
                Err(_) => break,
            }
        })
        .map(|_| ())
}
