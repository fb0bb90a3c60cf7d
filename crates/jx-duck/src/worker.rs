//! The connection worker
//!
//! A dedicated thread owns the DuckDB connection and runs jobs FIFO. While a
//! transaction is current, jobs that do not belong to it are parked in a
//! deferral queue and replayed, in order, once it commits or rolls back.

use std::collections::VecDeque;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use duckdb::Connection;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::convert::to_json;
use crate::{ExecutionError, Result};

/// How often the worker checks deferred jobs against the watchdog.
const WATCH_TICK: Duration = Duration::from_millis(250);

pub(crate) type TxnId = u64;
pub type Rows = Vec<Vec<Value>>;

/// SQL text plus bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<duckdb::types::Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<duckdb::types::Value>) -> Self {
        Statement {
            sql: sql.into(),
            params,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Op {
    Query(Statement),
    Execute(Vec<Statement>),
    Begin,
    Commit,
    Rollback,
}

pub(crate) struct Job {
    op: Op,
    txn: Option<TxnId>,
    caller: &'static Location<'static>,
    reply: oneshot::Sender<Result<Rows>>,
    submitted: Instant,
    warned: bool,
    span: tracing::Span,
}

struct Current {
    id: TxnId,
    caller: &'static Location<'static>,
    /// First error raised inside the transaction.
    failed: Option<String>,
}

struct State {
    conn: Connection,
    current: Option<Current>,
    deferred: VecDeque<Job>,
    watchdog: Duration,
}

/// Handle to the worker thread. Dropping it lets queued jobs finish and
/// joins the thread.
pub(crate) struct Worker {
    tx: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    next_txn: AtomicU64,
}

impl Worker {
    pub(crate) fn spawn(conn: Connection, watchdog: Duration) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("jx-duck".into())
            .spawn(move || {
                let mut state = State {
                    conn,
                    current: None,
                    deferred: VecDeque::new(),
                    watchdog,
                };
                loop {
                    match rx.recv_timeout(WATCH_TICK) {
                        Ok(job) => state.submit(job),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    state.watch();
                }
                state.shutdown();
            })?;
        Ok(Worker {
            tx: Some(tx),
            handle: Some(handle),
            next_txn: AtomicU64::new(1),
        })
    }

    pub(crate) fn next_txn(&self) -> TxnId {
        self.next_txn.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a job; the receiver resolves when it has run.
    pub(crate) fn send(
        &self,
        op: Op,
        txn: Option<TxnId>,
        caller: &'static Location<'static>,
    ) -> oneshot::Receiver<Result<Rows>> {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            op,
            txn,
            caller,
            reply,
            submitted: Instant::now(),
            warned: false,
            span: tracing::Span::current(),
        };
        if let Some(tx) = &self.tx {
            // A dead worker drops the job, which closes `rx`.
            let _ = tx.send(job);
        }
        rx
    }

    pub(crate) async fn run(
        &self,
        op: Op,
        txn: Option<TxnId>,
        caller: &'static Location<'static>,
    ) -> Result<Rows> {
        self.send(op, txn, caller)
            .await
            .map_err(|_| ExecutionError::WorkerGone)?
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Database worker panicked");
            }
        }
    }
}

impl State {
    fn blocks(&self, job: &Job) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| job.txn != Some(current.id))
    }

    fn submit(&mut self, job: Job) {
        if self.blocks(&job) {
            debug!(caller = %job.caller, "Deferring behind open transaction");
            self.deferred.push_back(job);
            return;
        }
        if self.run(job) {
            self.replay();
        }
    }

    /// Run deferred jobs in order until one of them opens a transaction.
    fn replay(&mut self) {
        let mut pending = std::mem::take(&mut self.deferred);
        while let Some(job) = pending.pop_front() {
            if self.blocks(&job) {
                self.deferred.push_back(job);
                continue;
            }
            if self.run(job) {
                self.deferred.append(&mut pending);
                pending = std::mem::take(&mut self.deferred);
            }
        }
    }

    fn watch(&mut self) {
        let Some(current) = &self.current else {
            return;
        };
        for job in self.deferred.iter_mut().filter(|j| !j.warned) {
            let waited = job.submitted.elapsed();
            if waited >= self.watchdog {
                warn!(
                    blocking = %current.caller,
                    blocked = %job.caller,
                    waited_ms = waited.as_millis() as u64,
                    "Command deferred behind a long-running transaction"
                );
                job.warned = true;
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(current) = self.current.take() {
            warn!(caller = %current.caller, "Rolling back transaction left open at shutdown");
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback at shutdown failed");
            }
        }
    }

    /// Run one job; `true` when it ended the current transaction.
    fn run(&mut self, job: Job) -> bool {
        let Job {
            op,
            txn,
            caller,
            reply,
            span,
            ..
        } = job;
        let _guard = span.enter();
        let (result, released) = match op {
            Op::Begin => (self.begin(txn, caller), false),
            Op::Commit => (self.end(txn, caller, true), true),
            Op::Rollback => (self.end(txn, caller, false), true),
            Op::Query(statement) => (self.guarded(txn, |conn| query(conn, &statement, caller)), false),
            Op::Execute(statements) => (
                self.guarded(txn, |conn| {
                    for statement in &statements {
                        execute(conn, statement, caller)?;
                    }
                    Ok(Vec::new())
                }),
                false,
            ),
        };
        let _ = reply.send(result);
        released
    }

    fn begin(&mut self, txn: Option<TxnId>, caller: &'static Location<'static>) -> Result<Rows> {
        let Some(id) = txn else {
            return Err(ExecutionError::Transaction {
                cause: "BEGIN without a transaction".into(),
            });
        };
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(|e| ExecutionError::execute(e, "BEGIN TRANSACTION", caller))?;
        debug!(txn = id, caller = %caller, "Transaction opened");
        self.current = Some(Current {
            id,
            caller,
            failed: None,
        });
        Ok(Vec::new())
    }

    fn end(&mut self, txn: Option<TxnId>, caller: &'static Location<'static>, commit: bool) -> Result<Rows> {
        let current = match self.current.take() {
            Some(current) if Some(current.id) == txn => current,
            other => {
                self.current = other;
                return Err(ExecutionError::Transaction {
                    cause: "transaction is not open".into(),
                });
            }
        };
        if commit && current.failed.is_none() {
            if let Err(e) = self.conn.execute_batch("COMMIT") {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!(txn = current.id, error = %rollback, "Rollback after failed commit failed");
                }
                return Err(ExecutionError::execute(e, "COMMIT", caller));
            }
            debug!(txn = current.id, "Transaction committed");
            return Ok(Vec::new());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| ExecutionError::execute(e, "ROLLBACK", caller))?;
        debug!(txn = current.id, "Transaction rolled back");
        match current.failed {
            Some(cause) if commit => Err(ExecutionError::Transaction { cause }),
            _ => Ok(Vec::new()),
        }
    }

    /// Run `f` inside the job's transaction, if any: fail fast after an
    /// earlier error and record the first one.
    fn guarded(
        &mut self,
        txn: Option<TxnId>,
        f: impl FnOnce(&Connection) -> Result<Rows>,
    ) -> Result<Rows> {
        let Some(id) = txn else {
            return f(&self.conn);
        };
        match &self.current {
            Some(current) if current.id == id => {
                if let Some(cause) = &current.failed {
                    return Err(ExecutionError::Transaction {
                        cause: cause.clone(),
                    });
                }
            }
            _ => {
                return Err(ExecutionError::Transaction {
                    cause: "transaction is not open".into(),
                })
            }
        }
        let result = f(&self.conn);
        if let (Err(e), Some(current)) = (&result, self.current.as_mut()) {
            current.failed = Some(e.to_string());
        }
        result
    }
}

pub(crate) fn query(conn: &Connection, statement: &Statement, caller: &'static Location<'static>) -> Result<Rows> {
    let fail = |e: duckdb::Error| ExecutionError::execute(e, &statement.sql, caller);
    let mut prepared = conn.prepare(&statement.sql).map_err(fail)?;
    let mut rows = prepared
        .query(duckdb::params_from_iter(statement.params.iter()))
        .map_err(fail)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(fail)? {
        let width = row.as_ref().column_count();
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            let value: duckdb::types::Value = row.get(i).map_err(fail)?;
            values.push(to_json(value));
        }
        out.push(values);
    }
    Ok(out)
}

pub(crate) fn execute(conn: &Connection, statement: &Statement, caller: &'static Location<'static>) -> Result<()> {
    let result = if statement.params.is_empty() {
        conn.execute_batch(&statement.sql)
    } else {
        conn.execute(&statement.sql, duckdb::params_from_iter(statement.params.iter()))
            .map(|_| ())
    };
    result.map_err(|e| ExecutionError::execute(e, &statement.sql, caller))
}
