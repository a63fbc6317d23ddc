//! Mock warehouse for testing.
//!
//! Provides an in-memory warehouse service with a scripted status oracle,
//! registered statement results and failure injection. Every statement is
//! logged with the session that issued it so tests can check which session
//! did what.

use super::{
    ColumnInfo, DetachedExecution, LiveCursor, QueryId, Row, RowCursor, Session, SessionFactory,
    SessionId, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{DetachError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One scripted answer from the status oracle.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// The history relation has no row for the query yet.
    Absent,
    /// The history relation reports this execution status.
    Status(String),
    /// The status lookup itself fails.
    Error(String),
}

impl OracleReply {
    /// Shorthand for a reported status.
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status(status.into())
    }
}

/// A statement as received by the mock warehouse.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementLog {
    /// Session that issued the statement.
    pub session: SessionId,
    /// Statement text.
    pub statement: String,
    /// Bound positional parameters.
    pub params: Vec<Value>,
    /// Whether it was submitted through detached execution.
    pub detached: bool,
}

type ResultData = (Vec<ColumnInfo>, Vec<Row>);

#[derive(Default)]
struct WarehouseState {
    next_session: u64,
    next_query: u64,
    opens: usize,
    open_sessions: HashSet<SessionId>,
    opened: Vec<SessionId>,
    closed: Vec<SessionId>,
    log: Vec<StatementLog>,
    oracle: VecDeque<OracleReply>,
    oracle_fallback: Option<OracleReply>,
    results: HashMap<String, ResultData>,
    query_results: HashMap<QueryId, ResultData>,
    launched: Vec<(QueryId, SessionId)>,
    fail_open_on: Option<usize>,
    fail_execute: Option<String>,
    fail_launch: Option<String>,
    fail_fetch: Option<String>,
    status_delay: Option<Duration>,
    fail_close: Option<String>,
    no_detached: bool,
}

/// An in-memory warehouse service shared by all sessions it opens.
///
/// Cloning yields another handle to the same warehouse.
#[derive(Clone, Default)]
pub struct MockWarehouse {
    state: Arc<Mutex<WarehouseState>>,
}

impl MockWarehouse {
    /// Creates a warehouse whose oracle reports no rows until scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the warehouse used by `--mock-db`: every query is absent from
    /// history once, running once, then succeeds.
    pub fn demo() -> Self {
        Self::new()
            .with_oracle([
                OracleReply::Absent,
                OracleReply::status("RUNNING"),
                OracleReply::status("SUCCESS"),
            ])
            .with_oracle_fallback(OracleReply::status("SUCCESS"))
            .with_result(
                "CALL SYSTEM$WAIT(10, 'SECONDS')",
                vec![ColumnInfo::new("SYSTEM$WAIT", "text")],
                vec![vec![Value::from("waited 10 seconds")]],
            )
    }

    fn lock(&self) -> MutexGuard<'_, WarehouseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues replies for successive status lookups.
    pub fn with_oracle(self, replies: impl IntoIterator<Item = OracleReply>) -> Self {
        self.lock().oracle.extend(replies);
        self
    }

    /// Sets the reply used once the scripted replies run out.
    pub fn with_oracle_fallback(self, reply: OracleReply) -> Self {
        self.lock().oracle_fallback = Some(reply);
        self
    }

    /// Registers the result a statement produces, directly or via result scan.
    pub fn with_result(
        self,
        statement: impl Into<String>,
        columns: Vec<ColumnInfo>,
        rows: Vec<Row>,
    ) -> Self {
        self.lock()
            .results
            .insert(normalize(&statement.into()), (columns, rows));
        self
    }

    /// Makes the `n`th session open (1-based) fail.
    pub fn fail_open_on(self, n: usize) -> Self {
        self.lock().fail_open_on = Some(n);
        self
    }

    /// Makes every `execute` call fail with the given message.
    pub fn fail_execute(self, msg: impl Into<String>) -> Self {
        self.lock().fail_execute = Some(msg.into());
        self
    }

    /// Makes detached submission fail with the given message.
    pub fn fail_launch(self, msg: impl Into<String>) -> Self {
        self.lock().fail_launch = Some(msg.into());
        self
    }

    /// Makes result scans fail with the given message.
    pub fn fail_fetch(self, msg: impl Into<String>) -> Self {
        self.lock().fail_fetch = Some(msg.into());
        self
    }

    /// Makes every session close fail with the given message.
    pub fn fail_close(self, msg: impl Into<String>) -> Self {
        self.lock().fail_close = Some(msg.into());
        self
    }

    /// Makes every status lookup take this long before the oracle answers.
    pub fn with_status_delay(self, delay: Duration) -> Self {
        self.lock().status_delay = Some(delay);
        self
    }

    /// Opens sessions that do not offer the detached-execution capability.
    pub fn without_detached_support(self) -> Self {
        self.lock().no_detached = true;
        self
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<StatementLog> {
        self.lock().log.clone()
    }

    /// Status lookups received so far, in order.
    pub fn status_polls(&self) -> Vec<StatementLog> {
        self.lock()
            .log
            .iter()
            .filter(|entry| is_status_lookup(&entry.statement))
            .cloned()
            .collect()
    }

    /// Detached statements accepted so far with the session that submitted them.
    pub fn launched_queries(&self) -> Vec<(QueryId, SessionId)> {
        self.lock().launched.clone()
    }

    /// Sessions opened so far, in order.
    pub fn opened_sessions(&self) -> Vec<SessionId> {
        self.lock().opened.clone()
    }

    /// Sessions closed so far, in order.
    pub fn closed_sessions(&self) -> Vec<SessionId> {
        self.lock().closed.clone()
    }

    /// Number of sessions currently open.
    pub fn open_session_count(&self) -> usize {
        self.lock().open_sessions.len()
    }

    fn record(&self, session: SessionId, statement: &str, params: &[Value], detached: bool) {
        self.lock().log.push(StatementLog {
            session,
            statement: statement.to_string(),
            params: params.to_vec(),
            detached,
        });
    }

    fn next_oracle_reply(&self) -> OracleReply {
        let mut state = self.lock();
        match state.oracle.pop_front() {
            Some(reply) => reply,
            None => state.oracle_fallback.clone().unwrap_or(OracleReply::Absent),
        }
    }

    fn check_open(&self, session: SessionId) -> Result<()> {
        if self.lock().open_sessions.contains(&session) {
            Ok(())
        } else {
            Err(DetachError::query(format!("{session} is closed")))
        }
    }
}

#[async_trait]
impl SessionFactory for MockWarehouse {
    async fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        let mut state = self.lock();
        state.opens += 1;
        if state.fail_open_on == Some(state.opens) {
            return Err(DetachError::connection("Mock warehouse refused the connection"));
        }

        state.next_session += 1;
        let id = SessionId(state.next_session);
        state.open_sessions.insert(id);
        state.opened.push(id);
        let detached = !state.no_detached;
        drop(state);

        Ok(Box::new(MockSession {
            id,
            warehouse: self.clone(),
            detached,
        }))
    }
}

/// A session opened by [`MockWarehouse`].
pub struct MockSession {
    id: SessionId,
    warehouse: MockWarehouse,
    detached: bool,
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn execute(&self, statement: &str) -> Result<u64> {
        self.warehouse.check_open(self.id)?;
        self.warehouse.record(self.id, statement, &[], false);

        if let Some(msg) = self.warehouse.lock().fail_execute.clone() {
            return Err(DetachError::query(msg));
        }
        Ok(0)
    }

    async fn query(&self, statement: &str, params: &[Value]) -> Result<RowCursor> {
        self.warehouse.check_open(self.id)?;
        self.warehouse.record(self.id, statement, params, false);

        if is_status_lookup(statement) {
            let delay = self.warehouse.lock().status_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let columns = vec![ColumnInfo::new("EXECUTION_STATUS", "text")];
            return match self.warehouse.next_oracle_reply() {
                OracleReply::Absent => Ok(RowCursor::from_rows(columns, Vec::new())),
                OracleReply::Status(status) => {
                    Ok(RowCursor::from_rows(columns, vec![vec![Value::String(status)]]))
                }
                OracleReply::Error(msg) => Err(DetachError::query(msg)),
            };
        }

        if is_result_scan(statement) {
            let query_id = match params.first() {
                Some(Value::String(id)) => QueryId::new(id.clone()),
                _ => return Err(DetachError::query("RESULT_SCAN requires a query id")),
            };
            let state = self.warehouse.lock();
            if let Some(msg) = &state.fail_fetch {
                return Err(DetachError::query(msg.clone()));
            }
            return match state.query_results.get(&query_id) {
                Some((columns, rows)) => Ok(RowCursor::from_rows(columns.clone(), rows.clone())),
                None => Err(DetachError::query(format!(
                    "Statement {query_id} not found"
                ))),
            };
        }

        let (columns, rows) = result_for(&self.warehouse.lock(), statement);
        Ok(RowCursor::from_rows(columns, rows))
    }

    fn detached(&self) -> Option<&dyn DetachedExecution> {
        if self.detached {
            Some(self)
        } else {
            None
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.warehouse.lock();
        if let Some(msg) = &state.fail_close {
            return Err(DetachError::connection(msg.clone()));
        }
        if !state.open_sessions.remove(&self.id) {
            return Err(DetachError::connection(format!("{} already closed", self.id)));
        }
        state.closed.push(self.id);
        Ok(())
    }
}

#[async_trait]
impl DetachedExecution for MockSession {
    async fn execute_detached(&self, statement: &str) -> Result<LiveCursor> {
        self.warehouse.check_open(self.id)?;
        self.warehouse.record(self.id, statement, &[], true);

        let mut state = self.warehouse.lock();
        if let Some(msg) = &state.fail_launch {
            return Err(DetachError::query(msg.clone()));
        }

        state.next_query += 1;
        let query_id = QueryId::new(format!("01b00000-0000-4000-0000-{:012}", state.next_query));
        let result = result_for(&state, statement);
        state.query_results.insert(query_id.clone(), result);
        state.launched.push((query_id.clone(), self.id));

        Ok(LiveCursor::new(query_id, self.id))
    }
}

fn normalize(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_status_lookup(statement: &str) -> bool {
    statement
        .trim_start()
        .to_uppercase()
        .starts_with("SELECT EXECUTION_STATUS")
}

fn is_result_scan(statement: &str) -> bool {
    statement.to_uppercase().contains("RESULT_SCAN(")
}

fn result_for(state: &WarehouseState, statement: &str) -> ResultData {
    match state.results.get(&normalize(statement)) {
        Some(result) => result.clone(),
        None => (
            vec![ColumnInfo::new("RESULT", "text")],
            vec![vec![Value::String(format!("Mock result for: {statement}"))]],
        ),
    }
}
