//! Testing utilities for tandem-store
//!
//! Provides a scriptable in-memory [`Connection`] so routing and failure
//! semantics can be tested without a live database.
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem_store::testing::StubConnection;
//!
//! #[tokio::test]
//! async fn test_routing() {
//!     let src = StubConnection::new("src");
//!     let dst = StubConnection::new("dst").fail_executes_with("disk full");
//!
//!     let pool = DualWritePool::new(Arc::new(src.clone()), Arc::new(dst.clone()));
//!     pool.execute("UPDATE t SET x = 1", &[]).await.unwrap();
//!
//!     assert_eq!(src.execute_count(), 1);
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::connection::{Connection, IsolationLevel, PreparedStatement, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// A recorded statement: SQL text plus bound parameters
pub type Statement = (String, Vec<Value>);

#[derive(Debug)]
struct StubState {
    executed: Vec<Statement>,
    queried: Vec<Statement>,
    tx_executed: Vec<Statement>,
    queued_rows: VecDeque<Vec<Row>>,
    fail_execute: Option<String>,
    fail_query: Option<String>,
    fail_begin: Option<String>,
    fail_commit: Option<String>,
    begun: usize,
    committed: usize,
    rolled_back: usize,
    isolation_set: Option<IsolationLevel>,
    valid: bool,
    closed: bool,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            executed: Vec::new(),
            queried: Vec::new(),
            tx_executed: Vec::new(),
            queued_rows: VecDeque::new(),
            fail_execute: None,
            fail_query: None,
            fail_begin: None,
            fail_commit: None,
            begun: 0,
            committed: 0,
            rolled_back: 0,
            isolation_set: None,
            valid: true,
            closed: false,
        }
    }
}

/// A scriptable connection stub that journals every call
///
/// Clones share state, so a test can keep a handle for assertions while the
/// pool owns another.
#[derive(Debug, Clone)]
pub struct StubConnection {
    label: String,
    state: Arc<Mutex<StubState>>,
}

impl StubConnection {
    /// Create a stub named `label`; the label is carried in scripted errors
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(StubState::default())),
        }
    }

    /// Queue one query response (responses pop in FIFO order)
    pub fn with_rows(self, rows: Vec<Row>) -> Self {
        self.state.lock().queued_rows.push_back(rows);
        self
    }

    /// Queue a query response after construction
    pub fn queue_rows(&self, rows: Vec<Row>) {
        self.state.lock().queued_rows.push_back(rows);
    }

    /// Make every `execute` call fail (plain and transactional)
    pub fn fail_executes_with(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_execute = Some(message.into());
        self
    }

    /// Make every `query` call fail
    pub fn fail_queries_with(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_query = Some(message.into());
        self
    }

    /// Make `begin` fail
    pub fn fail_begin_with(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_begin = Some(message.into());
        self
    }

    /// Make transaction commits fail
    pub fn fail_commit_with(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_commit = Some(message.into());
        self
    }

    /// Mark the connection invalid
    pub fn set_valid(&self, valid: bool) {
        self.state.lock().valid = valid;
    }

    /// Statements executed outside transactions
    pub fn executed(&self) -> Vec<Statement> {
        self.state.lock().executed.clone()
    }

    /// Number of `execute` calls outside transactions
    pub fn execute_count(&self) -> usize {
        self.state.lock().executed.len()
    }

    /// Statements queried
    pub fn queried(&self) -> Vec<Statement> {
        self.state.lock().queried.clone()
    }

    /// Number of `query` calls
    pub fn query_count(&self) -> usize {
        self.state.lock().queried.len()
    }

    /// Statements executed inside transactions
    pub fn tx_executed(&self) -> Vec<Statement> {
        self.state.lock().tx_executed.clone()
    }

    /// Number of transactions begun
    pub fn begun(&self) -> usize {
        self.state.lock().begun
    }

    /// Number of transactions committed
    pub fn committed(&self) -> usize {
        self.state.lock().committed
    }

    /// Number of transactions rolled back
    pub fn rolled_back(&self) -> usize {
        self.state.lock().rolled_back
    }

    /// Isolation level set on the latest transaction, if any
    pub fn isolation_set(&self) -> Option<IsolationLevel> {
        self.state.lock().isolation_set
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Connection for StubConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.fail_query {
            return Err(Error::query(format!("{}: {}", self.label, msg)));
        }
        state.queried.push((sql.to_string(), params.to_vec()));
        Ok(state.queued_rows.pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.fail_execute {
            return Err(Error::query_with_sql(
                format!("{}: {}", self.label, msg),
                sql,
            ));
        }
        state.executed.push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    async fn prepare(&self, _sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Err(Error::unsupported("prepare not supported by stub connection"))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.fail_begin {
            return Err(Error::transaction(format!("{}: {}", self.label, msg)));
        }
        state.begun += 1;
        Ok(Box::new(StubTransaction {
            label: self.label.clone(),
            state: self.state.clone(),
        }))
    }

    async fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Transaction handle produced by [`StubConnection::begin`]
#[derive(Debug)]
pub struct StubTransaction {
    label: String,
    state: Arc<Mutex<StubState>>,
}

#[async_trait]
impl Transaction for StubTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.fail_query {
            return Err(Error::query(format!("{}: {}", self.label, msg)));
        }
        state.queried.push((sql.to_string(), params.to_vec()));
        Ok(state.queued_rows.pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.fail_execute {
            return Err(Error::query_with_sql(
                format!("{}: {}", self.label, msg),
                sql,
            ));
        }
        state.tx_executed.push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.fail_commit {
            return Err(Error::transaction(format!("{}: {}", self.label, msg)));
        }
        state.committed += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.lock().rolled_back += 1;
        Ok(())
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.state.lock().isolation_set = Some(level);
        Ok(())
    }
}
