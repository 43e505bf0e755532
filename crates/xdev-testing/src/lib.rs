//! # xdev-testing
//!
//! In-process fake backend for driver tests.
//!
//! [`MockServer`] implements [`Connector`] and hands out links that behave
//! like a very small database server: per-endpoint reachability control for
//! failover tests, a monotonically increasing server-side connection id for
//! idle-TTL tests, a prepared-statement registry with an optional ceiling
//! for statement-cache tests, and a single-table transactional row store
//! (`INSERT INTO t VALUES (?)` / `SELECT * FROM t`) with savepoint support.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use xdev_wire::{
    Address, Connector, Endpoint, ExecResult, Link, StatementId, Value, WireError,
};

/// Shared fake server. Cheap to clone; all clones observe the same state.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

#[derive(Default)]
struct ServerState {
    unreachable: HashSet<Address>,
    connected_log: Vec<Address>,
    next_connection_id: u64,
    next_stmt_id: u32,
    max_prepared: Option<usize>,
    prepared: HashMap<(u64, StatementId), String>,
    prepared_created: u64,
    statement_log: Vec<String>,
    execute_calls: u64,
    prepare_calls: u64,
    execute_prepared_calls: u64,
    deallocate_calls: u64,
    sessions: HashMap<u64, ConnState>,
    committed: Vec<i64>,
}

#[derive(Default)]
struct ConnState {
    in_tx: bool,
    pending: Vec<i64>,
    /// (name, length of `pending` at creation), in creation order.
    savepoints: Vec<(String, usize)>,
}

impl MockServer {
    /// Create a fresh server with every endpoint reachable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an endpoint refuse connections.
    pub fn set_unreachable(&self, endpoint: &Endpoint) {
        self.state
            .lock()
            .unreachable
            .insert(endpoint.address().clone());
    }

    /// Make an endpoint accept connections again.
    pub fn set_reachable(&self, endpoint: &Endpoint) {
        self.state.lock().unreachable.remove(endpoint.address());
    }

    /// Cap the number of concurrently prepared statements.
    pub fn set_max_prepared(&self, max: usize) {
        self.state.lock().max_prepared = Some(max);
    }

    /// Total connections ever opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().next_connection_id
    }

    /// Addresses of successful connects, in order.
    #[must_use]
    pub fn connected_log(&self) -> Vec<Address> {
        self.state.lock().connected_log.clone()
    }

    /// Currently live entries in the prepared-statement registry.
    #[must_use]
    pub fn prepared_count(&self) -> usize {
        self.state.lock().prepared.len()
    }

    /// Prepared statements ever created.
    #[must_use]
    pub fn prepared_created(&self) -> u64 {
        self.state.lock().prepared_created
    }

    /// Every statement text the server ran (direct and prepared).
    #[must_use]
    pub fn statement_log(&self) -> Vec<String> {
        self.state.lock().statement_log.clone()
    }

    /// Direct-execute request count.
    #[must_use]
    pub fn execute_calls(&self) -> u64 {
        self.state.lock().execute_calls
    }

    /// Prepare request count.
    #[must_use]
    pub fn prepare_calls(&self) -> u64 {
        self.state.lock().prepare_calls
    }

    /// Execute-prepared request count.
    #[must_use]
    pub fn execute_prepared_calls(&self) -> u64 {
        self.state.lock().execute_prepared_calls
    }

    /// Deallocate request count.
    #[must_use]
    pub fn deallocate_calls(&self) -> u64 {
        self.state.lock().deallocate_calls
    }

    /// Committed rows of the single test table.
    #[must_use]
    pub fn committed_rows(&self) -> Vec<i64> {
        self.state.lock().committed.clone()
    }
}

#[async_trait]
impl Connector for MockServer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, WireError> {
        let mut st = self.state.lock();
        if st.unreachable.contains(endpoint.address()) {
            return Err(WireError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }
        st.next_connection_id += 1;
        let id = st.next_connection_id;
        st.connected_log.push(endpoint.address().clone());
        st.sessions.insert(id, ConnState::default());
        tracing::trace!(connection_id = id, endpoint = %endpoint, "mock connection opened");
        Ok(Box::new(MockLink {
            connection_id: id,
            endpoint: endpoint.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLink {
    connection_id: u64,
    endpoint: Endpoint,
    state: Arc<Mutex<ServerState>>,
}

impl ServerState {
    fn run(&mut self, conn: u64, text: &str, params: &[Value]) -> Result<ExecResult, WireError> {
        self.statement_log.push(text.to_owned());
        let text = text.trim();

        if text.eq_ignore_ascii_case("BEGIN") {
            let sess = self.sessions.entry(conn).or_default();
            sess.in_tx = true;
            sess.pending.clear();
            sess.savepoints.clear();
            return Ok(done(0));
        }
        if text.eq_ignore_ascii_case("COMMIT") {
            let rows = {
                let sess = self.sessions.entry(conn).or_default();
                sess.in_tx = false;
                sess.savepoints.clear();
                std::mem::take(&mut sess.pending)
            };
            self.committed.extend(rows);
            return Ok(done(0));
        }
        if text.eq_ignore_ascii_case("ROLLBACK") {
            let sess = self.sessions.entry(conn).or_default();
            sess.in_tx = false;
            sess.savepoints.clear();
            sess.pending.clear();
            return Ok(done(0));
        }
        if let Some(name) = strip_keyword(text, "SAVEPOINT ") {
            let sess = self.sessions.entry(conn).or_default();
            sess.savepoints.retain(|(n, _)| n != name);
            let mark = sess.pending.len();
            sess.savepoints.push((name.to_owned(), mark));
            return Ok(done(0));
        }
        if let Some(name) = strip_keyword(text, "ROLLBACK TO SAVEPOINT ") {
            let sess = self.sessions.entry(conn).or_default();
            let Some(pos) = sess.savepoints.iter().position(|(n, _)| n == name) else {
                return Err(unknown_savepoint(name));
            };
            let mark = sess.savepoints[pos].1;
            sess.pending.truncate(mark);
            sess.savepoints.truncate(pos + 1);
            return Ok(done(0));
        }
        if let Some(name) = strip_keyword(text, "RELEASE SAVEPOINT ") {
            let sess = self.sessions.entry(conn).or_default();
            let Some(pos) = sess.savepoints.iter().position(|(n, _)| n == name) else {
                return Err(unknown_savepoint(name));
            };
            sess.savepoints.remove(pos);
            return Ok(done(0));
        }
        if text.eq_ignore_ascii_case("SELECT CONNECTION_ID()") {
            return Ok(rows(
                vec!["CONNECTION_ID()".into()],
                vec![vec![Value::UInt(conn)]],
            ));
        }
        if text.eq_ignore_ascii_case("INSERT INTO t VALUES (?)") {
            let value = match params.first() {
                Some(Value::Int(v)) => *v,
                _ => {
                    return Err(WireError::Server {
                        code: 1064,
                        message: "INSERT INTO t expects one integer parameter".into(),
                    });
                }
            };
            let sess = self.sessions.entry(conn).or_default();
            if sess.in_tx {
                sess.pending.push(value);
            } else {
                self.committed.push(value);
            }
            return Ok(done(1));
        }
        if text.eq_ignore_ascii_case("SELECT * FROM t") {
            let mut data = self.committed.clone();
            if let Some(sess) = self.sessions.get(&conn) {
                data.extend(sess.pending.iter().copied());
            }
            return Ok(rows(
                vec!["v".into()],
                data.into_iter().map(|v| vec![Value::Int(v)]).collect(),
            ));
        }

        // Anything else is accepted and recorded; CRUD-layer tests assert
        // on the statement log and on call counters, not on data.
        Ok(done(0))
    }
}

fn done(affected_rows: u64) -> ExecResult {
    ExecResult {
        affected_rows,
        ..ExecResult::default()
    }
}

fn rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> ExecResult {
    ExecResult {
        affected_rows: 0,
        columns,
        rows,
    }
}

fn unknown_savepoint(name: &str) -> WireError {
    WireError::Server {
        code: 1305,
        message: format!("SAVEPOINT {name} does not exist"),
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    if text.len() > keyword.len() && text[..keyword.len()].eq_ignore_ascii_case(keyword) {
        Some(text[keyword.len()..].trim_matches('`'))
    } else {
        None
    }
}

#[async_trait]
impl Link for MockLink {
    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn execute(&mut self, text: &str, params: &[Value]) -> Result<ExecResult, WireError> {
        let mut st = self.state.lock();
        st.execute_calls += 1;
        st.run(self.connection_id, text, params)
    }

    async fn prepare(&mut self, text: &str) -> Result<StatementId, WireError> {
        let mut st = self.state.lock();
        st.prepare_calls += 1;
        if let Some(max) = st.max_prepared {
            if st.prepared.len() >= max {
                return Err(WireError::StatementLimit);
            }
        }
        st.next_stmt_id += 1;
        let id = st.next_stmt_id;
        st.prepared.insert((self.connection_id, id), text.to_owned());
        st.prepared_created += 1;
        Ok(id)
    }

    async fn execute_prepared(
        &mut self,
        stmt_id: StatementId,
        params: &[Value],
    ) -> Result<ExecResult, WireError> {
        let mut st = self.state.lock();
        st.execute_prepared_calls += 1;
        let Some(text) = st.prepared.get(&(self.connection_id, stmt_id)).cloned() else {
            return Err(WireError::Server {
                code: 1243,
                message: format!("unknown prepared statement handler {stmt_id}"),
            });
        };
        st.run(self.connection_id, &text, params)
    }

    async fn deallocate(&mut self, stmt_id: StatementId) -> Result<(), WireError> {
        let mut st = self.state.lock();
        st.deallocate_calls += 1;
        st.prepared.remove(&(self.connection_id, stmt_id));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WireError> {
        let mut st = self.state.lock();
        st.sessions.remove(&self.connection_id);
        let conn = self.connection_id;
        st.prepared.retain(|(c, _), _| *c != conn);
        Ok(())
    }
}
