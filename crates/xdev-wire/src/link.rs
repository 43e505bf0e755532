//! The seams between the session layer and a concrete transport.
//!
//! [`Connector`] opens one physical connection to one endpoint; [`Link`] is
//! everything the session layer may do with it. The pool, the statement
//! cache and the CRUD layer are all written against these traits.

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::WireError;
use crate::message::Value;

/// Server-assigned prepared statement id.
pub type StatementId = u32;

/// Outcome of executing a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    /// Rows affected (zero for result-set statements).
    pub affected_rows: u64,
    /// Column names, empty when no result set was produced.
    pub columns: Vec<String>,
    /// Row data.
    pub rows: Vec<Vec<Value>>,
}

/// One physical, exclusively-owned connection to one endpoint.
#[async_trait]
pub trait Link: Send {
    /// Server-side identity of this connection. Changes whenever a new
    /// physical connection is established, which is how idle-TTL eviction
    /// is observable.
    fn connection_id(&self) -> u64;

    /// The endpoint this link is connected to.
    fn endpoint(&self) -> &Endpoint;

    /// Execute a statement directly, without preparing it.
    async fn execute(&mut self, text: &str, params: &[Value]) -> Result<ExecResult, WireError>;

    /// Prepare a statement server-side, returning its id.
    ///
    /// Returns [`WireError::StatementLimit`] when the server's
    /// prepared-statement ceiling is reached; callers fall back to
    /// [`execute`](Link::execute).
    async fn prepare(&mut self, text: &str) -> Result<StatementId, WireError>;

    /// Execute a prepared statement with fresh bound values.
    async fn execute_prepared(
        &mut self,
        stmt_id: StatementId,
        params: &[Value],
    ) -> Result<ExecResult, WireError>;

    /// Release a server-side prepared statement.
    async fn deallocate(&mut self, stmt_id: StatementId) -> Result<(), WireError>;

    /// Orderly shutdown of the physical connection.
    async fn close(&mut self) -> Result<(), WireError>;
}

/// Opens physical connections to candidate endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection to the given endpoint.
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, WireError>;
}
