//! Sessions: transaction state, savepoints and statement execution.

use once_cell::sync::Lazy;
use regex::Regex;

use xdev_pool::{Connection, PooledConnection};
use xdev_wire::{connect_any, Connector, ExecResult, Fingerprint, Value, WireError};

use crate::config::SessionSettings;
use crate::error::Error;

#[allow(clippy::expect_used)]
static SAVEPOINT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_$]*$").expect("static pattern"));

/// How the session holds its physical connection.
enum Lease {
    /// Checked out of a client's pool; returned on drop.
    Pooled(PooledConnection),
    /// Owned outright by a standalone session.
    Direct(Connection),
}

/// A logical unit of work over one physical connection.
///
/// A session tracks transaction state and the savepoint stack, and routes
/// statement execution through the connection's prepared-statement cache.
/// Dropping a session mid-transaction discards the physical connection
/// rather than returning dirty state to the pool; call
/// [`close`](Session::close) for a graceful rollback.
pub struct Session {
    lease: Option<Lease>,
    tx_active: bool,
    savepoints: Vec<String>,
    savepoint_seq: u64,
}

impl Session {
    pub(crate) fn pooled(conn: PooledConnection) -> Self {
        Self {
            lease: Some(Lease::Pooled(conn)),
            tx_active: false,
            savepoints: Vec::new(),
            savepoint_seq: 0,
        }
    }

    /// Open a standalone (unpooled) session, trying the endpoints in
    /// priority order.
    pub async fn connect(
        settings: &SessionSettings,
        connector: &dyn Connector,
    ) -> Result<Self, Error> {
        let link = connect_any(connector, settings.endpoints()).await?;
        Ok(Self {
            lease: Some(Lease::Direct(Connection::new(0, link))),
            tx_active: false,
            savepoints: Vec::new(),
            savepoint_seq: 0,
        })
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, Error> {
        match self.lease.as_mut() {
            Some(Lease::Pooled(guard)) => {
                if guard.is_doomed() {
                    return Err(Error::ClientClosed);
                }
                Ok(guard.conn_mut())
            }
            Some(Lease::Direct(conn)) => Ok(conn),
            None => Err(Error::SessionClosed),
        }
    }

    fn poison(&mut self) {
        if let Some(Lease::Pooled(guard)) = self.lease.as_mut() {
            guard.poison();
        }
    }

    /// Server-side identity of the underlying connection.
    pub fn server_connection_id(&self) -> Result<u64, Error> {
        match self.lease.as_ref() {
            Some(Lease::Pooled(guard)) => Ok(guard.conn().server_connection_id()),
            Some(Lease::Direct(conn)) => Ok(conn.server_connection_id()),
            None => Err(Error::SessionClosed),
        }
    }

    /// Whether a transaction is currently open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx_active
    }

    /// Execute raw SQL directly, bypassing the prepared-statement cache.
    pub async fn sql(&mut self, text: &str, params: &[Value]) -> Result<ExecResult, Error> {
        let conn = self.conn_mut()?;
        let result = conn.link_mut().execute(text, params).await;
        self.finish(result)
    }

    /// Begin a transaction. Nested transactions are an error; use
    /// savepoints instead.
    pub async fn start_transaction(&mut self) -> Result<(), Error> {
        if self.tx_active {
            return Err(Error::TransactionState(
                "a transaction is already in progress".into(),
            ));
        }
        self.sql("BEGIN", &[]).await?;
        self.tx_active = true;
        self.savepoints.clear();
        Ok(())
    }

    /// Commit the open transaction. A no-op when none is open.
    pub async fn commit(&mut self) -> Result<(), Error> {
        if !self.tx_active {
            return Ok(());
        }
        self.sql("COMMIT", &[]).await?;
        self.tx_active = false;
        self.savepoints.clear();
        Ok(())
    }

    /// Roll the open transaction back. A no-op when none is open.
    pub async fn rollback(&mut self) -> Result<(), Error> {
        if !self.tx_active {
            return Ok(());
        }
        self.sql("ROLLBACK", &[]).await?;
        self.tx_active = false;
        self.savepoints.clear();
        Ok(())
    }

    /// Set a savepoint inside the open transaction, generating a name when
    /// none is given. Re-using an existing name moves that savepoint to the
    /// current position.
    pub async fn set_savepoint(&mut self, name: Option<&str>) -> Result<String, Error> {
        self.require_transaction()?;
        let name = match name {
            Some(given) => {
                if !SAVEPOINT_NAME.is_match(given) {
                    return Err(Error::TransactionState(format!(
                        "invalid savepoint name '{given}'"
                    )));
                }
                given.to_owned()
            }
            None => {
                self.savepoint_seq += 1;
                format!("xdev_sp_{}", self.savepoint_seq)
            }
        };
        self.sql(&format!("SAVEPOINT {name}"), &[]).await?;
        self.savepoints.retain(|n| n != &name);
        self.savepoints.push(name.clone());
        Ok(name)
    }

    /// Release a savepoint without rolling anything back.
    pub async fn release_savepoint(&mut self, name: &str) -> Result<(), Error> {
        self.require_transaction()?;
        let pos = self.known_savepoint(name)?;
        self.sql(&format!("RELEASE SAVEPOINT {name}"), &[]).await?;
        self.savepoints.remove(pos);
        Ok(())
    }

    /// Roll back to a savepoint. The savepoint itself survives; any
    /// savepoints set after it are invalidated.
    pub async fn rollback_to(&mut self, name: &str) -> Result<(), Error> {
        self.require_transaction()?;
        let pos = self.known_savepoint(name)?;
        self.sql(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
            .await?;
        self.savepoints.truncate(pos + 1);
        Ok(())
    }

    /// Close the session gracefully: an open transaction is rolled back,
    /// then the connection returns to its pool (or, for a standalone
    /// session, is shut down).
    pub async fn close(mut self) {
        if self.tx_active {
            if self.rollback().await.is_err() {
                self.poison();
            }
            self.tx_active = false;
        }
        match self.lease.take() {
            Some(Lease::Pooled(guard)) => drop(guard),
            Some(Lease::Direct(mut conn)) => conn.close().await,
            None => {}
        }
    }

    fn require_transaction(&self) -> Result<(), Error> {
        if self.tx_active {
            Ok(())
        } else {
            Err(Error::TransactionState("no transaction is active".into()))
        }
    }

    fn known_savepoint(&self, name: &str) -> Result<usize, Error> {
        self.savepoints
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::TransactionState(format!("unknown savepoint '{name}'")))
    }

    /// Execute one statement shape through the connection's cache.
    ///
    /// First execution of a fingerprint goes out directly; the second
    /// prepares the statement and executes the prepared form; later ones
    /// execute the cached id. A server refusing to prepare (statement count
    /// ceiling) marks the shape unpreparable and it degrades to the direct
    /// path until a deallocation frees capacity.
    pub(crate) async fn execute_shape(
        &mut self,
        fingerprint: Fingerprint,
        text: &str,
        params: Vec<Value>,
    ) -> Result<ExecResult, Error> {
        let conn = self.conn_mut()?;
        let (link, cache) = conn.parts_mut();

        // Deallocate ids evicted from the cache since the last exchange.
        let mut freed = false;
        for id in cache.take_pending_deallocations() {
            match link.deallocate(id).await {
                Ok(()) => freed = true,
                Err(err) => {
                    tracing::debug!(stmt_id = id, error = %err, "statement deallocation failed");
                }
            }
        }
        if freed {
            cache.clear_unpreparable();
        }

        let entry = cache.touch(fingerprint);
        entry.executions += 1;
        entry.last_params = params.clone();

        let result = if let Some(id) = entry.stmt_id {
            link.execute_prepared(id, &params).await
        } else if entry.executions <= 1 || entry.unpreparable {
            link.execute(text, &params).await
        } else {
            match link.prepare(text).await {
                Ok(id) => {
                    entry.stmt_id = Some(id);
                    link.execute_prepared(id, &params).await
                }
                Err(WireError::StatementLimit) => {
                    tracing::debug!(
                        "server prepared-statement ceiling reached, executing directly"
                    );
                    entry.unpreparable = true;
                    link.execute(text, &params).await
                }
                Err(err) => Err(err),
            }
        };
        self.finish(result)
    }

    /// Map a wire outcome into a client outcome, poisoning the lease on
    /// transport failure so the pool discards the physical connection.
    fn finish(&mut self, result: Result<ExecResult, WireError>) -> Result<ExecResult, Error> {
        match result {
            Ok(res) => Ok(res),
            Err(err) => {
                if matches!(err, WireError::Io(_) | WireError::ConnectionClosed) {
                    self.poison();
                }
                Err(err.into())
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Dropped mid-transaction: the connection carries uncommitted state,
        // so it must not be pooled again.
        if self.tx_active {
            self.poison();
            tracing::debug!("session dropped with an open transaction, discarding connection");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("in_transaction", &self.tx_active)
            .field("savepoints", &self.savepoints)
            .finish()
    }
}
