//! Client error types.

use std::time::Duration;

use thiserror::Error;
use xdev_pool::PoolError;
use xdev_wire::WireError;

/// Errors surfaced by the client API.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed connection settings or pooling configuration. Raised
    /// synchronously at construction time, never deferred to connect time.
    #[error("configuration error: {0}")]
    Config(String),

    /// No pooled connection became available before the queue timeout.
    #[error("no pooled connection became available within {timeout:?}")]
    PoolExhausted {
        /// The configured queue timeout.
        timeout: Duration,
    },

    /// The owning client has been closed; the session is unusable.
    #[error("client has been closed")]
    ClientClosed,

    /// The session itself was closed and then used again.
    #[error("session has been closed")]
    SessionClosed,

    /// Invalid transaction or savepoint operation.
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// A statement could not be assembled (unbound placeholder, row arity
    /// mismatch).
    #[error("statement error: {0}")]
    Statement(String),

    /// Transport or server failure, including the composite failover error.
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Config(msg) => Self::Config(msg),
            PoolError::Exhausted { timeout } => Self::PoolExhausted { timeout },
            PoolError::Closed => Self::ClientClosed,
            PoolError::Wire(e) => Self::Wire(e),
        }
    }
}
