//! Pool error types.

use std::time::Duration;

use thiserror::Error;
use xdev_wire::WireError;

/// Errors raised by pool configuration and connection acquisition.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Invalid pool configuration (zero `maxSize`, malformed JSON document,
    /// non-integer timeout values).
    #[error("pool configuration error: {0}")]
    Config(String),

    /// No connection became available before the queue timeout elapsed.
    /// The caller may retry; the pool does not retry internally.
    #[error("no pooled connection became available within {timeout:?}")]
    Exhausted {
        /// The configured queue timeout.
        timeout: Duration,
    },

    /// The owning client has been closed.
    #[error("client has been closed")]
    Closed,

    /// Connection establishment or transport failure.
    #[error(transparent)]
    Wire(#[from] WireError),
}
