//! Wire-level error types.

use thiserror::Error;

/// Errors raised by endpoint validation, connection establishment and
/// request/response exchanges on a [`Link`](crate::Link).
#[derive(Debug, Error)]
pub enum WireError {
    /// Malformed endpoint list or connection settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during read/write operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Message encoding/decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A frame exceeded the configured maximum size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Failure to reach one specific endpoint.
    ///
    /// Retried internally against the next endpoint in selection order;
    /// only surfaced as-is when a single endpoint was configured.
    #[error("could not connect to {endpoint}: {reason}")]
    Connect {
        /// The endpoint that was attempted.
        endpoint: String,
        /// Why the attempt failed.
        reason: String,
    },

    /// Every candidate endpoint in a multi-host list was attempted and
    /// failed. The message text is part of the public contract.
    #[error("Could not connect to any of the given data sources: {detail}")]
    AllEndpointsFailed {
        /// Per-endpoint failure summary.
        detail: String,
    },

    /// The server reported an error for a statement.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: u16,
        /// Server error message.
        message: String,
    },

    /// The server refused to prepare another statement because its
    /// prepared-statement ceiling is reached. Callers degrade to direct
    /// execution instead of failing.
    #[error("prepared statement limit reached on the server")]
    StatementLimit,

    /// The peer closed the connection mid-exchange.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server sent a response the client did not expect in context.
    #[error("unexpected server response: {0}")]
    UnexpectedResponse(&'static str),
}
