//! Wire messages and the scalar value model.

use serde::{Deserialize, Serialize};

/// Server error code for "max_prepared_stmt_count reached".
pub const ERR_MAX_PREPARED_STMT_COUNT: u16 = 1461;

/// A scalar value bound to a statement parameter or returned in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Requests sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Execute a statement directly, without preparing it.
    Execute {
        /// Statement text with `?` placeholders.
        text: String,
        /// Bound parameter values in placeholder order.
        params: Vec<Value>,
    },
    /// Parse and prepare a statement server-side.
    Prepare {
        /// Statement text with `?` placeholders.
        text: String,
    },
    /// Execute a previously prepared statement with fresh bound values.
    ExecutePrepared {
        /// Server-assigned statement id.
        stmt_id: u32,
        /// Bound parameter values in placeholder order.
        params: Vec<Value>,
    },
    /// Release a server-side prepared statement.
    Deallocate {
        /// Server-assigned statement id.
        stmt_id: u32,
    },
    /// Orderly connection shutdown.
    Close,
}

/// Responses sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Greeting after a successful connect.
    Ready {
        /// Server-side identity of this connection.
        connection_id: u64,
    },
    /// Statement completed without a result set.
    Done {
        /// Rows affected by the statement.
        affected_rows: u64,
    },
    /// Statement produced a result set.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row data.
        rows: Vec<Vec<Value>>,
    },
    /// A statement was prepared.
    Prepared {
        /// Server-assigned statement id.
        stmt_id: u32,
    },
    /// The server rejected the request.
    Error {
        /// Server error code.
        code: u16,
        /// Human-readable message.
        message: String,
    },
}
