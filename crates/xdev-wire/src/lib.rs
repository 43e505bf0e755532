//! # xdev-wire
//!
//! Transport-level building blocks for the xdev driver: candidate endpoint
//! lists with administrator-assigned priorities, the host selection and
//! failover ordering, the `Connector`/`Link` seams the session layer is
//! written against, and the per-connection prepared statement cache.
//!
//! The wire protocol itself is deliberately thin: a length-prefixed JSON
//! message codec over any `AsyncRead + AsyncWrite` transport. Everything the
//! session layer observes about a server goes through the [`Link`] trait, so
//! a different protocol implementation (or an in-process fake for tests) can
//! be swapped in behind [`Connector`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod message;
pub mod selector;
pub mod tcp;

pub use cache::{CacheEntry, Fingerprint, StatementCache};
pub use codec::FrameCodec;
pub use endpoint::{Address, Endpoint, EndpointList, DEFAULT_PORT, MAX_PRIORITY};
pub use error::WireError;
pub use link::{Connector, ExecResult, Link, StatementId};
pub use message::{ClientMessage, ServerMessage, Value, ERR_MAX_PREPARED_STMT_COUNT};
pub use selector::{connect_any, selection_order, NO_SOURCES_MSG};
pub use tcp::TcpConnector;
