//! # xdev-client
//!
//! High-level async database client: pooled sessions over prioritized
//! failover endpoints, with transparently cached server-side prepared
//! statements behind copyable CRUD statement handles.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xdev_client::{Client, ClientSettings, Find};
//!
//! let settings = ClientSettings::from_url_and_json(
//!     "mysqlx://user:secret@[(address=primary,priority=100),(address=replica,priority=50)]/app",
//!     r#"{"pooling": {"maxSize": 10, "queueTimeout": 1000}}"#,
//! )?;
//! let client = Client::new(settings)?;
//!
//! let mut session = client.get_session().await?;
//! let stmt = Find::new("app.users")
//!     .criteria("age > :age")
//!     .bind("age", 30);
//! let rows = stmt.execute(&mut session).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod crud;
pub mod error;
pub mod session;

pub use client::Client;
pub use config::{ClientSettings, SessionSettings, SessionSettingsBuilder};
pub use crud::{Find, Insert, LockMode, Modify, Remove, Select, Update};
pub use error::Error;
pub use session::Session;

// The value model and result type are part of the public surface.
pub use xdev_pool::{PoolConfig, PoolStatus};
pub use xdev_wire::{ExecResult, Value};
