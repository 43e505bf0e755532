//! # xdev-pool
//!
//! Bounded connection pool for the xdev driver.
//!
//! One [`Pool`] belongs to one client. It owns the idle connections, serves
//! acquire/release under a single pool-wide lock, queues callers FIFO when
//! the pool is at capacity, and lazily evicts idle connections whose TTL has
//! elapsed. New physical connections are established through the host
//! selector's failover loop, so administrator-assigned endpoint priorities
//! apply to every connection the pool creates.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xdev_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new().max_size(10);
//! let pool = Pool::new(config, endpoints, connector)?;
//!
//! let conn = pool.acquire().await?;
//! // Dropped guards return the connection to the pool.
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use lifecycle::Connection;
pub use pool::{Pool, PoolStatus, PooledConnection};
