//! The pooled client.

use std::sync::Arc;

use xdev_pool::{Pool, PoolStatus};
use xdev_wire::{Connector, TcpConnector};

use crate::config::ClientSettings;
use crate::error::Error;
use crate::session::Session;

/// A client managing a bounded pool of connections.
///
/// Cloning is cheap; all clones share the same pool. Sessions obtained from
/// the client return their connection to the pool when closed or dropped.
#[derive(Debug, Clone)]
pub struct Client {
    pool: Arc<Pool>,
}

impl Client {
    /// Create a client connecting over TCP (or a unix socket, when the
    /// settings name one).
    pub fn new(settings: ClientSettings) -> Result<Self, Error> {
        Self::with_connector(settings, Arc::new(TcpConnector::new()))
    }

    /// Create a client over a custom transport.
    pub fn with_connector(
        settings: ClientSettings,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, Error> {
        let (session, pooling) = settings.into_parts();
        let pool = Pool::new(pooling, session.endpoints().clone(), connector)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Acquire a session, waiting for pool capacity if necessary.
    pub async fn get_session(&self) -> Result<Session, Error> {
        let conn = self.pool.acquire().await?;
        Ok(Session::pooled(conn))
    }

    /// Acquire a session without queueing: `Ok(None)` when the pool is
    /// exhausted.
    pub async fn try_get_session(&self) -> Result<Option<Session>, Error> {
        Ok(self.pool.try_acquire().await?.map(Session::pooled))
    }

    /// Close the client: idle connections are shut down, queued acquisitions
    /// fail, and outstanding sessions error on next use.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Whether [`close`](Client::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Current pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }
}
