//! Connection lifecycle metadata.

use std::time::{Duration, Instant};

use xdev_wire::{Endpoint, Link, StatementCache};

/// One physical connection plus the pool's bookkeeping for it.
///
/// While idle the pool owns it exclusively; while checked out exactly one
/// session does. The statement cache travels with the connection, so server
/// prepared-statement ids survive across the sessions a pooled connection
/// serves.
pub struct Connection {
    id: u64,
    link: Box<dyn Link>,
    cache: StatementCache,
    created_at: Instant,
    last_released_at: Instant,
}

impl Connection {
    /// Wrap a freshly dialed link.
    #[must_use]
    pub fn new(id: u64, link: Box<dyn Link>) -> Self {
        let now = Instant::now();
        Self {
            id,
            link,
            cache: StatementCache::default(),
            created_at: now,
            last_released_at: now,
        }
    }

    /// Pool-local connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Server-side identity of the underlying link.
    #[must_use]
    pub fn server_connection_id(&self) -> u64 {
        self.link.connection_id()
    }

    /// The endpoint the link is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.link.endpoint()
    }

    /// When this physical connection was established.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Split borrows for statement execution: the wire link and the
    /// statement cache are consulted together.
    pub fn parts_mut(&mut self) -> (&mut dyn Link, &mut StatementCache) {
        (self.link.as_mut(), &mut self.cache)
    }

    /// Mutable access to the wire link.
    pub fn link_mut(&mut self) -> &mut dyn Link {
        self.link.as_mut()
    }

    /// Mutable access to the statement cache.
    pub fn cache_mut(&mut self) -> &mut StatementCache {
        &mut self.cache
    }

    pub(crate) fn mark_released(&mut self) {
        self.last_released_at = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_released_at.elapsed()
    }

    /// Whether the connection has sat idle longer than `ttl`.
    #[must_use]
    pub fn idle_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.idle_for() >= ttl,
            None => false,
        }
    }

    /// Gracefully shut the physical connection down. Server-side prepared
    /// statements die with the connection, so the cache is simply dropped.
    pub async fn close(&mut self) {
        let _ = self.cache.drain_live_ids();
        if let Err(err) = self.link.close().await {
            tracing::debug!(connection_id = self.id, error = %err, "error closing connection");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint())
            .field("cached_statements", &self.cache.len())
            .finish()
    }
}
