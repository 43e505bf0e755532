//! Connection pool implementation.
//!
//! All pool-state mutation (idle set, counts, waiter queue) happens under a
//! single `parking_lot::Mutex` per pool and the lock is never held across an
//! `.await`. Waiters are woken in FIFO order; a releasing connection is
//! handed directly to the head waiter so a release/acquire pair on a
//! `max_size = 1` pool can never deadlock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use xdev_wire::{connect_any, Connector, EndpointList};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::Connection;

/// A bounded pool of physical connections for one client.
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    endpoints: EndpointList,
    connector: Arc<dyn Connector>,
    closed: AtomicBool,
    state: Mutex<PoolState>,
}

struct PoolState {
    /// Idle connections; most recently released at the back (LIFO reuse).
    idle: Vec<Connection>,
    /// Connections currently checked out to sessions.
    checked_out: usize,
    /// Queued acquisitions, FIFO.
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    next_conn_id: u64,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Handoff>,
}

/// What a released slot hands to a queued waiter.
enum Handoff {
    /// A live connection; the checked-out count transfers with it.
    Conn(Claimed),
    /// Capacity freed without a reusable connection; the waiter re-contends.
    Permit,
}

enum Plan {
    Use(Claimed),
    Create(Reservation),
    Wait(u64, oneshot::Receiver<Handoff>),
}

/// A connection counted as checked out but not yet owned by a caller.
///
/// An `acquire()` future can be dropped at any await point (caller-side
/// timeout, task abort), including while a handed-off connection sits
/// unreceived in its oneshot channel. Dropping the claim unconsumed sends
/// the connection back through the release path, so the slot is never lost.
struct Claimed {
    conn: Option<Connection>,
    inner: Arc<PoolInner>,
}

impl Claimed {
    fn new(conn: Connection, inner: Arc<PoolInner>) -> Self {
        Self {
            conn: Some(conn),
            inner,
        }
    }

    fn take(mut self) -> Connection {
        match self.conn.take() {
            Some(conn) => conn,
            // Invariant: present until drop.
            None => unreachable!("connection already taken"),
        }
    }
}

impl Drop for Claimed {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            PoolInner::release(&self.inner, conn, true, false);
        }
    }
}

/// A reserved create slot: `checked_out` was incremented before dialing.
/// Dropping the reservation unconsumed (connect failure, cancelled
/// `acquire()` future) gives the slot back and wakes the next waiter.
struct Reservation {
    inner: Arc<PoolInner>,
    armed: bool,
}

impl Reservation {
    fn new(inner: Arc<PoolInner>) -> Self {
        Self { inner, armed: true }
    }

    /// The dialed connection took ownership of the slot.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            {
                let mut st = self.inner.state.lock();
                st.checked_out -= 1;
            }
            PoolInner::wake_one(&self.inner);
        }
    }
}

impl Pool {
    /// Create a pool. Fails fast on invalid configuration.
    pub fn new(
        config: PoolConfig,
        endpoints: EndpointList,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        tracing::info!(
            max_size = config.max_size,
            enabled = config.enabled,
            endpoints = endpoints.len(),
            "connection pool created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                endpoints,
                connector,
                closed: AtomicBool::new(false),
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    checked_out: 0,
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                    next_conn_id: 0,
                }),
            }),
        })
    }

    /// Acquire a connection.
    ///
    /// Reuses the most recently released idle connection whose TTL has not
    /// elapsed, creates a new one while under `max_size`, and otherwise
    /// queues FIFO until a release or the queue timeout. Timed-out waiters
    /// are removed from the queue atomically with the pool lock, so a ghost
    /// waiter can never steal a later slot.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        if !self.inner.config.enabled {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }
            let conn = self.connect_new().await?;
            return Ok(self.guard(conn, false));
        }

        let deadline = self
            .inner
            .config
            .queue_timeout
            .map(|t| Instant::now() + t);

        loop {
            let (plan, expired) = self.plan_acquisition()?;
            for mut conn in expired {
                tracing::debug!(connection_id = conn.id(), "discarding expired idle connection");
                conn.close().await;
            }

            match plan {
                Plan::Use(claimed) => return Ok(self.guard(claimed.take(), true)),
                Plan::Create(reservation) => match self.connect_new().await {
                    Ok(conn) => {
                        reservation.disarm();
                        return Ok(self.guard(conn, true));
                    }
                    // The reservation gives the slot back on drop and wakes
                    // the next waiter.
                    Err(err) => return Err(err),
                },
                Plan::Wait(waiter_id, rx) => {
                    match self.wait_for_handoff(waiter_id, rx, deadline).await? {
                        Handoff::Conn(claimed) => return Ok(self.guard(claimed.take(), true)),
                        Handoff::Permit => continue,
                    }
                }
            }
        }
    }

    /// Non-blocking variant of [`acquire`](Pool::acquire): returns `None`
    /// instead of queueing when the pool is exhausted.
    pub async fn try_acquire(&self) -> Result<Option<PooledConnection>, PoolError> {
        if !self.inner.config.enabled {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }
            let conn = self.connect_new().await?;
            return Ok(Some(self.guard(conn, false)));
        }

        let (plan, expired) = self.plan_acquisition_nowait()?;
        for mut conn in expired {
            conn.close().await;
        }
        match plan {
            Some(Plan::Use(claimed)) => Ok(Some(self.guard(claimed.take(), true))),
            Some(Plan::Create(reservation)) => match self.connect_new().await {
                Ok(conn) => {
                    reservation.disarm();
                    Ok(Some(self.guard(conn, true)))
                }
                Err(err) => Err(err),
            },
            _ => Ok(None),
        }
    }

    /// Close the pool: every idle connection is shut down, every queued
    /// waiter wakes with [`PoolError::Closed`], and every checked-out
    /// connection is doomed (its session fails on next use and its release
    /// closes the physical link instead of pooling it).
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (idle, waiters) = {
            let mut st = self.inner.state.lock();
            (std::mem::take(&mut st.idle), std::mem::take(&mut st.waiters))
        };
        // Dropping the senders wakes every waiter with a recv error.
        drop(waiters);
        for mut conn in idle {
            conn.close().await;
        }
        tracing::info!("connection pool closed");
    }

    /// Whether [`close`](Pool::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Current pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let st = self.inner.state.lock();
        PoolStatus {
            idle: st.idle.len(),
            in_use: st.checked_out,
            max: self.inner.config.max_size,
        }
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The candidate endpoints this pool connects to.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointList {
        &self.inner.endpoints
    }

    /// Decide how to satisfy one acquisition, discarding expired idle slots
    /// along the way. Runs entirely under the pool lock.
    fn plan_acquisition(&self) -> Result<(Plan, Vec<Connection>), PoolError> {
        let mut st = self.inner.state.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let mut expired = Vec::new();
        let ttl = self.inner.config.max_idle_time;
        let mut reusable = None;
        while let Some(conn) = st.idle.pop() {
            if conn.idle_expired(ttl) {
                expired.push(conn);
            } else {
                reusable = Some(conn);
                break;
            }
        }

        let plan = if let Some(conn) = reusable {
            st.checked_out += 1;
            Plan::Use(Claimed::new(conn, Arc::clone(&self.inner)))
        } else if st.checked_out + st.idle.len() < self.inner.config.max_size {
            st.checked_out += 1;
            Plan::Create(Reservation::new(Arc::clone(&self.inner)))
        } else {
            let (tx, rx) = oneshot::channel();
            let id = st.next_waiter_id;
            st.next_waiter_id += 1;
            st.waiters.push_back(Waiter { id, tx });
            tracing::trace!(waiter_id = id, "pool exhausted, queueing acquisition");
            Plan::Wait(id, rx)
        };
        Ok((plan, expired))
    }

    fn plan_acquisition_nowait(&self) -> Result<(Option<Plan>, Vec<Connection>), PoolError> {
        let (plan, expired) = self.plan_acquisition()?;
        match plan {
            Plan::Wait(id, rx) => {
                drop(rx);
                let mut st = self.inner.state.lock();
                if let Some(pos) = st.waiters.iter().position(|w| w.id == id) {
                    st.waiters.remove(pos);
                }
                Ok((None, expired))
            }
            other => Ok((Some(other), expired)),
        }
    }

    async fn wait_for_handoff(
        &self,
        waiter_id: u64,
        mut rx: oneshot::Receiver<Handoff>,
        deadline: Option<Instant>,
    ) -> Result<Handoff, PoolError> {
        let Some(deadline) = deadline else {
            // No queue timeout configured: wait until a release or close.
            return rx.await.map_err(|_| PoolError::Closed);
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, &mut rx).await {
            Ok(Ok(handoff)) => Ok(handoff),
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_elapsed) => {
                // Removal must be atomic with the timeout: under the lock,
                // either we are still queued (remove ourselves and fail) or
                // a handoff was already sent (recover it from the channel).
                let still_queued = {
                    let mut st = self.inner.state.lock();
                    match st.waiters.iter().position(|w| w.id == waiter_id) {
                        Some(pos) => {
                            st.waiters.remove(pos);
                            true
                        }
                        None => false,
                    }
                };
                if still_queued {
                    return Err(self.exhausted());
                }
                match rx.try_recv() {
                    Ok(handoff) => Ok(handoff),
                    Err(_) => Err(self.exhausted()),
                }
            }
        }
    }

    fn exhausted(&self) -> PoolError {
        PoolError::Exhausted {
            timeout: self.inner.config.queue_timeout.unwrap_or_default(),
        }
    }

    async fn connect_new(&self) -> Result<Connection, PoolError> {
        let link = connect_any(self.inner.connector.as_ref(), &self.inner.endpoints).await?;
        let id = {
            let mut st = self.inner.state.lock();
            st.next_conn_id += 1;
            st.next_conn_id
        };
        tracing::debug!(
            connection_id = id,
            endpoint = %link.endpoint(),
            "opened new pooled connection"
        );
        Ok(Connection::new(id, link))
    }

    fn guard(&self, conn: Connection, pooled: bool) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
            pooled,
            poisoned: false,
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("Pool")
            .field("idle", &status.idle)
            .field("in_use", &status.in_use)
            .field("max", &status.max)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    /// Wake the head waiter with a create-permit after capacity freed
    /// without a reusable connection.
    fn wake_one(inner: &Arc<PoolInner>) {
        let mut st = inner.state.lock();
        while let Some(waiter) = st.waiters.pop_front() {
            if waiter.tx.send(Handoff::Permit).is_ok() {
                break;
            }
        }
    }

    fn release(inner: &Arc<PoolInner>, mut conn: Connection, pooled: bool, poisoned: bool) {
        if !pooled {
            spawn_close(conn);
            return;
        }

        let mut st = inner.state.lock();
        let closed = inner.closed.load(Ordering::Acquire);
        if closed || poisoned {
            st.checked_out -= 1;
            drop(st);
            if !closed {
                Self::wake_one(inner);
            }
            tracing::debug!(
                connection_id = conn.id(),
                poisoned,
                "discarding connection instead of pooling it"
            );
            spawn_close(conn);
            return;
        }

        conn.mark_released();
        loop {
            match st.waiters.pop_front() {
                Some(waiter) => {
                    let claimed = Claimed::new(conn, Arc::clone(inner));
                    match waiter.tx.send(Handoff::Conn(claimed)) {
                        Ok(()) => {
                            tracing::trace!("handed released connection to queued waiter");
                            return;
                        }
                        Err(handoff) => {
                            // The waiter vanished between queueing and now;
                            // try the next one.
                            match handoff {
                                Handoff::Conn(claimed) => conn = claimed.take(),
                                Handoff::Permit => return,
                            }
                        }
                    }
                }
                None => {
                    st.checked_out -= 1;
                    st.idle.push(conn);
                    return;
                }
            }
        }
    }
}

/// Close a connection outside the pool lock. Outside a runtime the link is
/// torn down by dropping the socket.
fn spawn_close(mut conn: Connection) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            conn.close().await;
        });
    }
}

/// Occupancy snapshot of a pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Idle connections available for reuse.
    pub idle: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Configured maximum.
    pub max: usize,
}

/// A checked-out connection.
///
/// Dropping the guard returns the connection to the pool, unless the pool
/// has been closed or the guard was poisoned, in which case the physical
/// link is closed instead.
pub struct PooledConnection {
    conn: Option<Connection>,
    inner: Arc<PoolInner>,
    pooled: bool,
    poisoned: bool,
}

impl PooledConnection {
    /// The connection.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        match self.conn.as_ref() {
            Some(c) => c,
            // Invariant: present until drop.
            None => unreachable!("connection taken before drop"),
        }
    }

    /// Mutable access to the connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        match self.conn.as_mut() {
            Some(c) => c,
            None => unreachable!("connection taken before drop"),
        }
    }

    /// Whether the owning pool has been closed while this connection was
    /// checked out. Doomed connections must not be used.
    #[must_use]
    pub fn is_doomed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Mark the connection as unsafe to reuse; release will close the
    /// physical link instead of pooling it.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            PoolInner::release(&self.inner, conn, self.pooled, self.poisoned);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("pooled", &self.pooled)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
