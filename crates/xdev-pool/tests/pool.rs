//! Pool behavior against the in-process fake backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::{assert_pending, task};

use xdev_pool::{Pool, PoolConfig, PoolError};
use xdev_testing::MockServer;
use xdev_wire::{Connector, Endpoint, EndpointList, Link, WireError};

fn endpoints(hosts: &[&str]) -> EndpointList {
    EndpointList::new(hosts.iter().map(|h| Endpoint::tcp(*h, 33060)).collect()).unwrap()
}

fn pool(server: &MockServer, config: PoolConfig) -> Pool {
    Pool::new(config, endpoints(&["db1"]), Arc::new(server.clone())).unwrap()
}

/// Connector that sleeps before dialing, so a caller-side timeout can
/// cancel an in-flight acquisition.
struct SlowConnector {
    server: MockServer,
    delay: Duration,
}

#[async_trait]
impl Connector for SlowConnector {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, WireError> {
        tokio::time::sleep(self.delay).await;
        self.server.dial(endpoint).await
    }
}

#[tokio::test]
async fn released_connection_is_reused() {
    let server = MockServer::new();
    let pool = pool(&server, PoolConfig::new().max_size(4));

    let first_id = {
        let guard = pool.acquire().await.unwrap();
        guard.conn().server_connection_id()
    };
    let guard = pool.acquire().await.unwrap();
    assert_eq!(guard.conn().server_connection_id(), first_id);
    assert_eq!(server.connections_opened(), 1);
}

#[tokio::test]
async fn reuse_is_lifo() {
    let server = MockServer::new();
    let pool = pool(&server, PoolConfig::new().max_size(3));

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let a_id = a.conn().server_connection_id();
    drop(b);
    drop(a); // released last, so reused first
    let next = pool.acquire().await.unwrap();
    assert_eq!(next.conn().server_connection_id(), a_id);
}

#[tokio::test]
async fn exhausted_pool_times_out() {
    let server = MockServer::new();
    let pool = pool(
        &server,
        PoolConfig::new()
            .max_size(2)
            .queue_timeout(Duration::from_millis(50)),
    );

    let _g1 = pool.acquire().await.unwrap();
    let _g2 = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { .. }));
    assert_eq!(server.connections_opened(), 2);
}

#[tokio::test]
async fn max_size_one_never_deadlocks() {
    let server = MockServer::new();
    let pool = Arc::new(pool(
        &server,
        PoolConfig::new()
            .max_size(1)
            .queue_timeout(Duration::from_secs(2)),
    ));

    let guard = pool.acquire().await.unwrap();
    let id = guard.conn().server_connection_id();

    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);
    });

    let reused = pool.acquire().await.unwrap();
    assert_eq!(reused.conn().server_connection_id(), id);
    assert_eq!(server.connections_opened(), 1);
    holder.await.unwrap();
}

#[tokio::test]
async fn waiters_are_woken_fifo() {
    let server = MockServer::new();
    let pool = Arc::new(pool(
        &server,
        PoolConfig::new()
            .max_size(1)
            .queue_timeout(Duration::from_secs(5)),
    ));
    let order: Arc<Mutex<Vec<u32>>> = Arc::default();

    let guard = pool.acquire().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..3u32 {
        let pool = Arc::clone(&pool);
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let guard = pool.acquire().await.unwrap();
            order.lock().push(i);
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(guard);
        }));
        // Let each waiter register before the next queues up.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    drop(guard);
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert_eq!(server.connections_opened(), 1);
}

#[tokio::test]
async fn idle_ttl_evicts_lazily() {
    let server = MockServer::new();
    let pool = pool(
        &server,
        PoolConfig::new()
            .max_size(2)
            .max_idle_time(Duration::from_millis(40)),
    );

    let first = pool.acquire().await.unwrap();
    let first_id = first.conn().server_connection_id();
    drop(first);

    // Before the TTL elapses the same physical connection is served.
    let again = pool.acquire().await.unwrap();
    assert_eq!(again.conn().server_connection_id(), first_id);
    drop(again);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let fresh = pool.acquire().await.unwrap();
    assert_ne!(fresh.conn().server_connection_id(), first_id);
    assert_eq!(server.connections_opened(), 2);
}

#[tokio::test]
async fn zero_ttl_serves_checked_out_but_expires_idle() {
    let server = MockServer::new();
    let pool = pool(
        &server,
        PoolConfig::new().max_size(2).max_idle_time(Duration::ZERO),
    );

    let mut guard = pool.acquire().await.unwrap();
    // The checked-out connection keeps working regardless of the TTL.
    guard
        .conn_mut()
        .link_mut()
        .execute("SELECT CONNECTION_ID()", &[])
        .await
        .unwrap();
    drop(guard);

    let fresh = pool.acquire().await.unwrap();
    drop(fresh);
    assert_eq!(server.connections_opened(), 2);
}

#[tokio::test]
async fn close_wakes_queued_waiters() {
    let server = MockServer::new();
    let pool = Arc::new(pool(&server, PoolConfig::new().max_size(1)));

    let guard = pool.acquire().await.unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.close().await;
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::Closed)));

    // Acquisitions after close fail, and releasing the doomed connection
    // does not repopulate the pool.
    assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    assert!(guard.is_doomed());
    drop(guard);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn disabled_pooling_opens_fresh_connections() {
    let server = MockServer::new();
    let pool = pool(&server, PoolConfig::new().enabled(false));

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    assert_ne!(
        a.conn().server_connection_id(),
        b.conn().server_connection_id()
    );
    drop(a);
    drop(b);
    let c = pool.acquire().await.unwrap();
    drop(c);
    assert_eq!(server.connections_opened(), 3);
}

#[tokio::test]
async fn connect_failure_surfaces_composite_error() {
    let server = MockServer::new();
    let list = endpoints(&["down1", "down2"]);
    server.set_unreachable(&Endpoint::tcp("down1", 33060));
    server.set_unreachable(&Endpoint::tcp("down2", 33060));

    let pool = Pool::new(PoolConfig::new(), list, Arc::new(server)).unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(
        err.to_string()
            .contains("Could not connect to any of the given data sources"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn concurrent_load_stays_within_max_size() {
    let server = MockServer::new();
    let pool = Arc::new(pool(
        &server,
        PoolConfig::new()
            .max_size(2)
            .queue_timeout(Duration::from_secs(5)),
    ));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                let guard = pool.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
                drop(guard);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert!(server.connections_opened() <= 2);
}

#[tokio::test]
async fn cancelled_acquire_returns_the_reserved_slot() {
    let server = MockServer::new();
    let connector = Arc::new(SlowConnector {
        server: server.clone(),
        delay: Duration::from_millis(200),
    });
    let pool = Pool::new(
        PoolConfig::new()
            .max_size(1)
            .queue_timeout(Duration::from_secs(2)),
        endpoints(&["db1"]),
        connector,
    )
    .unwrap();

    // The caller gives up while the dial is still in flight.
    let cancelled = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
    assert!(cancelled.is_err());
    assert_eq!(pool.status().in_use, 0);

    // The slot is usable again.
    let guard = pool.acquire().await.unwrap();
    drop(guard);
    assert_eq!(server.connections_opened(), 1);
}

#[tokio::test]
async fn handoff_to_a_cancelled_waiter_is_not_lost() {
    let server = MockServer::new();
    let pool = pool(&server, PoolConfig::new().max_size(1));

    let guard = pool.acquire().await.unwrap();

    // Queue a waiter, hand the released connection to it, then drop the
    // waiter without ever receiving the handoff.
    let mut waiting = task::spawn(pool.acquire());
    assert_pending!(waiting.poll());
    drop(guard);
    drop(waiting);

    let status = pool.status();
    assert_eq!((status.idle, status.in_use), (1, 0));

    // The connection itself survived the detour.
    let reused = pool.acquire().await.unwrap();
    assert_eq!(reused.conn().server_connection_id(), 1);
    assert_eq!(server.connections_opened(), 1);
}

#[tokio::test]
async fn try_acquire_never_queues() {
    let server = MockServer::new();
    let pool = pool(&server, PoolConfig::new().max_size(1));

    let guard = pool.try_acquire().await.unwrap().unwrap();
    assert!(pool.try_acquire().await.unwrap().is_none());
    drop(guard);
    assert!(pool.try_acquire().await.unwrap().is_some());
}
