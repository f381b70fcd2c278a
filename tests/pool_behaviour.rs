//! Connection pool limits and stuck-request handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use routing_proxy::health::{BackendHealthManager, HealthStatus};
use routing_proxy::pool::PoolSettings;
use routing_proxy::{ConnectionPool, EndpointKey, EndpointUnavailable};

mod common;

fn pool_with(settings: PoolSettings) -> (ConnectionPool, Arc<BackendHealthManager>) {
    let health = Arc::new(BackendHealthManager::new(Duration::ZERO));
    let pool = ConnectionPool::new(settings, health.clone());
    (pool, health)
}

#[tokio::test]
async fn test_capacity_limit_exhausts_after_borrow_timeout() {
    let addr = common::start_backend("alpha").await;
    let key = EndpointKey::new("127.0.0.1", addr.port());
    let (pool, _) = pool_with(PoolSettings {
        max_connections_per_endpoint: 2,
        borrow_timeout: Duration::from_millis(200),
        ..PoolSettings::default()
    });

    let first = pool.acquire(&key).await.unwrap();
    let _second = pool.acquire(&key).await.unwrap();

    let started = Instant::now();
    match pool.acquire(&key).await {
        Err(EndpointUnavailable::Exhausted { key: k, .. }) => assert_eq!(k, key),
        other => panic!("expected exhausted, got {:?}", other.map(|c| c.id())),
    }
    assert!(started.elapsed() >= Duration::from_millis(200));

    // a release while waiting hands the connection over
    let waiter = {
        let pool = pool.clone();
        let key = key.clone();
        tokio::spawn(async move { pool.acquire(&key).await.map(|c| c.id()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let released = first.id();
    first.release();

    let handed_over = waiter.await.unwrap().unwrap();
    assert_eq!(handed_over, released);
    assert_eq!(pool.stats()[&key].total_created, 2);

    pool.shutdown();
}

#[tokio::test]
async fn test_stuck_request_reported_once() {
    let addr = common::start_backend("alpha").await;
    let key = EndpointKey::new("127.0.0.1", addr.port());
    let (pool, health) = pool_with(PoolSettings {
        stuck_request_timeout: Duration::from_secs(1),
        ..PoolSettings::default()
    });

    let (guard, signal) = pool.track("/reports/yearly", "alice");
    assert_eq!(pool.pending_count(), 1, "waiting requests are pending too");
    let connection = pool.acquire(&key).await.unwrap();
    assert!(guard.bind(&connection));

    assert!(pool.reap_at(Instant::now()).is_empty(), "not yet stuck");

    let stuck = pool.reap_at(Instant::now() + Duration::from_secs(2));
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].uri, "/reports/yearly");
    assert_eq!(stuck[0].principal, "alice");
    assert_eq!(stuck[0].endpoint, Some(key.clone()));
    assert_eq!(pool.pending_count(), 0);

    let detected = signal.await.expect("borrower should be told");
    assert_eq!(detected.request_id, stuck[0].request_id);

    let record = health.get(&key).unwrap();
    assert_eq!(record.status, HealthStatus::Unreachable);
    assert!(record
        .last_unreachable_reason
        .unwrap()
        .contains("appears stuck"));

    assert!(pool
        .reap_at(Instant::now() + Duration::from_secs(4))
        .is_empty());

    drop(connection);
    assert_eq!(pool.stats()[&key].open, 0);
    pool.shutdown();
}

#[tokio::test]
async fn test_stuck_request_answers_gateway_timeout() {
    let a = common::start_backend("alpha").await;
    let mut config = common::config_for(&[("a", a)]);
    config.connections.stuck_request_timeout_ms = 300;
    config.connections.idle_timeout_ms = 400;
    let proxy = common::start_proxy(config).await;

    let started = Instant::now();
    let res = common::client()
        .get(proxy.url("/a/slow"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(1));

    let key = EndpointKey::new("127.0.0.1", a.port());
    assert_eq!(
        proxy.core.health.get(&key).unwrap().status,
        HealthStatus::Unreachable
    );
    assert_eq!(proxy.core.pool.pending_count(), 0);
}

#[tokio::test]
async fn test_request_waiting_for_connection_is_pending() {
    let a = common::start_backend("alpha").await;
    let mut config = common::config_for(&[("a", a)]);
    config.connections.max_connections_per_endpoint = 1;
    config.connections.borrow_timeout_ms = 5_000;
    config.connections.stuck_request_timeout_ms = 300;
    config.connections.idle_timeout_ms = 400;
    let proxy = common::start_proxy(config).await;

    let send = |path: &'static str| {
        let url = proxy.url(path);
        tokio::spawn(async move { common::client().get(url).send().await.map(|r| r.status()) })
    };
    let holder = send("/a/slow");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let waiter = send("/a/slow-too");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // one bound to the only connection, one queued behind it
    assert_eq!(proxy.core.pool.pending_count(), 2);

    assert_eq!(holder.await.unwrap().unwrap(), 504);
    assert_eq!(waiter.await.unwrap().unwrap(), 504);
    assert_eq!(proxy.core.pool.pending_count(), 0);
}

#[tokio::test]
async fn test_shutdown_interrupts_waiter() {
    let addr = common::start_backend("alpha").await;
    let key = EndpointKey::new("127.0.0.1", addr.port());
    let (pool, _) = pool_with(PoolSettings {
        max_connections_per_endpoint: 1,
        ..PoolSettings::default()
    });

    let _held = pool.acquire(&key).await.unwrap();
    let waiter = {
        let pool = pool.clone();
        let key = key.clone();
        tokio::spawn(async move { pool.acquire(&key).await.map(|c| c.id()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.shutdown();
    assert!(matches!(
        waiter.await.unwrap(),
        Err(EndpointUnavailable::Interrupted { .. })
    ));
    assert!(matches!(
        pool.acquire(&key).await,
        Err(EndpointUnavailable::Interrupted { .. })
    ));
}
