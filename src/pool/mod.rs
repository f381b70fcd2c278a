//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! Request with mapper candidates
//!     → track(): request enters the pending table unbound (pending.rs)
//!     → ConnectionPool::acquire(EndpointKey)
//!         → EndpointPool for the key (endpoint.rs)
//!             - idle connection validated on borrow, or
//!             - new slot reserved → TCP connect + HTTP/1 handshake (connection.rs)
//!             - at capacity → wait up to borrow_timeout
//!     → BorrowedConnection (RAII)
//!         → PendingGuard::bind(): entry bound to the endpoint and connection
//!         → send(): request forwarded over the connection
//!         → release(): validated on return → idle or destroyed
//!
//! Reaper (reaper.rs), every idle_timeout / 4:
//!     → pending entries older than stuck_request_timeout
//!         → health report (bound entries only) + counter + forced failure
//!     → idle connections past idle_timeout evicted
//!     → retired endpoints without connections dropped
//! ```
//!
//! # Design Decisions
//! - One sub-pool per EndpointKey; no pool-wide ceiling
//! - Settings live in an ArcSwap and are read per acquisition, so changes
//!   apply to subsequent borrows without restarting in-flight work
//! - Only an idle_timeout change reschedules the reaper
//! - Shutdown is synchronous and idempotent; it never waits on borrowers

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod key;
pub mod pending;
mod reaper;

pub use connection::{ConnectionId, ConnectionState};
pub use endpoint::EndpointStats;
pub use error::{EndpointUnavailable, StuckRequestDetected, UpstreamError};
pub use key::EndpointKey;
pub use pending::{PendingGuard, StuckSignal};
pub use reaper::MIN_REAPER_PERIOD;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;
use axum::body::Body;
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConnectionsConfig;
use crate::health::HealthRegistry;
use connection::PooledConnection;
use endpoint::EndpointPool;
use pending::PendingRequests;

/// Tuning parameters of the pool. All of them are reloadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub idle_timeout: Duration,
    pub stuck_request_timeout: Duration,
    pub connect_timeout: Duration,
    pub borrow_timeout: Duration,
    pub max_connections_per_endpoint: usize,
}

impl PoolSettings {
    /// Interval between two reaper sweeps.
    pub fn reaper_period(&self) -> Duration {
        (self.idle_timeout / 4).max(MIN_REAPER_PERIOD)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&ConnectionsConfig::default())
    }
}

impl From<&ConnectionsConfig> for PoolSettings {
    fn from(config: &ConnectionsConfig) -> Self {
        Self {
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            stuck_request_timeout: Duration::from_millis(config.stuck_request_timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            borrow_timeout: Duration::from_millis(config.borrow_timeout_ms),
            max_connections_per_endpoint: config.max_connections_per_endpoint,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PoolInner {
    endpoints: DashMap<EndpointKey, Arc<EndpointPool>>,
    settings: ArcSwap<PoolSettings>,
    pending: Arc<PendingRequests>,
    health: Arc<dyn HealthRegistry>,
    closed: AtomicBool,
    reaper_period: watch::Sender<Duration>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl PoolInner {
    fn reap(&self, now: Instant) -> Vec<StuckRequestDetected> {
        let settings = self.settings.load();
        let stuck = self
            .pending
            .reap(now, settings.stuck_request_timeout, self.health.as_ref());

        for entry in self.endpoints.iter() {
            let evicted = entry.value().evict_idle(now, settings.idle_timeout);
            if evicted > 0 {
                tracing::debug!(endpoint = %entry.key(), evicted, "Evicted idle connections");
            }
            entry.value().publish_metrics();
        }
        self.prune_retired();
        stuck
    }

    /// Drop retired endpoints that no longer hold any connection.
    fn prune_retired(&self) -> usize {
        let retired: Vec<EndpointKey> = self
            .endpoints
            .iter()
            .filter(|e| e.value().is_retired())
            .map(|e| e.key().clone())
            .collect();

        let mut pruned = 0;
        for key in retired {
            if let Some((key, endpoint)) = self
                .endpoints
                .remove_if(&key, |_, e| e.is_retired() && e.is_empty())
            {
                endpoint.close();
                endpoint.publish_metrics();
                tracing::debug!(endpoint = %key, "Dropped unused endpoint pool");
                pruned += 1;
            }
        }
        pruned
    }
}

/// Keyed pool of outbound HTTP/1 connections. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create the pool and start its reaper. Must run inside a tokio runtime.
    pub fn new(settings: PoolSettings, health: Arc<dyn HealthRegistry>) -> Self {
        let (period_tx, period_rx) = watch::channel(settings.reaper_period());
        let inner = Arc::new(PoolInner {
            endpoints: DashMap::new(),
            settings: ArcSwap::from_pointee(settings),
            pending: Arc::new(PendingRequests::default()),
            health,
            closed: AtomicBool::new(false),
            reaper_period: period_tx,
            reaper: Mutex::new(None),
        });

        let handle = reaper::spawn(Arc::downgrade(&inner), period_rx);
        *inner.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Self { inner }
    }

    pub fn settings(&self) -> Arc<PoolSettings> {
        self.inner.settings.load_full()
    }

    /// Swap in new tuning. Reschedules the reaper only if `idle_timeout` changed.
    pub fn apply_settings(&self, settings: PoolSettings) {
        let period = settings.reaper_period();
        let max = settings.max_connections_per_endpoint;
        let previous = self.inner.settings.swap(Arc::new(settings));

        if previous.reaper_period() != period {
            tracing::info!(period = ?period, "Idle timeout changed, rescheduling reaper");
            let _ = self.inner.reaper_period.send(period);
        }
        for entry in self.inner.endpoints.iter() {
            let shrunk = entry.value().shrink_idle(max);
            if shrunk > 0 {
                tracing::debug!(endpoint = %entry.key(), shrunk, "Closed idle connections over the new capacity");
            }
            // capacity may have grown
            entry.value().available().notify_waiters();
        }
    }

    /// Keep sub-pools only for the endpoints in `keep`.
    ///
    /// Others are dropped once their last connection is gone, right away if
    /// they only hold idle ones. An endpoint named again is kept.
    pub fn retain_endpoints(&self, keep: impl IntoIterator<Item = EndpointKey>) {
        if self.is_closed() {
            return;
        }
        let keep: HashSet<EndpointKey> = keep.into_iter().collect();
        for entry in self.inner.endpoints.iter() {
            if keep.contains(entry.key()) {
                entry.value().reinstate();
            } else if !entry.value().is_retired() {
                let closed = entry.value().retire();
                tracing::info!(endpoint = %entry.key(), closed, "Endpoint no longer configured, retiring its pool");
            }
        }
        self.inner.prune_retired();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn endpoint(&self, key: &EndpointKey) -> Arc<EndpointPool> {
        if let Some(existing) = self.inner.endpoints.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.inner
                .endpoints
                .entry(key.clone())
                .or_insert_with(|| Arc::new(EndpointPool::new(key.clone())))
                .value(),
        )
    }

    /// Borrow a connection to `key`, creating one if the endpoint is under
    /// capacity and waiting at most `borrow_timeout` otherwise.
    ///
    /// Dropping the returned future releases any slot it had claimed.
    pub async fn acquire(&self, key: &EndpointKey) -> Result<BorrowedConnection, EndpointUnavailable> {
        let settings = self.settings();
        let mut endpoint = self.endpoint(key);
        let deadline = tokio::time::Instant::now() + settings.borrow_timeout;

        loop {
            if self.is_closed() {
                return Err(EndpointUnavailable::Interrupted { key: key.clone() });
            }
            if endpoint.is_closed() {
                // dropped as unused while we held it
                endpoint = self.endpoint(key);
                continue;
            }

            let notified = endpoint.available().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(conn) = endpoint.take_idle(
                Instant::now(),
                settings.idle_timeout,
                settings.max_connections_per_endpoint,
            ) {
                return Ok(self.lend(Arc::clone(&endpoint), conn));
            }

            if let Some(reservation) = endpoint.try_reserve(settings.max_connections_per_endpoint) {
                return match PooledConnection::connect(key, settings.connect_timeout).await {
                    Ok(mut conn) => {
                        reservation.fulfil(&mut conn);
                        self.inner.health.report_backend_reachable(key, SystemTime::now());
                        Ok(self.lend(Arc::clone(&endpoint), conn))
                    }
                    Err(source) => {
                        drop(reservation);
                        self.inner.health.report_backend_unreachable(
                            key,
                            SystemTime::now(),
                            &format!("connect failed: {}", source),
                        );
                        Err(EndpointUnavailable::ConnectFailed {
                            key: key.clone(),
                            source,
                        })
                    }
                };
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::debug!(endpoint = %key, waited = ?settings.borrow_timeout, "Pool exhausted");
                return Err(EndpointUnavailable::Exhausted {
                    key: key.clone(),
                    waited: settings.borrow_timeout,
                });
            }
        }
    }

    fn lend(&self, endpoint: Arc<EndpointPool>, conn: PooledConnection) -> BorrowedConnection {
        BorrowedConnection {
            conn: Some(conn),
            endpoint,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Register a request that is about to wait for a backend connection.
    ///
    /// Bind it with [`PendingGuard::bind`] once a connection is acquired. The
    /// returned signal fires if the reaper declares the request stuck;
    /// dropping the guard unregisters it.
    pub fn track(
        &self,
        uri: impl Into<String>,
        principal: impl Into<String>,
    ) -> (PendingGuard, StuckSignal) {
        self.inner.pending.register(uri.into(), principal.into())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Run one reaper sweep as of `now`. Returns the requests declared stuck.
    pub fn reap_at(&self, now: Instant) -> Vec<StuckRequestDetected> {
        self.inner.reap(now)
    }

    pub fn stats(&self) -> HashMap<EndpointKey, EndpointStats> {
        self.inner
            .endpoints
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect()
    }

    /// Stop the reaper, refuse new borrows, wake waiters with `Interrupted`,
    /// close every connection and abort pending requests. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Connection pool shutting down");

        if let Some(reaper) = self
            .inner
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reaper.abort();
        }

        let endpoints: Vec<Arc<EndpointPool>> = self
            .inner
            .endpoints
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for endpoint in endpoints {
            endpoint.close();
        }
        self.inner.pending.abort_all();
        self.inner.endpoints.clear();
    }
}

/// A connection lent out by the pool.
///
/// Call [`release`](Self::release) when the exchange completed cleanly or
/// [`discard`](Self::discard) when it did not. Dropping it without either
/// marks the connection abandoned and destroys it.
#[derive(Debug)]
pub struct BorrowedConnection {
    conn: Option<PooledConnection>,
    endpoint: Arc<EndpointPool>,
    pool: Arc<PoolInner>,
}

impl BorrowedConnection {
    pub fn key(&self) -> &EndpointKey {
        self.endpoint.key()
    }

    pub fn id(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(|c| c.id())
    }

    fn abort_handle(&self) -> Option<tokio::task::AbortHandle> {
        self.conn.as_ref().map(|c| c.driver.abort_handle())
    }

    /// Wait until the connection can take a request.
    ///
    /// Fails with [`UpstreamError::Closed`] if the peer closed it while it
    /// sat idle; nothing has been sent at that point.
    pub async fn ready(&mut self) -> Result<(), UpstreamError> {
        let conn = self.conn.as_mut().ok_or(UpstreamError::Released)?;
        conn.sender.ready().await.map_err(UpstreamError::Closed)
    }

    /// Forward `request` and wait for the response head.
    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, UpstreamError> {
        self.ready().await?;
        let conn = self.conn.as_mut().ok_or(UpstreamError::Released)?;
        let response = conn.sender.send_request(request).await?;
        Ok(response)
    }

    /// Hand the connection back; it is validated before rejoining the idle set.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            let settings = self.pool.settings.load();
            self.endpoint.give_back(
                conn,
                settings.idle_timeout,
                settings.max_connections_per_endpoint,
            );
        }
    }

    /// Destroy the connection instead of returning it.
    pub fn discard(mut self, reason: &str) {
        if let Some(conn) = self.conn.take() {
            self.endpoint.discard(conn, ConnectionState::Destroyed, reason);
        }
    }
}

impl Drop for BorrowedConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(connection = %conn.id(), endpoint = %self.endpoint.key(), "Connection abandoned by borrower");
            self.endpoint
                .discard(conn, ConnectionState::Abandoned, "abandoned by borrower");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::BackendHealthManager;
    use tokio::net::TcpListener;

    fn settings(max: usize) -> PoolSettings {
        PoolSettings {
            idle_timeout: Duration::from_secs(60),
            stuck_request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(1),
            borrow_timeout: Duration::from_millis(200),
            max_connections_per_endpoint: max,
        }
    }

    /// Accepts connections and holds them open without answering.
    async fn silent_backend() -> EndpointKey {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        EndpointKey::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_release_reuses_connection() {
        let key = silent_backend().await;
        let pool = ConnectionPool::new(settings(2), Arc::new(BackendHealthManager::default()));

        let first = pool.acquire(&key).await.unwrap();
        let id = first.id();
        first.release();

        let again = pool.acquire(&key).await.unwrap();
        assert_eq!(again.id(), id);
        let stats = pool.stats()[&key];
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.borrowed, 1);
        again.release();
    }

    #[tokio::test]
    async fn test_discard_and_abandon_destroy() {
        let key = silent_backend().await;
        let pool = ConnectionPool::new(settings(2), Arc::new(BackendHealthManager::default()));

        pool.acquire(&key).await.unwrap().discard("broken exchange");
        drop(pool.acquire(&key).await.unwrap());

        let stats = pool.stats()[&key];
        assert_eq!(stats.total_created, 2);
        assert_eq!(stats.total_destroyed, 2);
        assert_eq!(stats.open, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let key = EndpointKey::new("127.0.0.1", listener.local_addr().unwrap().port());
        drop(listener);

        let health = Arc::new(BackendHealthManager::default());
        let pool = ConnectionPool::new(settings(2), health.clone());

        let err = pool.acquire(&key).await.unwrap_err();
        assert!(matches!(err, EndpointUnavailable::ConnectFailed { .. }));
        assert_eq!(err.key(), &key);
        assert!(!health.is_available(&key));
        // the failed connect gave its slot back
        assert_eq!(pool.stats()[&key].open, 0);
    }

    #[tokio::test]
    async fn test_capacity_change_applies_to_next_borrow() {
        let key = silent_backend().await;
        let pool = ConnectionPool::new(settings(1), Arc::new(BackendHealthManager::default()));

        let held = pool.acquire(&key).await.unwrap();
        assert!(matches!(
            pool.acquire(&key).await,
            Err(EndpointUnavailable::Exhausted { .. })
        ));

        pool.apply_settings(settings(2));
        let second = pool.acquire(&key).await.unwrap();
        assert_eq!(pool.stats()[&key].open, 2);

        // shrinking back destroys the surplus on return
        pool.apply_settings(settings(1));
        second.release();
        held.release();
        assert_eq!(pool.stats()[&key].open, 1);
    }

    #[tokio::test]
    async fn test_lowered_capacity_bounds_idle_borrows() {
        let key = silent_backend().await;
        let pool = ConnectionPool::new(settings(2), Arc::new(BackendHealthManager::default()));

        let a = pool.acquire(&key).await.unwrap();
        let b = pool.acquire(&key).await.unwrap();
        a.release();
        b.release();
        assert_eq!(pool.stats()[&key].idle, 2);

        pool.apply_settings(settings(1));
        assert_eq!(pool.stats()[&key].open, 1);

        let first = pool.acquire(&key).await.unwrap();
        assert!(matches!(
            pool.acquire(&key).await,
            Err(EndpointUnavailable::Exhausted { .. })
        ));
        let stats = pool.stats()[&key];
        assert_eq!((stats.borrowed, stats.open), (1, 1));
        first.release();
    }

    #[tokio::test]
    async fn test_idle_over_capacity_is_not_lent() {
        let key = silent_backend().await;
        let pool = ConnectionPool::new(settings(2), Arc::new(BackendHealthManager::default()));

        let a = pool.acquire(&key).await.unwrap();
        let b = pool.acquire(&key).await.unwrap();
        a.release();
        b.release();

        // bypass the eager shrink in apply_settings
        let endpoint = pool.endpoint(&key);
        let conn = endpoint.take_idle(Instant::now(), Duration::from_secs(60), 1);
        assert!(conn.is_some());
        assert_eq!(endpoint.stats().open, 1);
        assert!(endpoint
            .take_idle(Instant::now(), Duration::from_secs(60), 1)
            .is_none());
        if let Some(conn) = conn {
            endpoint.give_back(conn, Duration::from_secs(60), 1);
        }
    }

    #[tokio::test]
    async fn test_idle_timeout_change_reschedules_running_reaper() {
        let pool = ConnectionPool::new(settings(1), Arc::new(BackendHealthManager::default()));
        let (_guard, signal) = pool.track("/reports", "alice");

        let mut faster = settings(1);
        faster.idle_timeout = Duration::from_millis(40);
        faster.stuck_request_timeout = Duration::from_millis(20);
        pool.apply_settings(faster);

        // the old schedule would first sweep after 15s
        let detected = tokio::time::timeout(Duration::from_secs(2), signal)
            .await
            .expect("reaper should run on the new period")
            .expect("request should be reported stuck");
        assert_eq!(detected.uri, "/reports");
        assert_eq!(detected.endpoint, None);
        assert_eq!(pool.pending_count(), 0);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_unconfigured_idle_endpoint_dropped() {
        let kept = silent_backend().await;
        let gone = silent_backend().await;
        let pool = ConnectionPool::new(settings(2), Arc::new(BackendHealthManager::default()));

        pool.acquire(&kept).await.unwrap().release();
        pool.acquire(&gone).await.unwrap().release();
        assert_eq!(pool.stats().len(), 2);

        pool.retain_endpoints([kept.clone()]);
        let stats = pool.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[&kept].idle, 1);

        // coming back creates a fresh sub-pool
        pool.acquire(&gone).await.unwrap().release();
        assert_eq!(pool.stats()[&gone].total_created, 1);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_unconfigured_busy_endpoint_dropped_after_release() {
        let key = silent_backend().await;
        let pool = ConnectionPool::new(settings(2), Arc::new(BackendHealthManager::default()));

        let held = pool.acquire(&key).await.unwrap();
        pool.retain_endpoints(Vec::new());
        assert!(pool.stats().contains_key(&key), "still borrowed");

        held.release();
        assert_eq!(pool.stats()[&key].open, 0);
        assert!(pool.reap_at(Instant::now()).is_empty());
        assert!(pool.stats().is_empty());
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_reconfigured_endpoint_is_kept() {
        let key = silent_backend().await;
        let pool = ConnectionPool::new(settings(2), Arc::new(BackendHealthManager::default()));

        let held = pool.acquire(&key).await.unwrap();
        pool.retain_endpoints(Vec::new());
        pool.retain_endpoints([key.clone()]);
        held.release();

        pool.reap_at(Instant::now());
        assert_eq!(pool.stats()[&key].idle, 1);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_waiters() {
        let key = silent_backend().await;
        let mut slow = settings(1);
        slow.borrow_timeout = Duration::from_secs(10);
        let pool = ConnectionPool::new(slow, Arc::new(BackendHealthManager::default()));

        let held = pool.acquire(&key).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            let key = key.clone();
            tokio::spawn(async move { pool.acquire(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.shutdown();
        pool.shutdown();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(EndpointUnavailable::Interrupted { .. })));
        assert!(pool.stats().is_empty());
        held.release();
        assert!(matches!(
            pool.acquire(&key).await,
            Err(EndpointUnavailable::Interrupted { .. })
        ));
    }

    #[test]
    fn test_reaper_period() {
        let mut s = settings(1);
        assert_eq!(s.reaper_period(), Duration::from_secs(15));
        s.idle_timeout = Duration::ZERO;
        assert_eq!(s.reaper_period(), MIN_REAPER_PERIOD);
    }
}
