//! Per-endpoint sub-pool.
//!
//! Every EndpointKey owns one `EndpointPool` with its own lock, slot counter
//! and wake-up channel, so traffic on one backend never contends with
//! another. `open` counts every connection that exists or is being created
//! and never exceeds the configured per-endpoint maximum at reservation time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::observability::metrics;
use crate::pool::connection::{ConnectionId, ConnectionState, PooledConnection};
use crate::pool::EndpointKey;

/// Point-in-time counters of one sub-pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub open: usize,
    pub idle: usize,
    pub borrowed: usize,
    pub total_created: u64,
    pub total_destroyed: u64,
}

#[derive(Debug)]
pub(crate) struct EndpointPool {
    key: EndpointKey,
    idle: Mutex<VecDeque<PooledConnection>>,
    /// Driver tasks of every connection this sub-pool owns, idle or borrowed.
    live: DashMap<ConnectionId, AbortHandle>,
    available: Notify,
    closed: AtomicBool,
    /// Set while no configured backend points here anymore.
    retired: AtomicBool,
    open: AtomicUsize,
    borrowed: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl EndpointPool {
    pub(crate) fn new(key: EndpointKey) -> Self {
        Self {
            key,
            idle: Mutex::new(VecDeque::new()),
            live: DashMap::new(),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            open: AtomicUsize::new(0),
            borrowed: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    pub(crate) fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub(crate) fn available(&self) -> &Notify {
        &self.available
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Mark the endpoint unused and close its idle connections. Borrowed ones
    /// are destroyed on return.
    pub(crate) fn retire(&self) -> usize {
        self.retired.store(true, Ordering::Release);
        self.shrink_idle(0)
    }

    pub(crate) fn reinstate(&self) {
        self.retired.store(false, Ordering::Release);
    }

    /// No connection exists or is being created.
    pub(crate) fn is_empty(&self) -> bool {
        self.open.load(Ordering::Acquire) == 0
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<PooledConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a slot for a new connection if the endpoint is under `max`.
    pub(crate) fn try_reserve(self: &Arc<Self>, max: usize) -> Option<Reservation> {
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            })
            .ok()
            .map(|_| Reservation {
                endpoint: Arc::clone(self),
                armed: true,
            })
    }

    fn release_slot(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.available.notify_waiters();
    }

    /// Take the most recently used idle connection that passes validation.
    ///
    /// While more than `max` connections are open, idle ones are destroyed
    /// instead of lent.
    pub(crate) fn take_idle(
        &self,
        now: Instant,
        idle_timeout: Duration,
        max: usize,
    ) -> Option<PooledConnection> {
        loop {
            let mut conn = self.lock_idle().pop_back()?;
            if self.open.load(Ordering::Acquire) > max {
                self.destroy(conn, ConnectionState::Destroyed, "over capacity");
                continue;
            }
            match conn.validate(now, idle_timeout) {
                Ok(()) => {
                    conn.state = ConnectionState::Borrowed;
                    self.borrowed.fetch_add(1, Ordering::AcqRel);
                    return Some(conn);
                }
                Err(reason) => {
                    tracing::warn!(connection = %conn.id, endpoint = %self.key, reason, "Idle connection failed validation on borrow");
                    self.destroy(conn, ConnectionState::Destroyed, reason);
                }
            }
        }
    }

    /// Return a borrowed connection, keeping it only if it still validates
    /// and the endpoint is within `max`.
    pub(crate) fn give_back(&self, mut conn: PooledConnection, idle_timeout: Duration, max: usize) {
        self.borrowed.fetch_sub(1, Ordering::AcqRel);
        conn.last_used = Instant::now();

        if self.is_closed() {
            self.destroy(conn, ConnectionState::Destroyed, "pool closed");
            return;
        }
        if let Err(reason) = conn.validate(Instant::now(), idle_timeout) {
            tracing::warn!(connection = %conn.id, endpoint = %self.key, reason, "Connection failed validation on return");
            self.destroy(conn, ConnectionState::Destroyed, reason);
            return;
        }
        if self.open.load(Ordering::Acquire) > max {
            self.destroy(conn, ConnectionState::Destroyed, "over capacity");
            return;
        }
        if self.is_retired() {
            self.destroy(conn, ConnectionState::Destroyed, "endpoint retired");
            return;
        }

        conn.state = ConnectionState::Idle;
        self.lock_idle().push_back(conn);
        self.available.notify_waiters();
    }

    /// Drop a borrowed connection without returning it to the idle set.
    pub(crate) fn discard(&self, conn: PooledConnection, state: ConnectionState, reason: &str) {
        self.borrowed.fetch_sub(1, Ordering::AcqRel);
        self.destroy(conn, state, reason);
    }

    fn destroy(&self, mut conn: PooledConnection, state: ConnectionState, reason: &str) {
        conn.close(state);
        self.live.remove(&conn.id);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            connection = %conn.id,
            endpoint = %self.key,
            state = ?state,
            reason,
            "Destroyed upstream connection"
        );
        self.release_slot();
    }

    /// Destroy idle connections that no longer validate. Returns how many went.
    pub(crate) fn evict_idle(&self, now: Instant, idle_timeout: Duration) -> usize {
        let expired: Vec<PooledConnection> = {
            let mut idle = self.lock_idle();
            let mut keep = VecDeque::with_capacity(idle.len());
            let mut expired = Vec::new();
            while let Some(mut conn) = idle.pop_front() {
                match conn.validate(now, idle_timeout) {
                    Ok(()) => {
                        conn.state = ConnectionState::Idle;
                        keep.push_back(conn);
                    }
                    Err(_) => expired.push(conn),
                }
            }
            *idle = keep;
            expired
        };

        let evicted = expired.len();
        for conn in expired {
            self.destroy(conn, ConnectionState::Destroyed, "evicted while idle");
        }
        evicted
    }

    /// Destroy idle connections, oldest first, until at most `max` are open.
    pub(crate) fn shrink_idle(&self, max: usize) -> usize {
        let surplus: Vec<PooledConnection> = {
            let mut idle = self.lock_idle();
            let excess = self.open.load(Ordering::Acquire).saturating_sub(max);
            let n = excess.min(idle.len());
            idle.drain(..n).collect()
        };

        let shrunk = surplus.len();
        for conn in surplus {
            self.destroy(conn, ConnectionState::Destroyed, "over capacity");
        }
        shrunk
    }

    /// Refuse further borrows, close idle connections, abort borrowed ones
    /// and wake every waiter.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<PooledConnection> = self.lock_idle().drain(..).collect();
        for conn in drained {
            self.destroy(conn, ConnectionState::Destroyed, "pool closed");
        }
        for entry in self.live.iter() {
            entry.value().abort();
        }
        self.available.notify_waiters();
    }

    fn mark_created(&self, id: ConnectionId, driver: AbortHandle) {
        self.live.insert(id, driver);
        self.created.fetch_add(1, Ordering::Relaxed);
        self.borrowed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn stats(&self) -> EndpointStats {
        EndpointStats {
            open: self.open.load(Ordering::Acquire),
            idle: self.lock_idle().len(),
            borrowed: self.borrowed.load(Ordering::Acquire),
            total_created: self.created.load(Ordering::Relaxed),
            total_destroyed: self.destroyed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn publish_metrics(&self) {
        let stats = self.stats();
        metrics::record_endpoint_connections(&self.key, stats.idle, stats.borrowed);
    }
}

/// A claimed connection slot. Dropping it unclaimed gives the slot back,
/// so a cancelled or failed connect never leaks capacity.
#[derive(Debug)]
pub(crate) struct Reservation {
    endpoint: Arc<EndpointPool>,
    armed: bool,
}

impl Reservation {
    /// The slot now belongs to `conn`, which starts out borrowed.
    pub(crate) fn fulfil(mut self, conn: &mut PooledConnection) {
        self.armed = false;
        conn.state = ConnectionState::Borrowed;
        self.endpoint.mark_created(conn.id, conn.driver.abort_handle());
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.endpoint.release_slot();
        }
    }
}
