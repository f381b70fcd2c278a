//! Pending-request table.
//!
//! A request is registered here, keyed by a process-unique id, from the
//! moment it starts waiting for a backend connection until it completes.
//! The endpoint and connection are attached once one is bound. The reaper
//! scans the table and force-fails entries older than the stuck-request
//! threshold; only bound entries count as evidence against a backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::health::HealthRegistry;
use crate::observability::metrics;
use crate::pool::{BorrowedConnection, EndpointKey, StuckRequestDetected};

/// Receives the reaper's verdict if the request is declared stuck.
pub type StuckSignal = oneshot::Receiver<StuckRequestDetected>;

#[derive(Debug)]
struct PendingEntry {
    uri: String,
    principal: String,
    endpoint: Option<EndpointKey>,
    started: Instant,
    connection: Option<AbortHandle>,
    signal: oneshot::Sender<StuckRequestDetected>,
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    entries: DashMap<u64, PendingEntry>,
    next_id: AtomicU64,
}

impl PendingRequests {
    pub(crate) fn register(
        self: &Arc<Self>,
        uri: String,
        principal: String,
    ) -> (PendingGuard, StuckSignal) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingEntry {
                uri,
                principal,
                endpoint: None,
                started: Instant::now(),
                connection: None,
                signal: tx,
            },
        );
        metrics::pending_request_added();

        let guard = PendingGuard {
            id,
            table: Arc::clone(self),
        };
        (guard, rx)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Attach the connection serving entry `id`. False if it is already gone.
    fn bind(&self, id: u64, endpoint: EndpointKey, connection: Option<AbortHandle>) -> bool {
        match self.entries.get_mut(&id) {
            Some(mut entry) => {
                entry.endpoint = Some(endpoint);
                entry.connection = connection;
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: u64) -> Option<PendingEntry> {
        let (_, entry) = self.entries.remove(&id)?;
        metrics::pending_request_removed();
        Some(entry)
    }

    /// Fail every entry older than `timeout` at `now`.
    ///
    /// Removal from the map decides ownership, so each stuck request is
    /// reported exactly once even if its guard drops concurrently.
    pub(crate) fn reap(
        &self,
        now: Instant,
        timeout: Duration,
        health: &dyn HealthRegistry,
    ) -> Vec<StuckRequestDetected> {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| now.saturating_duration_since(e.started) > timeout)
            .map(|e| *e.key())
            .collect();

        let mut stuck = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(entry) = self.remove(id) else {
                continue;
            };
            let detected = StuckRequestDetected {
                request_id: id,
                uri: entry.uri,
                principal: entry.principal,
                endpoint: entry.endpoint,
                age: now.saturating_duration_since(entry.started),
            };

            match &detected.endpoint {
                Some(endpoint) => {
                    health.report_backend_unreachable(
                        endpoint,
                        SystemTime::now(),
                        &format!(
                            "a request to {} for user {} appears stuck",
                            detected.uri, detected.principal
                        ),
                    );
                    tracing::warn!(
                        request_id = id,
                        uri = %detected.uri,
                        principal = %detected.principal,
                        endpoint = %endpoint,
                        age = ?detected.age,
                        "Stuck request detected, failing it"
                    );
                }
                None => tracing::warn!(
                    request_id = id,
                    uri = %detected.uri,
                    principal = %detected.principal,
                    age = ?detected.age,
                    "Request stuck waiting for a connection, failing it"
                ),
            }
            metrics::record_stuck_request();

            if let Some(connection) = entry.connection {
                connection.abort();
            }
            let _ = entry.signal.send(detected.clone());
            stuck.push(detected);
        }
        stuck
    }

    /// Abort every pending request. Used on shutdown.
    pub(crate) fn abort_all(&self) {
        let ids: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some(entry) = self.remove(id) {
                if let Some(connection) = entry.connection {
                    connection.abort();
                }
            }
        }
    }
}

/// Keeps a request in the pending table; dropping it unregisters.
#[derive(Debug)]
pub struct PendingGuard {
    id: u64,
    table: Arc<PendingRequests>,
}

impl PendingGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record that the request is now bound to `connection`.
    ///
    /// Returns false if the reaper already failed the request.
    pub fn bind(&self, connection: &BorrowedConnection) -> bool {
        self.table
            .bind(self.id, connection.key().clone(), connection.abort_handle())
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
