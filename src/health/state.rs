//! Backend health state.
//!
//! # States
//! - Unknown: never reported, receives traffic
//! - Reachable: last report succeeded, receives traffic
//! - Unreachable: excluded from candidate selection
//!
//! # State Transitions
//! ```text
//! Unknown/Reachable → Unreachable: report_backend_unreachable
//! Unreachable → Reachable: report_backend_reachable
//! Unreachable → available again: down cooldown elapsed (0 = never)
//! ```
//!
//! # Design Decisions
//! - One entry per EndpointKey in a DashMap; updates are atomic per key
//! - State changes logged for observability
//! - The map lives as long as the manager and is cleared on shutdown

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;

use crate::observability::metrics;
use crate::pool::EndpointKey;

/// Sink for health evidence and source of availability decisions.
pub trait HealthRegistry: Send + Sync + fmt::Debug {
    /// Record evidence that the backend could not be reached.
    fn report_backend_unreachable(&self, key: &EndpointKey, at: SystemTime, reason: &str);

    /// Record evidence that the backend answered.
    fn report_backend_reachable(&self, key: &EndpointKey, at: SystemTime);

    /// True if the backend may be offered as a routing candidate.
    fn is_available(&self, key: &EndpointKey) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Reachable,
    Unreachable,
}

/// Health record of one endpoint.
#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub last_unreachable: Option<SystemTime>,
    pub last_unreachable_reason: Option<String>,
    pub last_reachable: Option<SystemTime>,
    pub consecutive_failures: u32,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_unreachable: None,
            last_unreachable_reason: None,
            last_reachable: None,
            consecutive_failures: 0,
        }
    }
}

/// Process-wide health registry keyed by endpoint.
#[derive(Debug, Default)]
pub struct BackendHealthManager {
    entries: DashMap<EndpointKey, BackendHealth>,
    /// Milliseconds after which an unreachable backend is tried again.
    down_cooldown_ms: AtomicU64,
}

impl BackendHealthManager {
    pub fn new(down_cooldown: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            down_cooldown_ms: AtomicU64::new(down_cooldown.as_millis() as u64),
        }
    }

    /// Change the recovery cooldown; applies to subsequent checks.
    pub fn set_down_cooldown(&self, cooldown: Duration) {
        self.down_cooldown_ms
            .store(cooldown.as_millis() as u64, Ordering::Relaxed);
    }

    /// Current record for `key`, if any report was ever made.
    pub fn get(&self, key: &EndpointKey) -> Option<BackendHealth> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    pub fn snapshot(&self) -> HashMap<EndpointKey, BackendHealth> {
        self.entries
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn available_at(&self, health: &BackendHealth, now: SystemTime) -> bool {
        match health.status {
            HealthStatus::Unknown | HealthStatus::Reachable => true,
            HealthStatus::Unreachable => {
                let cooldown = self.down_cooldown_ms.load(Ordering::Relaxed);
                if cooldown == 0 {
                    return false;
                }
                health
                    .last_unreachable
                    .and_then(|t| now.duration_since(t).ok())
                    .map(|elapsed| elapsed >= Duration::from_millis(cooldown))
                    .unwrap_or(true)
            }
        }
    }
}

impl HealthRegistry for BackendHealthManager {
    fn report_backend_unreachable(&self, key: &EndpointKey, at: SystemTime, reason: &str) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        let was = entry.status;
        entry.status = HealthStatus::Unreachable;
        entry.last_unreachable = Some(at);
        entry.last_unreachable_reason = Some(reason.to_string());
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        let failures = entry.consecutive_failures;
        drop(entry);

        if was != HealthStatus::Unreachable {
            tracing::warn!(endpoint = %key, reason = %reason, "Backend marked unreachable");
        } else {
            tracing::debug!(endpoint = %key, reason = %reason, failures, "Backend still unreachable");
        }
        metrics::record_backend_health(key, false);
    }

    fn report_backend_reachable(&self, key: &EndpointKey, at: SystemTime) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        let was = entry.status;
        entry.status = HealthStatus::Reachable;
        entry.last_reachable = Some(at);
        entry.consecutive_failures = 0;
        drop(entry);

        if was == HealthStatus::Unreachable {
            tracing::info!(endpoint = %key, "Backend reachable again");
        }
        metrics::record_backend_health(key, true);
    }

    fn is_available(&self, key: &EndpointKey) -> bool {
        match self.entries.get(key) {
            Some(health) => self.available_at(health.value(), SystemTime::now()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EndpointKey {
        EndpointKey::new("10.0.0.1", 8080)
    }

    #[test]
    fn test_unknown_is_available() {
        let health = BackendHealthManager::new(Duration::ZERO);
        assert!(health.is_available(&key()));
        assert!(health.get(&key()).is_none());
    }

    #[test]
    fn test_unreachable_then_reachable() {
        let health = BackendHealthManager::new(Duration::ZERO);
        let now = SystemTime::now();

        health.report_backend_unreachable(&key(), now, "connection refused");
        assert!(!health.is_available(&key()));
        let record = health.get(&key()).unwrap();
        assert_eq!(record.status, HealthStatus::Unreachable);
        assert_eq!(record.last_unreachable, Some(now));
        assert_eq!(record.last_unreachable_reason.as_deref(), Some("connection refused"));

        health.report_backend_unreachable(&key(), now, "still refused");
        assert_eq!(health.get(&key()).unwrap().consecutive_failures, 2);

        health.report_backend_reachable(&key(), now);
        assert!(health.is_available(&key()));
        let record = health.get(&key()).unwrap();
        assert_eq!(record.consecutive_failures, 0);
        // the last failure stays on record for diagnostics
        assert_eq!(record.last_unreachable_reason.as_deref(), Some("still refused"));
    }

    #[test]
    fn test_cooldown_readmits_backend() {
        let health = BackendHealthManager::new(Duration::from_secs(30));
        let long_ago = SystemTime::now() - Duration::from_secs(60);
        health.report_backend_unreachable(&key(), long_ago, "timeout");
        assert!(health.is_available(&key()));

        health.report_backend_unreachable(&key(), SystemTime::now(), "timeout");
        assert!(!health.is_available(&key()));
    }

    #[test]
    fn test_keys_are_independent() {
        let health = BackendHealthManager::new(Duration::ZERO);
        let other = EndpointKey::new("10.0.0.2", 8080);
        health.report_backend_unreachable(&key(), SystemTime::now(), "down");
        assert!(health.is_available(&other));

        health.clear();
        assert!(health.is_available(&key()));
        assert!(health.snapshot().is_empty());
    }
}
