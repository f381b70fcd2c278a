//! Round-robin selection strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{BackendSelector, RoutingKey};
use crate::routing::RequestInfo;

/// Round-robin selector.
/// Stores an internal counter to rotate which backend is tried first; the
/// rest follow in configuration order so failover still covers everyone.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackendSelector for RoundRobin {
    fn select_backends(
        &self,
        _req: &RequestInfo,
        _key: &RoutingKey,
        backends: &[String],
    ) -> Vec<String> {
        if backends.is_empty() {
            return Vec::new();
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % backends.len();
        backends[start..]
            .iter()
            .chain(backends[..start].iter())
            .cloned()
            .collect()
    }
}
