//! Shuffle selection strategy.

use rand::seq::SliceRandom;

use crate::load_balancer::{BackendSelector, RoutingKey};
use crate::routing::RequestInfo;

/// Uniformly shuffled permutation of the candidates, new order per call.
///
/// Spreads load across calls without any round-robin fairness within a
/// sequence of calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl BackendSelector for RandomSelector {
    fn select_backends(
        &self,
        _req: &RequestInfo,
        _key: &RoutingKey,
        backends: &[String],
    ) -> Vec<String> {
        let mut order = backends.to_vec();
        order.shuffle(&mut rand::thread_rng());
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("b{}", i)).collect()
    }

    #[test]
    fn test_returns_permutation() {
        let backends = ids(5);
        let key = RoutingKey::new("r", "*");
        let order = RandomSelector.select_backends(&RequestInfo::get("/"), &key, &backends);
        assert_eq!(order.len(), 5);
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_every_backend_leads_eventually() {
        let backends = ids(3);
        let key = RoutingKey::new("r", "*");
        let mut leaders = HashSet::new();
        for _ in 0..500 {
            let order = RandomSelector.select_backends(&RequestInfo::get("/"), &key, &backends);
            leaders.insert(order[0].clone());
        }
        assert_eq!(leaders.len(), 3);
    }

    #[test]
    fn test_empty_universe() {
        let key = RoutingKey::new("r", "*");
        assert!(RandomSelector
            .select_backends(&RequestInfo::get("/"), &key, &[])
            .is_empty());
    }
}
