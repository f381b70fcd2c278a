//! Endpoint mapping subsystem.
//!
//! # Data Flow
//! ```text
//! RequestInfo
//!     → table.rs: first enabled rule whose condition matches
//!     → action resolved by id (unknown → RoutingResolutionError → NotFound)
//!     → Deny → NotFound, InternalError → InternalError
//!     → Proxy/CacheProxy:
//!         → director → enabled backend ids
//!         → BackendSelector orders them
//!         → unavailable backends skipped (health registry)
//!         → Target per remaining backend
//!     → failover.rs walks targets through the connection pool
//! ```
//!
//! # Design Decisions
//! - The mapping table lives behind ArcSwap; reload is one pointer swap
//! - A rejected reload keeps the previous table in full
//! - Mapping is synchronous and never blocks; only borrowing may wait

pub mod action;
pub mod failover;
pub mod table;

pub use action::{Action, ActionDefinition};
pub use failover::acquire_first;
pub use table::MappingTable;

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::{ConfigurationNotValid, ProxyConfig};
use crate::health::HealthRegistry;
use crate::load_balancer::{BackendDescriptor, BackendSelector, RoutingKey};
use crate::pool::EndpointKey;
use crate::routing::RequestInfo;

/// A matched rule names an action that is not registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("route '{route}' references unknown action '{action}'")]
pub struct RoutingResolutionError {
    pub route: String,
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Direct,
    Cache,
}

/// A backend chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub key: EndpointKey,
    pub backend_id: String,
    pub route_id: String,
    pub action_id: String,
    pub kind: ProxyKind,
}

/// Outcome of mapping one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapResult {
    Proxy(Target),
    NotFound,
    InternalError,
}

/// Like [`MapResult`], but with every available candidate in try order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Proxy(Vec<Target>),
    NotFound,
    InternalError,
}

/// Maps requests to backends through the current mapping table.
#[derive(Debug)]
pub struct EndpointMapper {
    table: ArcSwap<MappingTable>,
    selector: Arc<dyn BackendSelector>,
    health: Arc<dyn HealthRegistry>,
}

impl EndpointMapper {
    pub fn new(
        table: MappingTable,
        selector: Arc<dyn BackendSelector>,
        health: Arc<dyn HealthRegistry>,
    ) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            selector,
            health,
        }
    }

    pub fn from_config(
        config: &ProxyConfig,
        selector: Arc<dyn BackendSelector>,
        health: Arc<dyn HealthRegistry>,
    ) -> Result<Self, ConfigurationNotValid> {
        Ok(Self::new(MappingTable::from_config(config)?, selector, health))
    }

    /// Replace the mapping table. On error the current table stays active.
    pub fn reload(&self, config: &ProxyConfig) -> Result<(), ConfigurationNotValid> {
        match MappingTable::from_config(config) {
            Ok(table) => {
                tracing::info!(
                    routes = table.rules().len(),
                    backends = table.backends().count(),
                    "Mapping table replaced"
                );
                self.table.store(Arc::new(table));
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Mapping table reload rejected, keeping current table");
                Err(e)
            }
        }
    }

    /// The table currently in force.
    pub fn table(&self) -> Arc<MappingTable> {
        self.table.load_full()
    }

    /// Every registered backend, enabled or not, in configuration order.
    pub fn backends(&self) -> Vec<BackendDescriptor> {
        self.table.load().backends().cloned().collect()
    }

    /// Map a request to its first available backend.
    pub fn map(&self, req: &RequestInfo) -> MapResult {
        match self.dispatch(req) {
            Dispatch::Proxy(targets) => targets
                .into_iter()
                .next()
                .map(MapResult::Proxy)
                .unwrap_or(MapResult::NotFound),
            Dispatch::NotFound => MapResult::NotFound,
            Dispatch::InternalError => MapResult::InternalError,
        }
    }

    /// Every available target for a request, in the order to try them.
    pub fn candidates(&self, req: &RequestInfo) -> Vec<Target> {
        match self.dispatch(req) {
            Dispatch::Proxy(targets) => targets,
            Dispatch::NotFound | Dispatch::InternalError => Vec::new(),
        }
    }

    pub fn dispatch(&self, req: &RequestInfo) -> Dispatch {
        let table = self.table.load();

        let Some(rule) = table.rules().match_request(req) else {
            tracing::debug!(path = %req.path(), "No route matched");
            return Dispatch::NotFound;
        };

        let Some(definition) = table.action(rule.action()) else {
            let e = RoutingResolutionError {
                route: rule.id().to_string(),
                action: rule.action().to_string(),
            };
            tracing::warn!(error = %e, "Cannot resolve action");
            return Dispatch::NotFound;
        };

        let (director, kind) = match &definition.action {
            Action::Proxy { director } => (director, ProxyKind::Direct),
            Action::CacheProxy { director } => (director, ProxyKind::Cache),
            Action::Deny => return Dispatch::NotFound,
            Action::InternalError => return Dispatch::InternalError,
        };

        let key = RoutingKey::new(rule.id(), director.as_str());
        let universe = table.director_backends(director);
        let targets: Vec<Target> = self
            .selector
            .select_backends(req, &key, &universe)
            .into_iter()
            .filter_map(|id| table.backend(&id))
            .filter(|backend| {
                let available = self.health.is_available(&backend.key());
                if !available {
                    tracing::debug!(backend = %backend.id, "Skipping unavailable backend");
                }
                available
            })
            .map(|backend| Target {
                key: backend.key(),
                backend_id: backend.id.clone(),
                route_id: rule.id().to_string(),
                action_id: definition.id.clone(),
                kind,
            })
            .collect();

        if targets.is_empty() {
            tracing::debug!(route = %rule.id(), director = %director, "No available backend");
        }
        Dispatch::Proxy(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionConfig, BackendConfig, RouteConfig};
    use crate::health::BackendHealthManager;
    use crate::load_balancer::{RandomSelector, RoundRobin};
    use std::collections::BTreeMap;
    use std::time::{Duration, SystemTime};

    fn backend(id: &str, port: u16) -> BackendConfig {
        BackendConfig {
            id: id.into(),
            host: "10.0.0.1".into(),
            port,
            enabled: true,
            probe_path: "/".into(),
        }
    }

    fn route(id: &str, action: &str, expr: &str) -> RouteConfig {
        RouteConfig {
            id: id.into(),
            enabled: true,
            action: action.into(),
            match_expr: expr.into(),
        }
    }

    fn mapper(config: &ProxyConfig) -> (EndpointMapper, Arc<BackendHealthManager>) {
        let health = Arc::new(BackendHealthManager::new(Duration::ZERO));
        let mapper =
            EndpointMapper::from_config(config, Arc::new(RoundRobin::new()), health.clone()).unwrap();
        (mapper, health)
    }

    fn base_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backends = vec![backend("a", 1), backend("b", 2)];
        config
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mut config = base_config();
        config.routes = vec![
            route("catch-all", "proxy-all", "all"),
            route("never", "internal-error", "all"),
        ];
        let (mapper, _) = mapper(&config);
        for path in ["/", "/x", "/y/z"] {
            match mapper.map(&RequestInfo::get(path)) {
                MapResult::Proxy(target) => {
                    assert_eq!(target.route_id, "catch-all");
                    assert_eq!(target.kind, ProxyKind::Direct);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_disabled_rule_skipped() {
        let mut config = base_config();
        config.routes = vec![route("off", "internal-error", "all"), route("on", "not-found", "all")];
        config.routes[0].enabled = false;
        let (mapper, _) = mapper(&config);
        assert_eq!(mapper.map(&RequestInfo::get("/")), MapResult::NotFound);
    }

    #[test]
    fn test_no_match_and_unknown_action() {
        let mut config = base_config();
        config.routes = vec![
            route("api", "missing-action", "/api/.*"),
            route("boom", "internal-error", "/boom"),
        ];
        let (mapper, _) = mapper(&config);
        assert_eq!(mapper.map(&RequestInfo::get("/api/x")), MapResult::NotFound);
        assert_eq!(mapper.map(&RequestInfo::get("/other")), MapResult::NotFound);
        assert_eq!(mapper.map(&RequestInfo::get("/boom")), MapResult::InternalError);
    }

    #[test]
    fn test_unavailable_backends_skipped() {
        let mut config = base_config();
        config.routes = vec![route("all", "cache-if-possible", "all")];
        let (mapper, health) = mapper(&config);

        health.report_backend_unreachable(&EndpointKey::new("10.0.0.1", 1), SystemTime::now(), "down");
        for _ in 0..4 {
            match mapper.map(&RequestInfo::get("/")) {
                MapResult::Proxy(target) => {
                    assert_eq!(target.backend_id, "b");
                    assert_eq!(target.kind, ProxyKind::Cache);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        health.report_backend_unreachable(&EndpointKey::new("10.0.0.1", 2), SystemTime::now(), "down");
        assert_eq!(mapper.map(&RequestInfo::get("/")), MapResult::NotFound);
        assert!(mapper.candidates(&RequestInfo::get("/")).is_empty());
    }

    #[test]
    fn test_director_limits_candidates() {
        let mut config = base_config();
        config.directors = vec![crate::config::DirectorConfig {
            id: "only-b".into(),
            backends: vec!["b".into()],
        }];
        config.actions = vec![ActionConfig {
            id: "to-b".into(),
            kind: "proxy".into(),
            director: "only-b".into(),
            params: BTreeMap::new(),
        }];
        config.routes = vec![route("r", "to-b", "all")];
        let (mapper, _) = mapper(&config);

        let candidates = mapper.candidates(&RequestInfo::get("/"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].backend_id, "b");
        assert_eq!(candidates[0].action_id, "to-b");
    }

    #[test]
    fn test_candidates_cover_all_backends() {
        let mut config = base_config();
        config.routes = vec![route("r", "proxy-all", "all")];
        let health = Arc::new(BackendHealthManager::new(Duration::ZERO));
        let mapper = EndpointMapper::from_config(&config, Arc::new(RandomSelector), health).unwrap();

        let mut ids: Vec<_> = mapper
            .candidates(&RequestInfo::get("/"))
            .into_iter()
            .map(|t| t.backend_id)
            .collect();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_rejected_reload_keeps_table() {
        let mut config = base_config();
        config.routes = vec![route("r", "proxy-all", "all")];
        let (mapper, _) = mapper(&config);

        let mut broken = config.clone();
        broken.backends.push(backend("a", 3));
        broken.routes = vec![route("r", "not-found", "all")];
        let err = mapper.reload(&broken).unwrap_err();
        assert_eq!(err.errors, vec!["backend 'a' is already defined".to_string()]);

        assert_eq!(mapper.backends().len(), 2);
        assert!(matches!(mapper.map(&RequestInfo::get("/")), MapResult::Proxy(_)));

        let mut next = config.clone();
        next.routes = vec![route("r", "not-found", "all")];
        mapper.reload(&next).unwrap();
        assert_eq!(mapper.map(&RequestInfo::get("/")), MapResult::NotFound);
    }
}
