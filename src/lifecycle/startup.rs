//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize the core subsystems in dependency order
//! - Apply reloaded configuration to all of them at once
//! - Tear them down on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Health registry first, then mapping table, then pool
//! - A reload is validated in full before any subsystem sees it

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::{validate_config, ConfigurationNotValid, ProxyConfig, SelectorKind};
use crate::health::BackendHealthManager;
use crate::load_balancer::{BackendSelector, RandomSelector, RoundRobin};
use crate::mapper::EndpointMapper;
use crate::net::{CertificateError, CertificateStore};
use crate::pool::{ConnectionPool, PoolSettings};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigurationNotValid),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// A configuration reload that was rejected. Nothing of it was applied.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Config(#[from] ConfigurationNotValid),

    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

pub fn selector(kind: SelectorKind) -> Arc<dyn BackendSelector> {
    match kind {
        SelectorKind::Random => Arc::new(RandomSelector::new()),
        SelectorKind::RoundRobin => Arc::new(RoundRobin::new()),
    }
}

/// The routing core shared by the HTTP layer and background tasks.
#[derive(Debug)]
pub struct ProxyCore {
    pub health: Arc<BackendHealthManager>,
    pub mapper: Arc<EndpointMapper>,
    pub pool: ConnectionPool,
    pub certificates: ArcSwap<CertificateStore>,
}

impl ProxyCore {
    /// Build every subsystem from a configuration. Must run inside a tokio runtime.
    pub fn build(config: &ProxyConfig) -> Result<Self, StartupError> {
        validate_config(config)?;

        let health = Arc::new(BackendHealthManager::new(Duration::from_secs(
            config.health_check.down_cooldown_secs,
        )));
        let mapper = Arc::new(EndpointMapper::from_config(
            config,
            selector(config.load_balancing.strategy),
            health.clone(),
        )?);
        let certificates = CertificateStore::load(&config.certificates)?;
        let pool = ConnectionPool::new(PoolSettings::from(&config.connections), health.clone());

        tracing::info!(
            routes = config.routes.len(),
            backends = config.backends.len(),
            certificates = certificates.len(),
            strategy = ?config.load_balancing.strategy,
            "Proxy core initialized"
        );

        Ok(Self {
            health,
            mapper,
            pool,
            certificates: ArcSwap::from_pointee(certificates),
        })
    }

    /// Apply a new configuration. Rejected as a whole if it is not valid or
    /// a certificate cannot be loaded.
    ///
    /// The listener address and balancing strategy are fixed at startup.
    pub fn apply(&self, config: &ProxyConfig) -> Result<(), ReloadError> {
        if let Err(e) = validate_config(config) {
            tracing::error!(error = %e, "Configuration rejected, keeping current configuration");
            return Err(e.into());
        }
        let certificates = match CertificateStore::load(&config.certificates) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(error = %e, "Configuration rejected, keeping current configuration");
                return Err(e.into());
            }
        };

        self.mapper.reload(config)?;
        self.pool.apply_settings(PoolSettings::from(&config.connections));
        self.pool
            .retain_endpoints(self.mapper.backends().iter().map(|b| b.key()));
        self.health.set_down_cooldown(Duration::from_secs(
            config.health_check.down_cooldown_secs,
        ));
        self.certificates.store(Arc::new(certificates));

        tracing::info!("Configuration applied");
        Ok(())
    }

    /// Close the pool and forget health state. Idempotent.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.health.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, CertificateConfig, RouteConfig};
    use crate::mapper::MapResult;
    use crate::routing::RequestInfo;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backends = vec![BackendConfig {
            id: "a".into(),
            host: "127.0.0.1".into(),
            port: 9001,
            enabled: true,
            probe_path: "/".into(),
        }];
        config.routes = vec![RouteConfig {
            id: "r".into(),
            enabled: true,
            action: "proxy-all".into(),
            match_expr: "all".into(),
        }];
        config
    }

    #[tokio::test]
    async fn test_apply_updates_every_subsystem() {
        let core = ProxyCore::build(&config()).unwrap();

        let mut next = config();
        next.connections.idle_timeout_ms = 8_000;
        next.connections.max_connections_per_endpoint = 3;
        next.routes[0].action = "not-found".into();
        core.apply(&next).unwrap();

        assert_eq!(core.pool.settings().max_connections_per_endpoint, 3);
        assert_eq!(core.pool.settings().idle_timeout, Duration::from_secs(8));
        assert_eq!(core.mapper.map(&RequestInfo::get("/")), MapResult::NotFound);
        core.shutdown();
    }

    #[tokio::test]
    async fn test_unreadable_certificate_rejects_whole_apply() {
        let core = ProxyCore::build(&config()).unwrap();

        let mut next = config();
        next.routes[0].action = "not-found".into();
        next.connections.max_connections_per_endpoint = 4;
        next.certificates.push(CertificateConfig {
            id: "site".into(),
            hostname: "example.com".into(),
            cert_path: "/nonexistent/site.pem".into(),
        });
        assert!(ProxyCore::build(&next).is_err());

        let err = core.apply(&next).unwrap_err();
        assert!(matches!(err, ReloadError::Certificate(_)));
        assert!(matches!(core.mapper.map(&RequestInfo::get("/")), MapResult::Proxy(_)));
        assert_eq!(core.pool.settings().max_connections_per_endpoint, 10);
        assert!(core.certificates.load().is_empty());
        core.shutdown();
    }

    #[tokio::test]
    async fn test_rejected_apply_changes_nothing() {
        let core = ProxyCore::build(&config()).unwrap();

        let mut bad = config();
        bad.connections.max_connections_per_endpoint = 7;
        bad.backends.push(bad.backends[0].clone());
        assert!(matches!(core.apply(&bad), Err(ReloadError::Config(_))));

        assert_eq!(core.pool.settings().max_connections_per_endpoint, 10);
        assert!(matches!(core.mapper.map(&RequestInfo::get("/")), MapResult::Proxy(_)));
        core.shutdown();
        core.shutdown();
    }
}
