//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend of the current mapping table
//! - Report reachable/unreachable evidence to the health registry

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::HealthRegistry;
use crate::load_balancer::BackendDescriptor;
use crate::mapper::EndpointMapper;

pub struct HealthMonitor {
    mapper: Arc<EndpointMapper>,
    health: Arc<dyn HealthRegistry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(
        mapper: Arc<EndpointMapper>,
        health: Arc<dyn HealthRegistry>,
        config: HealthCheckConfig,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());

        Self {
            mapper,
            health,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout = self.config.timeout_secs,
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every enabled backend once, concurrently.
    pub async fn check_all(&self) {
        let backends: Vec<BackendDescriptor> = self
            .mapper
            .backends()
            .into_iter()
            .filter(|b| b.enabled)
            .collect();

        let outcomes = join_all(backends.iter().map(|backend| self.probe(backend))).await;
        for (backend, outcome) in backends.iter().zip(outcomes) {
            let key = backend.key();
            match outcome {
                Ok(()) => self.health.report_backend_reachable(&key, SystemTime::now()),
                Err(reason) => {
                    self.health
                        .report_backend_unreachable(&key, SystemTime::now(), &reason)
                }
            }
        }
    }

    async fn probe(&self, backend: &BackendDescriptor) -> Result<(), String> {
        let uri = format!("http://{}{}", backend.key(), backend.probe_path);
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "routing-proxy-health-check")
            .body(Body::empty())
            .map_err(|e| format!("cannot build probe request: {}", e))?;

        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_server_error() => {
                tracing::warn!(backend = %backend.id, status = %response.status(), "Health probe failed: server error");
                Err(format!("health probe returned {}", response.status()))
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.id, error = %e, "Health probe failed: connection error");
                Err(format!("health probe failed: {}", e))
            }
            Err(_) => {
                tracing::warn!(backend = %backend.id, "Health probe failed: timeout");
                Err(format!("health probe timed out after {:?}", timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ProxyConfig};
    use crate::health::BackendHealthManager;
    use crate::load_balancer::RandomSelector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn http_backend(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status_line
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn backend(id: &str, port: u16) -> BackendConfig {
        BackendConfig {
            id: id.into(),
            host: "127.0.0.1".into(),
            port,
            enabled: true,
            probe_path: "/health".into(),
        }
    }

    #[tokio::test]
    async fn test_probe_reports_both_outcomes() {
        let up = http_backend("200 OK").await;
        let broken = http_backend("503 Service Unavailable").await;
        let down = closed_port().await;

        let mut config = ProxyConfig::default();
        config.backends = vec![backend("up", up), backend("broken", broken), backend("down", down)];

        let health = Arc::new(BackendHealthManager::new(Duration::ZERO));
        let mapper = Arc::new(
            EndpointMapper::from_config(&config, Arc::new(RandomSelector), health.clone()).unwrap(),
        );
        let monitor = HealthMonitor::new(mapper, health.clone(), HealthCheckConfig::default());
        monitor.check_all().await;

        let key = |port| crate::pool::EndpointKey::new("127.0.0.1", port);
        assert!(health.is_available(&key(up)));
        assert!(!health.is_available(&key(broken)));
        assert!(!health.is_available(&key(down)));
        assert!(health
            .get(&key(broken))
            .unwrap()
            .last_unreachable_reason
            .unwrap()
            .contains("503"));
    }
}
