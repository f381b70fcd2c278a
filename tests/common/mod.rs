//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use routing_proxy::config::ProxyConfig;
use routing_proxy::lifecycle::Shutdown;
use routing_proxy::HttpServer;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Start a keep-alive backend on an ephemeral port.
///
/// Answers every request with `"{name} {path}"` and echoes the forwarding
/// headers it saw back as `x-seen-*` response headers. A path with a segment
/// starting with `slow` sleeps for a second before answering.
pub async fn start_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(move |request: Request| echo(name, request));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(name: &'static str, request: Request) -> Response {
    let path = request.uri().path().to_string();
    if path.contains("/slow") {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let mut headers = HeaderMap::new();
    for (seen, header) in [
        ("x-seen-forwarded-proto", "x-forwarded-proto"),
        ("x-seen-forwarded-for", "x-forwarded-for"),
        ("x-seen-request-id", "x-request-id"),
        ("x-seen-host", "host"),
    ] {
        if let Some(value) = request.headers().get(header) {
            headers.insert(seen, value.clone());
        }
    }
    headers.insert("x-backend", HeaderValue::from_static(name));

    (StatusCode::OK, headers, format!("{} {}", name, path)).into_response()
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A running proxy and the handles to drive it.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub core: Arc<routing_proxy::ProxyCore>,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the proxy on an ephemeral port with active health checks off.
pub async fn start_proxy(mut config: ProxyConfig) -> TestProxy {
    config.health_check.enabled = false;
    config.listener.bind_address = "127.0.0.1:0".into();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).expect("proxy config should be valid");
    let core = server.core();

    let shutdown = Shutdown::new();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    TestProxy {
        addr,
        core,
        updates,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Configuration with one proxy action per named backend, each routed by
/// the path prefix `/{id}/`.
pub fn config_for(backends: &[(&str, SocketAddr)]) -> ProxyConfig {
    let mut toml = String::new();
    for (id, addr) in backends {
        toml.push_str(&format!(
            r#"
            [[backends]]
            id = "{id}"
            host = "127.0.0.1"
            port = {port}

            [[directors]]
            id = "{id}-only"
            backends = ["{id}"]

            [[actions]]
            id = "to-{id}"
            type = "proxy"
            director = "{id}-only"

            [[routes]]
            id = "{id}-route"
            action = "to-{id}"
            match = "/{id}/.*"
            "#,
            id = id,
            port = addr.port(),
        ));
    }
    routing_proxy::config::parse_config(&toml).expect("generated config should parse")
}
