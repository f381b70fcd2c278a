//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, request ID)
//! - Bind server to listener
//! - Dispatch requests through the endpoint mapper
//! - Forward requests over pooled backend connections
//! - Apply configuration reloads and shut the core down on exit

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use futures_util::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::request::{request_id, upstream_request, UuidRequestId};
use crate::http::response;
use crate::lifecycle::{ProxyCore, StartupError};
use crate::mapper::{acquire_first, Dispatch, Target};
use crate::observability::metrics;
use crate::pool::{StuckRequestDetected, UpstreamError};
use crate::routing::RequestInfo;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<ProxyCore>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    core: Arc<ProxyCore>,
    config: ProxyConfig,
}

impl HttpServer {
    /// Build the routing core and the router. Must run inside a tokio runtime.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let core = Arc::new(ProxyCore::build(&config)?);
        let router = Self::build_router(AppState { core: core.clone() });
        Ok(Self {
            router,
            core,
            config,
        })
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    pub fn core(&self) -> Arc<ProxyCore> {
        self.core.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until `shutdown` fires, applying every configuration received
    /// on `config_updates` along the way.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let monitor = HealthMonitor::new(
            self.core.mapper.clone(),
            self.core.health.clone(),
            self.config.health_check.clone(),
        );
        tokio::spawn(monitor.run(shutdown.resubscribe()));

        let core = self.core.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => {
                            let _ = core.apply(&config);
                        }
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        self.core.shutdown();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler: map, borrow, forward, stream back.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let request_id = request_id(request.headers()).to_string();
    let info = RequestInfo::from_request(&request);

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %info.path(),
        "Proxying request"
    );

    let response = match state.core.mapper.dispatch(&info) {
        Dispatch::NotFound => response::not_found(),
        Dispatch::InternalError => response::internal_error(),
        Dispatch::Proxy(targets) => {
            forward(&state.core, request, &info, targets, peer, &request_id).await
        }
    };

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

enum Exchange {
    Completed(Result<hyper::Response<hyper::body::Incoming>, UpstreamError>),
    Stuck(StuckRequestDetected),
}

async fn forward(
    core: &ProxyCore,
    request: Request<Body>,
    info: &RequestInfo,
    targets: Vec<Target>,
    peer: SocketAddr,
    request_id: &str,
) -> Response {
    let principal = info.principal().unwrap_or_else(|| "-".to_string());
    let (pending, stuck) = core.pool.track(info.target(), principal);
    // polled by several selects; fused so a closed signal stays pending
    let mut stuck = stuck.fuse();

    let acquired = tokio::select! {
        biased;
        Ok(detected) = &mut stuck => Err(detected),
        result = acquire_first(&core.pool, targets) => Ok(result),
    };
    let (target, mut connection) = match acquired {
        Ok(Ok(bound)) => bound,
        Ok(Err(failures)) => {
            tracing::warn!(
                request_id = %request_id,
                attempts = failures.len(),
                "No backend could take the request"
            );
            return response::not_found();
        }
        Err(detected) => {
            tracing::warn!(request_id = %request_id, error = %detected, "Request failed while waiting for a connection");
            return response::gateway_timeout();
        }
    };

    // an idle connection the backend closed in the meantime gets one fresh retry
    if let Err(e) = connection.ready().await {
        tracing::debug!(request_id = %request_id, backend = %target.backend_id, error = %e, "Pooled connection went stale");
        connection.discard("closed while idle");
        let reacquired = tokio::select! {
            biased;
            Ok(detected) = &mut stuck => Err(detected),
            result = core.pool.acquire(&target.key) => Ok(result),
        };
        connection = match reacquired {
            Ok(Ok(fresh)) => fresh,
            Ok(Err(e)) => {
                tracing::warn!(request_id = %request_id, error = %e, "Backend unavailable after stale connection");
                return response::not_found();
            }
            Err(detected) => {
                tracing::warn!(request_id = %request_id, error = %detected, "Request failed while waiting for a connection");
                return response::gateway_timeout();
            }
        };
    }
    pending.bind(&connection);

    let upstream = match upstream_request(request, &target, peer) {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Cannot build upstream request");
            connection.release();
            return response::bad_gateway();
        }
    };

    // the reaper aborts the connection when it fires, so its verdict wins
    let exchange = tokio::select! {
        biased;
        Ok(detected) = &mut stuck => Exchange::Stuck(detected),
        result = connection.send(upstream) => Exchange::Completed(result),
    };

    match exchange {
        Exchange::Completed(Ok(upstream_response)) => {
            tracing::debug!(
                request_id = %request_id,
                backend = %target.backend_id,
                route = %target.route_id,
                status = %upstream_response.status(),
                "Upstream responded"
            );
            response::proxied(upstream_response, connection, pending)
        }
        Exchange::Completed(Err(e)) => {
            tracing::warn!(request_id = %request_id, backend = %target.backend_id, error = %e, "Upstream error");
            connection.discard("upstream error");
            response::bad_gateway()
        }
        Exchange::Stuck(detected) => {
            tracing::warn!(request_id = %request_id, error = %detected, "Request failed by stuck-request reaper");
            connection.discard("stuck request");
            response::gateway_timeout()
        }
    }
}
