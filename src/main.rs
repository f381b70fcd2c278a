//! Rule-based HTTP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ routing (rule table, match expressions)
//!                                          │
//!                                          ▼
//!                                     mapper (action → director → selector)
//!                                          │   health registry filters candidates
//!                                          ▼
//!                                     pool (per-endpoint connections, failover)
//!                                          │   pending table + stuck-request reaper
//!                                          ▼
//!     Client Response ◀── response ◀── backend connection ◀──── Backend Server
//!
//!     Cross-cutting: config (TOML + hot reload), observability, lifecycle
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use routing_proxy::config::{load_config, ConfigWatcher, ObservabilityConfig};
use routing_proxy::lifecycle::{Shutdown, Signal, Signals, StartupError};
use routing_proxy::observability::{logging, metrics};
use routing_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "routing-proxy", version, about = "Rule-based HTTP reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "routing-proxy.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = load_config(&cli.config);
    let observability = loaded
        .as_ref()
        .map(|c| c.observability.clone())
        .unwrap_or_else(|_| ObservabilityConfig::default());
    logging::init(&observability);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %cli.config.display(), error = %e, "Cannot load configuration");
            return Err(e.into());
        }
    };

    if cli.check {
        println!(
            "{}: ok ({} routes, {} backends, {} actions)",
            cli.config.display(),
            config.routes.len(),
            config.backends.len(),
            config.actions.len()
        );
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        "routing-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

    let server = HttpServer::new(config)?;
    let core = server.core();

    let (watcher, config_updates) = ConfigWatcher::new(&cli.config);
    let _watcher = match watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, reload with SIGHUP");
            None
        }
    };

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    let mut signals = Signals::register()?;
    let config_path = cli.config.clone();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Signal::Shutdown => {
                        shutdown.trigger();
                        break;
                    }
                    Signal::Reload => match load_config(&config_path) {
                        Ok(config) => {
                            let _ = core.apply(&config);
                        }
                        Err(e) => tracing::error!(error = %e, "Reload failed, keeping current configuration"),
                    },
                }
            }
        });
    }

    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
