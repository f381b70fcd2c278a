//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend server definitions.
    pub backends: Vec<BackendConfig>,

    /// Named subsets of backends.
    pub directors: Vec<DirectorConfig>,

    /// Actions routes can point at, in addition to the built-in ones.
    pub actions: Vec<ActionConfig>,

    /// Ordered routing rules; the first enabled match wins.
    pub routes: Vec<RouteConfig>,

    /// How candidate backends are ordered.
    pub load_balancing: LoadBalancingConfig,

    /// Connection pool tuning.
    pub connections: ConnectionsConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// TLS certificates keyed by hostname.
    pub certificates: Vec<CertificateConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub id: String,

    pub host: String,

    pub port: u16,

    /// Disabled backends are never offered as candidates.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path requested by active health probes.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
}

fn default_true() -> bool {
    true
}

fn default_probe_path() -> String {
    "/".to_string()
}

/// A named subset of backends.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DirectorConfig {
    pub id: String,

    /// Backend identifiers, in preference order.
    pub backends: Vec<String>,
}

/// Action configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActionConfig {
    pub id: String,

    /// One of `proxy`, `cache`, `not-found`, `internal-error`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Director whose backends serve proxy actions ("*" = all backends).
    #[serde(default = "default_director")]
    pub director: String,

    /// Action-specific parameters, passed through untouched.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_director() -> String {
    "*".to_string()
}

/// Routing rule configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Route identifier, unique ignoring case.
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Identifier of the action to run on match.
    pub action: String,

    /// Matching expression, e.g. `https and /api/.*`.
    #[serde(rename = "match")]
    pub match_expr: String,
}

/// Candidate ordering strategy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorKind {
    /// Fresh uniform shuffle per request.
    #[default]
    Random,
    /// Rotate the first candidate per request.
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct LoadBalancingConfig {
    pub strategy: SelectorKind,
}

/// Connection pool configuration. Every value is reloadable.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Idle connections older than this are evicted; the reaper runs every quarter of it.
    pub idle_timeout_ms: u64,

    /// In-flight requests older than this are failed and reported.
    pub stuck_request_timeout_ms: u64,

    pub connect_timeout_ms: u64,

    /// Longest wait for a connection when an endpoint is at capacity.
    pub borrow_timeout_ms: u64,

    /// Bound on idle and total connections per endpoint.
    pub max_connections_per_endpoint: usize,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 60_000,
            stuck_request_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            borrow_timeout_ms: 60_000,
            max_connections_per_endpoint: 10,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Seconds after which an unreachable backend is tried again (0 = only
    /// after a successful probe or connect).
    pub down_cooldown_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            down_cooldown_secs: 0,
        }
    }
}

/// Certificate descriptor.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CertificateConfig {
    pub id: String,

    /// Exact hostname, `*.domain` or `*`.
    pub hostname: String,

    /// Path to the PEM certificate chain.
    pub cert_path: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
