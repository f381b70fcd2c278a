//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Identifier uniqueness and referential integrity, via the mapping table builder
//! - Compile every route's match expression eagerly
//! - Validate value ranges (timeouts > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), ConfigurationNotValid>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::mapper::MappingTable;

/// The configuration was rejected as a whole; the previous one stays active.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("configuration not valid: {}", .errors.join("; "))]
pub struct ConfigurationNotValid {
    pub errors: Vec<String>,
}

impl ConfigurationNotValid {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn single(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
        }
    }
}

/// Check `config` and report every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), ConfigurationNotValid> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "listener bind_address '{}' is not a socket address",
            config.listener.bind_address
        ));
    }

    for backend in &config.backends {
        if backend.host.trim().is_empty() {
            errors.push(format!("backend '{}' has an empty host", backend.id));
        }
        if backend.port == 0 {
            errors.push(format!("backend '{}' has port 0", backend.id));
        }
    }

    let connections = &config.connections;
    if connections.max_connections_per_endpoint == 0 {
        errors.push("connections.max_connections_per_endpoint must be at least 1".to_string());
    }
    for (name, value) in [
        ("idle_timeout_ms", connections.idle_timeout_ms),
        ("stuck_request_timeout_ms", connections.stuck_request_timeout_ms),
        ("connect_timeout_ms", connections.connect_timeout_ms),
    ] {
        if value == 0 {
            errors.push(format!("connections.{} must be greater than 0", name));
        }
    }

    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push("health_check.interval_secs must be greater than 0".to_string());
    }

    let mut certificate_ids = HashSet::new();
    for certificate in &config.certificates {
        if !certificate_ids.insert(certificate.id.as_str()) {
            errors.push(format!("certificate '{}' is already defined", certificate.id));
        }
        if certificate.hostname.trim().is_empty() {
            errors.push(format!("certificate '{}' has an empty hostname", certificate.id));
        }
    }

    if let Err(invalid) = MappingTable::from_config(config) {
        errors.extend(invalid.errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigurationNotValid::new(errors))
    }
}
