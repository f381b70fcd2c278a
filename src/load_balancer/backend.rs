//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single configured backend server
//! - Derive the pool partition key from its address
//! - Carry the liveness flag used to exclude disabled backends

use crate::config::BackendConfig;
use crate::pool::EndpointKey;

/// A single backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Unique backend identifier.
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Disabled backends are kept for reference but never selected.
    pub enabled: bool,
    /// Path probed by active health checks.
    pub probe_path: String,
}

impl BackendDescriptor {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            enabled: true,
            probe_path: "/".to_string(),
        }
    }

    /// The pool partition this backend's connections live in.
    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(self.host.clone(), self.port)
    }
}

impl From<&BackendConfig> for BackendDescriptor {
    fn from(config: &BackendConfig) -> Self {
        Self {
            id: config.id.clone(),
            host: config.host.clone(),
            port: config.port,
            enabled: config.enabled,
            probe_path: config.probe_path.clone(),
        }
    }
}
