//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, match expressions compiled)
//!     → ProxyConfig (validated, immutable)
//!     → EndpointMapper / ConnectionPool / BackendHealthManager
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates (rejects as a whole on any error)
//!     → mpsc channel → server applies it
//!     → atomic swap of mapping table and pool settings
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ActionConfig, BackendConfig, CertificateConfig, ConnectionsConfig, DirectorConfig,
    HealthCheckConfig, ListenerConfig, LoadBalancingConfig, ObservabilityConfig, ProxyConfig,
    RouteConfig, SelectorKind,
};
pub use validation::{validate_config, ConfigurationNotValid};
pub use watcher::ConfigWatcher;
