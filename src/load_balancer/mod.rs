//! Backend selection subsystem.
//!
//! # Data Flow
//! ```text
//! Rule matched → RoutingKey (route id, director id)
//!     → director resolved to its backend ids
//!     → BackendSelector orders the candidates:
//!         - random.rs (fresh shuffle per call, the default)
//!         - round_robin.rs (rotate the starting backend per call)
//!     → mapper walks candidates in the returned order
//! ```
//!
//! # Design Decisions
//! - Selectors only order identifiers; availability is the mapper's concern
//! - Strategies are pluggable behind one trait, the mapper never changes
//! - No cross-call fairness guarantee beyond what a strategy documents

pub mod backend;
pub mod random;
pub mod round_robin;

pub use backend::BackendDescriptor;
pub use random::RandomSelector;
pub use round_robin::RoundRobin;

use crate::routing::RequestInfo;

/// Identifies what a matched rule routes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    /// Identifier of the rule that matched.
    pub route: String,
    /// Director whose backends are the candidate universe.
    pub director: String,
}

impl RoutingKey {
    pub fn new(route: impl Into<String>, director: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            director: director.into(),
        }
    }
}

/// Orders candidate backends for a request.
pub trait BackendSelector: Send + Sync + std::fmt::Debug {
    /// Return backend identifiers in the order they should be tried.
    ///
    /// `backends` is the candidate universe for `key`, in configuration order.
    fn select_backends(
        &self,
        req: &RequestInfo,
        key: &RoutingKey,
        backends: &[String],
    ) -> Vec<String>;
}
