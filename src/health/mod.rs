//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Evidence producers:
//!     pool (connect failures, stuck-request reaper) ─┐
//!     active.rs (periodic probes)                  ─┼→ state.rs (per-endpoint record)
//!                                                    │
//! Consumers:                                         │
//!     mapper candidate walk → is_available(key) ◀───┘
//! ```
//!
//! # Design Decisions
//! - Health is keyed by EndpointKey, shared by every backend on that address
//! - Producers and consumers only see the `HealthRegistry` trait
//! - A backend with no evidence yet is available

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{BackendHealth, BackendHealthManager, HealthRegistry, HealthStatus};
