//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (plain or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`key = %value`) instead of formatted messages
//! - Request ID flows through the HTTP layer into every log line
//! - Metrics are cheap (atomic increments behind the facade)

pub mod logging;
pub mod metrics;
