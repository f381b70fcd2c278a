//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → health registry → mapping table → pool → ProxyCore
//!
//! Reload (startup.rs):
//!     New config → validate + load certificates → mapper.reload
//!         → pool.apply_settings → retire unused endpoints → certificates
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → stop accepting → pool closed → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, close pool, exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{Signal, Signals};
pub use startup::{ProxyCore, ReloadError, StartupError};
