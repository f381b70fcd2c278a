//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! [[certificates]] configuration
//!     → tls.rs (PEM decoded, hostnames normalised)
//!     → CertificateStore
//!     → lookup(hostname) by whoever terminates TLS
//! ```
//!
//! # Design Decisions
//! - The proxy core never terminates TLS itself; it only answers which
//!   certificate belongs to a hostname
//! - The store is rebuilt on reload, never mutated in place

pub mod tls;

pub use tls::{CertificateError, CertificateStore, SslCertificate};
