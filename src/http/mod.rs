//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → RequestInfo snapshot → EndpointMapper::dispatch
//!     → candidate failover through the connection pool
//!     → request.rs (rewrite for the backend)
//!     → pooled HTTP/1 connection (pending table entry while in flight)
//!     → response.rs (strip hop-by-hop, stream body, map failures)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{request_id, UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
