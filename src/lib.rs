//! Rule-based HTTP reverse proxy library.
//!
//! Requests are matched against an ordered table of boolean expressions,
//! mapped through actions and directors to a backend, and forwarded over
//! per-endpoint pooled connections watched by a stuck-request reaper.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod mapper;
pub mod net;
pub mod observability;
pub mod pool;
pub mod routing;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{ProxyCore, Shutdown};
pub use mapper::{EndpointMapper, MapResult};
pub use pool::{ConnectionPool, EndpointKey, EndpointUnavailable};
pub use routing::{evaluate, MatchSyntaxError, RequestInfo};
