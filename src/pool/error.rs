//! Pool error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::pool::EndpointKey;

/// No connection could be borrowed for an endpoint.
///
/// Raised at request time; the caller fails over to the next candidate.
#[derive(Debug, Error)]
pub enum EndpointUnavailable {
    #[error("connection pool for {key} exhausted, waited {waited:?}")]
    Exhausted { key: EndpointKey, waited: Duration },

    #[error("cannot connect to {key}: {source}")]
    ConnectFailed {
        key: EndpointKey,
        #[source]
        source: io::Error,
    },

    #[error("interrupted while waiting for a connection to {key}")]
    Interrupted { key: EndpointKey },
}

impl EndpointUnavailable {
    pub fn key(&self) -> &EndpointKey {
        match self {
            Self::Exhausted { key, .. } | Self::ConnectFailed { key, .. } | Self::Interrupted { key } => key,
        }
    }
}

/// Raised by the reaper for an in-flight request that outlived the stuck threshold.
#[derive(Debug, Clone, Error)]
#[error("a request to {uri} for user {principal} appears stuck after {age:?}")]
pub struct StuckRequestDetected {
    pub request_id: u64,
    pub uri: String,
    pub principal: String,
    /// Endpoint of the bound connection; `None` while still waiting for one.
    pub endpoint: Option<EndpointKey>,
    pub age: Duration,
}

/// Failure while exchanging a request over a borrowed connection.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("connection closed before the request was sent: {0}")]
    Closed(hyper::Error),

    #[error("connection already returned to the pool")]
    Released,
}
