//! Pooled connection state and creation.
//!
//! # State Machine
//! ```text
//! Created → Idle ⇄ Borrowed → (Idle | Destroyed)
//!              ↘ Validating ↗        (on every borrow and every return)
//! Borrowed → Abandoned → Destroyed   (borrower dropped without returning)
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::body::Body;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;

use crate::pool::EndpointKey;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a pooled connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Idle,
    Borrowed,
    Validating,
    Destroyed,
    Abandoned,
}

/// One outbound HTTP/1 connection owned by an endpoint sub-pool.
#[derive(Debug)]
pub struct PooledConnection {
    pub(crate) id: ConnectionId,
    pub(crate) key: EndpointKey,
    pub(crate) sender: http1::SendRequest<Body>,
    pub(crate) driver: JoinHandle<()>,
    pub(crate) created: Instant,
    pub(crate) last_used: Instant,
    pub(crate) state: ConnectionState,
}

impl PooledConnection {
    /// Open a TCP connection and complete the HTTP/1 handshake within `connect_timeout`.
    pub(crate) async fn connect(key: &EndpointKey, connect_timeout: Duration) -> io::Result<Self> {
        let handshake = async {
            let stream = TcpStream::connect((key.host(), key.port())).await?;
            stream.set_nodelay(true)?;
            http1::handshake::<_, Body>(TokioIo::new(stream))
                .await
                .map_err(io::Error::other)
        };

        let (sender, conn) = time::timeout(connect_timeout, handshake)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", connect_timeout),
                )
            })??;

        let id = ConnectionId::new();
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(connection = %id, error = %e, "Upstream connection ended with error");
            }
        });

        let now = Instant::now();
        tracing::debug!(connection = %id, endpoint = %key, "Opened upstream connection");
        Ok(Self {
            id,
            key: key.clone(),
            sender,
            driver,
            created: now,
            last_used: now,
            state: ConnectionState::Created,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Check the connection is still usable. Runs on borrow and on return.
    pub(crate) fn validate(&mut self, now: Instant, idle_timeout: Duration) -> Result<(), &'static str> {
        self.state = ConnectionState::Validating;
        if self.sender.is_closed() || self.driver.is_finished() {
            return Err("closed by peer");
        }
        if now.saturating_duration_since(self.last_used) > idle_timeout {
            return Err("idle timeout");
        }
        Ok(())
    }

    /// Terminate the connection task; the socket closes with it.
    pub(crate) fn close(&mut self, state: ConnectionState) {
        self.state = state;
        self.driver.abort();
    }
}
