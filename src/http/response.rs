//! Response handling and transformation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Stream backend bodies while the connection stays borrowed
//! - Map routing and upstream failures to status codes
//!
//! # Status Mapping
//! - no route, deny action, every candidate unavailable → 404
//! - internal-error action → 500
//! - upstream I/O failure once a connection was bound → 502
//! - request declared stuck by the reaper → 504
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - The connection goes back to the pool only after the body ended cleanly

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};

use crate::pool::{BorrowedConnection, PendingGuard};

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including those named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

pub fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

pub fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
}

pub fn gateway_timeout() -> Response {
    (StatusCode::GATEWAY_TIMEOUT, "Upstream request appears stuck").into_response()
}

/// Wrap a backend response for the client, keeping the connection and the
/// pending-table entry alive until the body is done.
pub fn proxied(
    response: hyper::Response<Incoming>,
    connection: BorrowedConnection,
    pending: PendingGuard,
) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(ProxiedBody::new(body, connection, pending)))
}

/// A backend body that returns its connection to the pool at end of stream.
///
/// A body error or an early drop destroys the connection instead.
#[derive(Debug)]
pub struct ProxiedBody {
    inner: Incoming,
    lease: Option<(BorrowedConnection, PendingGuard)>,
}

impl ProxiedBody {
    pub fn new(inner: Incoming, connection: BorrowedConnection, pending: PendingGuard) -> Self {
        let mut body = Self {
            inner,
            lease: Some((connection, pending)),
        };
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }

    fn finish(&mut self) {
        if let Some((connection, _pending)) = self.lease.take() {
            connection.release();
        }
    }

    fn fail(&mut self, reason: &str) {
        if let Some((connection, _pending)) = self.lease.take() {
            connection.discard(reason);
        }
    }
}

impl HttpBody for ProxiedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "Upstream body failed");
                this.fail("body error");
            }
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ProxiedBody {
    fn drop(&mut self) {
        self.fail("client went away before the body ended");
    }
}
