//! Routing-relevant request metadata.
//!
//! # Responsibilities
//! - Capture the parts of a request that matchers and selectors look at
//! - Detect the forwarded protocol (`x-forwarded-proto`)
//! - Extract the principal (basic-auth user) for diagnostics
//!
//! # Design Decisions
//! - Owned snapshot: matching never borrows the live request body
//! - Header comparison for the forwarded protocol is exact (`https`)

use axum::http::{request::Parts, HeaderMap, HeaderValue, Method, Request};
use base64::Engine;

/// Header carrying the protocol the client originally used.
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Protocol value identifying a request forwarded as HTTPS.
pub const PROTO_HTTPS: &str = "https";

/// Immutable request metadata consumed by the routing engine.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
}

impl RequestInfo {
    /// Build metadata from a method, path and headers.
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers,
        }
    }

    /// Shorthand for a GET request on `path` without headers.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, HeaderMap::new())
    }

    /// Snapshot the routing metadata of a full request.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            query: req.uri().query().map(str::to_string),
            headers: req.headers().clone(),
        }
    }

    /// Snapshot the routing metadata of request parts.
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
        }
    }

    /// Attach a header, replacing any previous value.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Path plus query, as it appeared on the request line.
    pub fn target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// True if a fronting proxy declared the original protocol as HTTPS.
    pub fn is_forwarded_https(&self) -> bool {
        self.headers
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == PROTO_HTTPS)
            .unwrap_or(false)
    }

    /// Basic-auth user name, used as the principal in diagnostics.
    pub fn principal(&self) -> Option<String> {
        let value = self
            .headers
            .get(axum::http::header::AUTHORIZATION)?
            .to_str()
            .ok()?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let user = text.split(':').next()?;
        if user.is_empty() {
            None
        } else {
            Some(user.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_https() {
        let plain = RequestInfo::get("/index.html");
        assert!(!plain.is_forwarded_https());

        let tls = RequestInfo::get("/index.html").with_header(X_FORWARDED_PROTO, "https");
        assert!(tls.is_forwarded_https());

        // exact comparison
        let upper = RequestInfo::get("/").with_header(X_FORWARDED_PROTO, "HTTPS");
        assert!(!upper.is_forwarded_https());
    }

    #[test]
    fn test_from_request_splits_query() {
        let req = Request::builder()
            .uri("http://example.com/search?q=rust")
            .body(())
            .unwrap();
        let info = RequestInfo::from_request(&req);
        assert_eq!(info.path(), "/search");
        assert_eq!(info.query(), Some("q=rust"));
        assert_eq!(info.target(), "/search?q=rust");
    }

    #[test]
    fn test_principal_from_basic_auth() {
        // "alice:secret"
        let info = RequestInfo::get("/").with_header("authorization", "Basic YWxpY2U6c2VjcmV0");
        assert_eq!(info.principal().as_deref(), Some("alice"));

        let bearer = RequestInfo::get("/").with_header("authorization", "Bearer abc");
        assert_eq!(bearer.principal(), None);

        let garbled = RequestInfo::get("/").with_header("authorization", "Basic ***");
        assert_eq!(garbled.principal(), None);

        // ":nobody" has no user part
        let anonymous = RequestInfo::get("/").with_header("authorization", "Basic Om5vYm9keQ==");
        assert_eq!(anonymous.principal(), None);
    }
}
