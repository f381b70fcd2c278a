//! Pool partition key.

use std::fmt;

/// A `(host, port)` pair identifying a poolable backend resource.
///
/// Equality and hashing are structural over host and port only, so two
/// backends declared with the same address share one sub-pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    host: String,
    port: u16,
}

impl EndpointKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for connecting and for metric labels.
    pub fn host_port(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_identity() {
        let mut keys = HashSet::new();
        keys.insert(EndpointKey::new("10.0.0.1", 8080));
        keys.insert(EndpointKey::new(String::from("10.0.0.1"), 8080));
        keys.insert(EndpointKey::new("10.0.0.1", 8081));
        assert_eq!(keys.len(), 2);
        assert_eq!(EndpointKey::new("backend", 80).host_port(), "backend:80");
    }
}
