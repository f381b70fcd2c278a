//! Action vocabulary.
//!
//! An action is what a matched rule asks the proxy to do. Dispatch is an
//! exhaustive match over [`Action`]; parameters travel alongside untouched.

use std::collections::BTreeMap;

use crate::config::ActionConfig;

/// Director id meaning "every registered, enabled backend".
pub const ALL_BACKENDS: &str = "*";

pub const PROXY_ALL: &str = "proxy-all";
pub const CACHE_IF_POSSIBLE: &str = "cache-if-possible";
pub const NOT_FOUND: &str = "not-found";
pub const INTERNAL_ERROR: &str = "internal-error";

/// Configured `type` values.
pub const KIND_PROXY: &str = "proxy";
pub const KIND_CACHE: &str = "cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Forward to a backend of the director.
    Proxy { director: String },
    /// Forward, allowing the response to be served from cache.
    CacheProxy { director: String },
    /// Answer "not found" without contacting a backend.
    Deny,
    /// Answer with an internal server error.
    InternalError,
}

impl Action {
    /// Interpret a configured action type. `None` for an unknown type.
    pub fn parse(kind: &str, director: &str) -> Option<Self> {
        match kind {
            KIND_PROXY => Some(Self::Proxy {
                director: director.to_string(),
            }),
            KIND_CACHE => Some(Self::CacheProxy {
                director: director.to_string(),
            }),
            NOT_FOUND => Some(Self::Deny),
            INTERNAL_ERROR => Some(Self::InternalError),
            _ => None,
        }
    }

    /// The director proxy actions draw candidates from.
    pub fn director(&self) -> Option<&str> {
        match self {
            Self::Proxy { director } | Self::CacheProxy { director } => Some(director),
            Self::Deny | Self::InternalError => None,
        }
    }
}

/// An action registered under an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDefinition {
    pub id: String,
    pub action: Action,
    pub params: BTreeMap<String, String>,
}

impl ActionDefinition {
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            action,
            params: BTreeMap::new(),
        }
    }

    /// Build from configuration. `None` for an unknown action type.
    pub fn from_config(config: &ActionConfig) -> Option<Self> {
        let action = Action::parse(&config.kind, &config.director)?;
        Some(Self {
            id: config.id.clone(),
            action,
            params: config.params.clone(),
        })
    }
}

/// Actions every mapping table registers before configured ones.
pub fn builtin_actions() -> Vec<ActionDefinition> {
    vec![
        ActionDefinition::new(
            PROXY_ALL,
            Action::Proxy {
                director: ALL_BACKENDS.to_string(),
            },
        ),
        ActionDefinition::new(
            CACHE_IF_POSSIBLE,
            Action::CacheProxy {
                director: ALL_BACKENDS.to_string(),
            },
        ),
        ActionDefinition::new(NOT_FOUND, Action::Deny),
        ActionDefinition::new(INTERNAL_ERROR, Action::InternalError),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(
            Action::parse("proxy", "d1"),
            Some(Action::Proxy {
                director: "d1".into()
            })
        );
        assert_eq!(Action::parse("not-found", "*"), Some(Action::Deny));
        assert_eq!(Action::parse("internal-error", "*"), Some(Action::InternalError));
        assert_eq!(Action::parse("redirect", "*"), None);
        assert_eq!(Action::Deny.director(), None);
        assert_eq!(Action::parse("cache", "*").unwrap().director(), Some("*"));
    }

    #[test]
    fn test_builtins() {
        let ids: Vec<_> = builtin_actions().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, [PROXY_ALL, CACHE_IF_POSSIBLE, NOT_FOUND, INTERNAL_ERROR]);
    }
}
