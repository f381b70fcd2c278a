//! Compiled mapping table.
//!
//! Built in one pass from a [`ProxyConfig`]: rules compiled, backends,
//! directors and actions indexed. Every problem found is collected, so one
//! rejected load reports all of them. Once built the table is immutable and
//! is swapped in whole.

use std::collections::{HashMap, HashSet};

use crate::config::{ConfigurationNotValid, ProxyConfig};
use crate::load_balancer::BackendDescriptor;
use crate::mapper::action::{builtin_actions, ActionDefinition, ALL_BACKENDS};
use crate::routing::{compile, RoutingRule, RuleTable};

#[derive(Debug, Default)]
pub struct MappingTable {
    rules: RuleTable,
    backends: HashMap<String, BackendDescriptor>,
    /// Backend ids in configuration order.
    backend_order: Vec<String>,
    actions: HashMap<String, ActionDefinition>,
    directors: HashMap<String, Vec<String>>,
}

impl MappingTable {
    /// Compile `config` into a table, or report every reason it cannot be.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigurationNotValid> {
        let mut errors = Vec::new();

        let mut backends = HashMap::new();
        let mut backend_order = Vec::new();
        for backend in &config.backends {
            if backends.contains_key(&backend.id) {
                errors.push(format!("backend '{}' is already defined", backend.id));
                continue;
            }
            backend_order.push(backend.id.clone());
            backends.insert(backend.id.clone(), BackendDescriptor::from(backend));
        }

        let mut directors = HashMap::new();
        for director in &config.directors {
            if director.id == ALL_BACKENDS {
                errors.push(format!("director id '{}' is reserved", ALL_BACKENDS));
                continue;
            }
            if directors.contains_key(&director.id) {
                errors.push(format!("director '{}' is already defined", director.id));
                continue;
            }
            for member in &director.backends {
                if !backends.contains_key(member) {
                    errors.push(format!(
                        "director '{}' references unknown backend '{}'",
                        director.id, member
                    ));
                }
            }
            directors.insert(director.id.clone(), director.backends.clone());
        }

        let mut actions: HashMap<String, ActionDefinition> = builtin_actions()
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        for action in &config.actions {
            if actions.contains_key(&action.id) {
                errors.push(format!("action '{}' is already defined", action.id));
                continue;
            }
            let Some(definition) = ActionDefinition::from_config(action) else {
                errors.push(format!(
                    "action '{}' has unknown type '{}'",
                    action.id, action.kind
                ));
                continue;
            };
            if let Some(director) = definition.action.director() {
                if director != ALL_BACKENDS && !directors.contains_key(director) {
                    errors.push(format!(
                        "action '{}' references unknown director '{}'",
                        action.id, director
                    ));
                }
            }
            actions.insert(action.id.clone(), definition);
        }

        let mut route_ids = HashSet::new();
        let mut rules = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            if !route_ids.insert(route.id.to_lowercase()) {
                errors.push(format!("route '{}' is already defined", route.id));
                continue;
            }
            match compile(&route.match_expr) {
                Ok(condition) => rules.push(RoutingRule::new(
                    route.id.clone(),
                    route.enabled,
                    condition,
                    route.action.clone(),
                )),
                Err(e) => errors.push(format!(
                    "route '{}': invalid match expression '{}' {}",
                    route.id, route.match_expr, e
                )),
            }
        }

        if !errors.is_empty() {
            return Err(ConfigurationNotValid::new(errors));
        }

        Ok(Self {
            rules: RuleTable::new(rules),
            backends,
            backend_order,
            actions,
            directors,
        })
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn action(&self, id: &str) -> Option<&ActionDefinition> {
        self.actions.get(id)
    }

    pub fn backend(&self, id: &str) -> Option<&BackendDescriptor> {
        self.backends.get(id)
    }

    /// Every registered backend, in configuration order.
    pub fn backends(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.backend_order
            .iter()
            .filter_map(|id| self.backends.get(id))
    }

    /// Enabled backend ids a director draws from, in configuration order.
    pub fn director_backends(&self, director: &str) -> Vec<String> {
        let enabled = |id: &&String| self.backends.get(*id).is_some_and(|b| b.enabled);
        if director == ALL_BACKENDS {
            return self.backend_order.iter().filter(enabled).cloned().collect();
        }
        self.directors
            .get(director)
            .map(|members| members.iter().filter(enabled).cloned().collect())
            .unwrap_or_default()
    }
}
