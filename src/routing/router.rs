//! Ordered rule table.
//!
//! # Responsibilities
//! - Store compiled routing rules in declaration order
//! - Look up the first enabled rule matching a request
//! - Return the matched rule or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in declaration order; table order is significant
//! - Explicit `None` rather than a silent default route

use crate::routing::matcher::Condition;
use crate::routing::request::RequestInfo;

/// A compiled routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    id: String,
    enabled: bool,
    condition: Condition,
    action: String,
    order: usize,
}

impl RoutingRule {
    pub fn new(
        id: impl Into<String>,
        enabled: bool,
        condition: Condition,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            enabled,
            condition,
            action: action.into(),
            order: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Identifier of the action this rule resolves to.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Position in the declaring configuration.
    pub fn order(&self) -> usize {
        self.order
    }

    /// True if the rule is enabled and its condition holds.
    pub fn applies_to(&self, req: &RequestInfo) -> bool {
        self.enabled && self.condition.evaluate(req)
    }
}

/// Rules in declaration order; the first enabled match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RoutingRule>,
}

impl RuleTable {
    /// Build a table, stamping each rule with its declaration order.
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        let rules = rules
            .into_iter()
            .enumerate()
            .map(|(order, mut rule)| {
                rule.order = order;
                rule
            })
            .collect();
        Self { rules }
    }

    /// Find the first enabled rule whose condition matches.
    pub fn match_request(&self, req: &RequestInfo) -> Option<&RoutingRule> {
        self.rules.iter().find(|rule| rule.applies_to(req))
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
