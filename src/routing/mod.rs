//! Routing subsystem: the request matching expression engine.
//!
//! # Data Flow
//! ```text
//! Rule compilation (at configuration load):
//!     match text
//!     → lexer.rs (tokens with offsets)
//!     → parser.rs (recursive descent, fresh parser per call)
//!     → matcher.rs (immutable Condition tree)
//!     → router.rs (RuleTable in declaration order)
//!
//! Incoming request:
//!     → request.rs (RequestInfo snapshot: method, path, headers)
//!     → router.rs (first enabled rule whose Condition evaluates true)
//!     → Return: matched RoutingRule or no match
//! ```
//!
//! # Design Decisions
//! - Conditions compiled once, evaluated per request without re-parsing
//! - Deterministic: same request and condition always give the same answer
//! - Malformed expressions fail configuration loading, never requests

pub mod lexer;
pub mod matcher;
pub mod parser;
pub mod request;
pub mod router;

pub use matcher::{Condition, Matcher};
pub use parser::compile;
pub use request::RequestInfo;
pub use router::{RoutingRule, RuleTable};

/// A condition that is not a well-formed match expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("at position {offset}: expected {expected}, found {found}")]
pub struct MatchSyntaxError {
    /// Byte offset of the offending token.
    pub offset: usize,
    /// Human-readable description of what the grammar expected.
    pub expected: String,
    /// The token actually found.
    pub found: String,
}

impl MatchSyntaxError {
    pub fn new(offset: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            offset,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// One-shot evaluation: compile `condition` and test it against `req`.
pub fn evaluate(req: &RequestInfo, condition: &str) -> Result<bool, MatchSyntaxError> {
    Ok(compile(condition)?.evaluate(req))
}
