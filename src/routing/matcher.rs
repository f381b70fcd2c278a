//! Compiled match conditions.
//!
//! # Responsibilities
//! - Leaf predicates (`all`, `https`, path regular expressions)
//! - Boolean tree combining leaves with not/and/or
//! - Canonical text rendering of a compiled tree
//!
//! # Design Decisions
//! - Trees are immutable after compilation and shared freely across workers
//! - Both operands of and/or are always evaluated; predicates are pure
//! - Path regular expressions are anchored: the whole path must match
//! - New leaf kinds implement [`Matcher`] and register a keyword in
//!   [`keyword_matcher`]; the grammar does not change

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::routing::request::RequestInfo;

/// Trait for leaf predicates evaluated against a request.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Returns true if the request satisfies this predicate.
    fn matches(&self, req: &RequestInfo) -> bool;

    /// Canonical source text of the predicate.
    fn source(&self) -> String;
}

/// Always matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl Matcher for MatchAll {
    fn matches(&self, _req: &RequestInfo) -> bool {
        true
    }

    fn source(&self) -> String {
        "all".to_string()
    }
}

/// Matches requests forwarded as HTTPS.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpsMatcher;

impl Matcher for HttpsMatcher {
    fn matches(&self, req: &RequestInfo) -> bool {
        req.is_forwarded_https()
    }

    fn source(&self) -> String {
        "https".to_string()
    }
}

/// Matches the request path against a regular expression (full match).
#[derive(Debug, Clone)]
pub struct PathRegexMatcher {
    pattern: String,
    regex: Regex,
}

impl PathRegexMatcher {
    /// Compile a path matcher. The pattern is anchored at both ends.
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self { pattern, regex })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Matcher for PathRegexMatcher {
    fn matches(&self, req: &RequestInfo) -> bool {
        self.regex.is_match(req.path())
    }

    fn source(&self) -> String {
        if is_bare_safe(&self.pattern) {
            self.pattern.clone()
        } else if !self.pattern.contains('"') {
            format!("regexp \"{}\"", self.pattern)
        } else {
            format!("regexp '{}'", self.pattern)
        }
    }
}

/// A pattern can be written without `regexp` quoting if the lexer would
/// read it back as one token.
fn is_bare_safe(pattern: &str) -> bool {
    if !pattern.starts_with('/') || pattern.chars().any(char::is_whitespace) {
        return false;
    }
    let mut depth = 0i32;
    let mut escaped = false;
    for c in pattern.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    !escaped
}

/// Resolve a bare keyword to its predicate.
pub fn keyword_matcher(word: &str) -> Option<Arc<dyn Matcher>> {
    match word {
        "all" => Some(Arc::new(MatchAll)),
        "https" => Some(Arc::new(HttpsMatcher)),
        _ => None,
    }
}

/// Keywords accepted by [`keyword_matcher`], for error messages.
pub const KEYWORDS: &[&str] = &["all", "https"];

/// A compiled boolean condition.
#[derive(Debug, Clone)]
pub enum Condition {
    Leaf(Arc<dyn Matcher>),
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    /// Condition matching every request.
    pub fn all() -> Self {
        Condition::Leaf(Arc::new(MatchAll))
    }

    /// Evaluate the condition against a request.
    pub fn evaluate(&self, req: &RequestInfo) -> bool {
        match self {
            Condition::Leaf(m) => m.matches(req),
            Condition::Not(inner) => !inner.evaluate(req),
            // Non-short-circuiting on purpose: every operand is visited.
            Condition::And(terms) => terms.iter().fold(true, |acc, t| acc & t.evaluate(req)),
            Condition::Or(terms) => terms.iter().fold(false, |acc, t| acc | t.evaluate(req)),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Condition::Or(_) => 1,
            Condition::And(_) => 2,
            Condition::Not(_) | Condition::Leaf(_) => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        if self.precedence() < parent {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Leaf(m) => write!(f, "{}", m.source()),
            Condition::Not(inner) => {
                write!(f, "not ")?;
                inner.fmt_operand(f, 3)
            }
            Condition::And(terms) | Condition::Or(terms) => {
                let (op, prec) = match self {
                    Condition::And(_) => (" and ", 2),
                    _ => (" or ", 1),
                };
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(op)?;
                    }
                    // Same-precedence operands on the right keep their
                    // grouping so the rendered tree has the same shape.
                    let min = if i > 0 { prec + 1 } else { prec };
                    term.fmt_operand(f, min)?;
                }
                Ok(())
            }
        }
    }
}
