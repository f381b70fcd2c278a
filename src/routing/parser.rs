//! Recursive-descent parser for match expressions.
//!
//! # Grammar (precedence low → high)
//! ```text
//! expression := term (OR term)*
//! term       := factor (AND factor)*
//! factor     := NOT factor | '(' expression ')' | value
//! value      := keyword | regexp
//! ```
//!
//! A fresh [`Parser`] is built for every compilation; it owns its cursor and
//! nothing is shared between concurrent compilations.

use crate::routing::lexer::{tokenize, Token, TokenKind};
use crate::routing::matcher::{keyword_matcher, Condition, PathRegexMatcher, KEYWORDS};
use crate::routing::MatchSyntaxError;
use std::sync::Arc;

/// Compile condition text into an immutable condition tree.
pub fn compile(text: &str) -> Result<Condition, MatchSyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let condition = parser.expression()?;
    parser.expect_end()?;
    Ok(condition)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, expected: &str) -> MatchSyntaxError {
        let token = self.peek();
        MatchSyntaxError::new(token.offset, expected, token.kind.to_string())
    }

    fn expression(&mut self) -> Result<Condition, MatchSyntaxError> {
        let mut terms = vec![self.term()?];
        while self.peek().kind == TokenKind::Or {
            self.advance();
            terms.push(self.term()?);
        }
        Ok(collapse(terms, Condition::Or))
    }

    fn term(&mut self) -> Result<Condition, MatchSyntaxError> {
        let mut factors = vec![self.factor()?];
        while self.peek().kind == TokenKind::And {
            self.advance();
            factors.push(self.factor()?);
        }
        Ok(collapse(factors, Condition::And))
    }

    fn factor(&mut self) -> Result<Condition, MatchSyntaxError> {
        match self.peek().kind {
            TokenKind::Not => {
                self.advance();
                Ok(Condition::Not(Box::new(self.factor()?)))
            }
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.expression()?;
                if self.peek().kind != TokenKind::CloseParen {
                    return Err(self.error("closing parenthesis"));
                }
                self.advance();
                Ok(inner)
            }
            _ => self.value(),
        }
    }

    fn value(&mut self) -> Result<Condition, MatchSyntaxError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Word(ref word) => match keyword_matcher(word) {
                Some(matcher) => {
                    self.advance();
                    Ok(Condition::Leaf(matcher))
                }
                None => Err(self.error(&format!(
                    "one of {}, a regular expression, 'not' or '('",
                    KEYWORDS.join(", ")
                ))),
            },
            TokenKind::Regex(ref pattern) => {
                let matcher = PathRegexMatcher::new(pattern.as_str()).map_err(|e| {
                    MatchSyntaxError::new(
                        token.offset,
                        "a valid regular expression",
                        format!("{} ({})", token.kind, error_summary(&e.to_string())),
                    )
                })?;
                self.advance();
                Ok(Condition::Leaf(Arc::new(matcher)))
            }
            _ => Err(self.error(&format!(
                "one of {}, a regular expression, 'not' or '('",
                KEYWORDS.join(", ")
            ))),
        }
    }

    fn expect_end(&self) -> Result<(), MatchSyntaxError> {
        match self.peek().kind {
            TokenKind::Eof => Ok(()),
            TokenKind::CloseParen => Err(self.error("end of expression (unbalanced parenthesis)")),
            _ => Err(self.error("'and', 'or' or end of expression")),
        }
    }
}

fn collapse(mut items: Vec<Condition>, wrap: fn(Vec<Condition>) -> Condition) -> Condition {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

fn error_summary(message: &str) -> &str {
    message.lines().last().unwrap_or(message).trim()
}
