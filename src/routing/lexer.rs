//! Tokenizer for match expressions.
//!
//! # Tokens
//! - Operators: `not`/`!`, `and`/`&`/`&&`, `or`/`|`/`||`, `(`, `)`
//! - Keywords: any other bare word (`all`, `https`, ...), case-insensitive
//! - Regular expressions: `regexp "..."`, `regexp '...'`, or a bare literal
//!   starting with `/` that runs until whitespace or an unbalanced `)`
//!
//! Each token remembers its byte offset so syntax errors can point at it.

use std::fmt;

use crate::routing::MatchSyntaxError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Not,
    And,
    Or,
    OpenParen,
    CloseParen,
    /// A bare keyword, lowercased.
    Word(String),
    /// A regular expression literal, without delimiters.
    Regex(String),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Not => write!(f, "'not'"),
            TokenKind::And => write!(f, "'and'"),
            TokenKind::Or => write!(f, "'or'"),
            TokenKind::OpenParen => write!(f, "'('"),
            TokenKind::CloseParen => write!(f, "')'"),
            TokenKind::Word(w) => write!(f, "'{}'", w),
            TokenKind::Regex(r) => write!(f, "regexp \"{}\"", r),
            TokenKind::Eof => write!(f, "end of expression"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the source text.
    pub offset: usize,
}

/// Split an expression into tokens, terminated by `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, MatchSyntaxError> {
    let mut lexer = Lexer {
        src: input,
        pos: 0,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Result<Token, MatchSyntaxError> {
        self.skip_whitespace();
        let offset = self.pos;
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some('(') => {
                self.bump();
                TokenKind::OpenParen
            }
            Some(')') => {
                self.bump();
                TokenKind::CloseParen
            }
            Some('!') => {
                self.bump();
                TokenKind::Not
            }
            Some('&') => {
                self.bump();
                if self.peek() == Some('&') {
                    self.bump();
                }
                TokenKind::And
            }
            Some('|') => {
                self.bump();
                if self.peek() == Some('|') {
                    self.bump();
                }
                TokenKind::Or
            }
            Some('/') => TokenKind::Regex(self.bare_regex()),
            Some(c) if c.is_ascii_alphabetic() => {
                let word = self.word().to_ascii_lowercase();
                match word.as_str() {
                    "not" => TokenKind::Not,
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "regexp" => {
                        self.skip_whitespace();
                        TokenKind::Regex(self.quoted(offset)?)
                    }
                    _ => TokenKind::Word(word),
                }
            }
            Some(c) => {
                return Err(MatchSyntaxError::new(
                    offset,
                    "an operator, keyword or regular expression",
                    format!("'{}'", c),
                ));
            }
        };
        Ok(Token { kind, offset })
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    /// Bare literal: stops at whitespace or at a `)` that closes a group
    /// opened outside the literal.
    fn bare_regex(&mut self) -> String {
        let start = self.pos;
        let mut depth = 0usize;
        let mut escaped = false;
        while let Some(c) = self.peek() {
            if escaped {
                escaped = false;
            } else if c.is_whitespace() {
                break;
            } else if c == '\\' {
                escaped = true;
            } else if c == '(' {
                depth += 1;
            } else if c == ')' {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn quoted(&mut self, keyword_offset: usize) -> Result<String, MatchSyntaxError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            Some(c) => {
                return Err(MatchSyntaxError::new(
                    self.pos,
                    "a quoted regular expression after 'regexp'",
                    format!("'{}'", c),
                ))
            }
            None => {
                return Err(MatchSyntaxError::new(
                    self.pos,
                    "a quoted regular expression after 'regexp'",
                    TokenKind::Eof.to_string(),
                ))
            }
        };
        self.bump();
        let start = self.pos;
        while let Some(c) = self.bump() {
            if c == quote {
                return Ok(self.src[start..self.pos - c.len_utf8()].to_string());
            }
        }
        Err(MatchSyntaxError::new(
            keyword_offset,
            "closing quote of the regular expression",
            TokenKind::Eof.to_string(),
        ))
    }
}
