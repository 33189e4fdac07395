//! S-expression front end: lexer, term tree and parser.
//!
//! Grammar:
//!
//! ```text
//! term := "(" symbol term* ")" | string | int | "#t" | "#f"
//! ```

pub mod lexer;

use std::fmt;

use self::lexer::{Spanned, Token};
use crate::error::{Result, SearchError};

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Bool(bool),
    Int(i64),
    String(String),
    /// Function application `(name args...)`.
    Call { name: String, args: Vec<Term> },
}

impl Term {
    pub fn call(name: &str, args: Vec<Term>) -> Self {
        Self::Call {
            name: name.to_string(),
            args,
        }
    }

    /// Function name for calls.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Call { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Parse expression text into a single term.
pub fn parse(text: &str) -> Result<Term> {
    let tokens = lexer::tokenize(text)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        end: text.len(),
    };
    let term = parser.parse_term()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(SearchError::Parse {
            offset: extra.offset,
            reason: "trailing input after expression".into(),
        });
    }
    Ok(term)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    end: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Result<&Spanned> {
        let tok = self.tokens.get(self.pos).ok_or_else(|| SearchError::Parse {
            offset: self.end,
            reason: "unexpected end of expression".into(),
        })?;
        self.pos += 1;
        Ok(tok)
    }

    fn parse_term(&mut self) -> Result<Term> {
        let tok = self.next()?;
        let offset = tok.offset;
        match &tok.token {
            Token::Bool(b) => Ok(Term::Bool(*b)),
            Token::Int(n) => Ok(Term::Int(*n)),
            Token::Str(s) => Ok(Term::String(s.clone())),
            Token::RParen => Err(SearchError::Parse {
                offset,
                reason: "unexpected ')'".into(),
            }),
            Token::Symbol(s) => Err(SearchError::Parse {
                offset,
                reason: format!("unexpected symbol '{s}' outside a list"),
            }),
            Token::LParen => {
                let head = self.next()?;
                let name = match &head.token {
                    Token::Symbol(s) => s.clone(),
                    _ => {
                        return Err(SearchError::Parse {
                            offset: head.offset,
                            reason: "expected a function name".into(),
                        })
                    }
                };
                let mut args = Vec::new();
                loop {
                    match self.tokens.get(self.pos) {
                        Some(Spanned {
                            token: Token::RParen,
                            ..
                        }) => {
                            self.pos += 1;
                            return Ok(Term::Call { name, args });
                        }
                        Some(_) => args.push(self.parse_term()?),
                        None => {
                            return Err(SearchError::Parse {
                                offset: self.end,
                                reason: format!("missing ')' for '{name}'"),
                            })
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("#t"),
            Self::Bool(false) => f.write_str("#f"),
            Self::Int(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Self::Call { name, args } => {
                write!(f, "({name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}
