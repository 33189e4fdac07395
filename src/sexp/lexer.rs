//! Tokenizer for the expression language.
//!
//! Atoms are double- or single-quoted strings with backslash escapes,
//! optionally negative integers, `#t` / `#f`, and bare symbols (function
//! names such as `header-contains`, `=`, `+`).

use crate::error::{Result, SearchError};

/// One lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    Symbol(String),
    Str(String),
    Int(i64),
    Bool(bool),
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.input[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<String> {
        let start = self.position;
        self.advance();
        let mut result = String::new();
        loop {
            match self.advance() {
                Some(ch) if ch == quote => return Ok(result),
                Some('\\') => match self.advance() {
                    Some('n') => result.push('\n'),
                    Some('t') => result.push('\t'),
                    Some('r') => result.push('\r'),
                    Some(c) => result.push(c),
                    None => break,
                },
                Some(ch) => result.push(ch),
                None => break,
            }
        }
        Err(SearchError::Parse {
            offset: start,
            reason: "unterminated string".into(),
        })
    }

    fn read_number(&mut self) -> Result<i64> {
        let start = self.position;
        if self.peek() == Some('-') {
            self.advance();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let text = &self.input[start..self.position];
        text.parse().map_err(|_| SearchError::Parse {
            offset: start,
            reason: format!("invalid integer '{text}'"),
        })
    }

    fn read_symbol(&mut self) -> String {
        let start = self.position;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | '\'') {
                break;
            }
            self.advance();
        }
        self.input[start..self.position].to_string()
    }

    /// Next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<Spanned>> {
        self.skip_whitespace();
        let offset = self.position;
        let Some(ch) = self.peek() else {
            return Ok(None);
        };

        let token = match ch {
            '(' => {
                self.advance();
                Token::LParen
            }
            ')' => {
                self.advance();
                Token::RParen
            }
            '"' | '\'' => Token::Str(self.read_string(ch)?),
            '#' => {
                self.advance();
                match self.read_symbol().as_str() {
                    "t" => Token::Bool(true),
                    "f" => Token::Bool(false),
                    other => {
                        return Err(SearchError::Parse {
                            offset,
                            reason: format!("invalid boolean '#{other}'"),
                        })
                    }
                }
            }
            c if c.is_ascii_digit() => Token::Int(self.read_number()?),
            '-' if self.peek_next().is_some_and(|c| c.is_ascii_digit()) => {
                Token::Int(self.read_number()?)
            }
            _ => Token::Symbol(self.read_symbol()),
        };
        Ok(Some(Spanned { token, offset }))
    }
}

/// Tokenize a whole expression.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Lexer::new(input);
    let mut out = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        out.push(tok);
    }
    Ok(out)
}
