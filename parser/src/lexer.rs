//! FILENAME: parser/src/lexer.rs
//! PURPOSE: Scans a raw formula string and produces a stream of Tokens.
//! CONTEXT: This is the first stage of the parsing pipeline. It handles
//! whitespace skipping, number parsing (with exponents), string literals
//! with doubled-quote escapes, error literals, quoted identifiers for sheet
//! names, and multi-character operators like <= and <>.
//!
//! Formulas stored in a package never carry the leading '=', but the
//! lexer still produces `Token::Equals` for it so user-entered text works.

use crate::token::Token;
use std::iter::Peekable;
use std::str::Chars;

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input: input.chars().peekable(),
        }
    }

    /// Advances the lexer and returns the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        match self.input.next() {
            Some('+') => Token::Plus,
            Some('-') => Token::Minus,
            Some('*') => Token::Asterisk,
            Some('/') => Token::Slash,
            Some('^') => Token::Caret,
            Some('&') => Token::Ampersand,
            Some('%') => Token::Percent,
            Some('(') => Token::LParen,
            Some(')') => Token::RParen,
            Some(',') => Token::Comma,
            Some(':') => Token::Colon,
            Some('!') => Token::Exclamation,
            Some('=') => Token::Equals,
            Some('<') => self.read_less_than_operator(),
            Some('>') => self.read_greater_than_operator(),
            Some('"') => self.read_string(),
            Some('\'') => self.read_quoted_identifier(),
            Some('#') => self.read_error_literal(),
            Some(ch) if ch.is_ascii_digit() || ch == '.' => self.read_number(ch),
            Some(ch) if is_identifier_start(ch) => self.read_identifier(ch),
            None => Token::EOF,
            Some(ch) => Token::Illegal(ch),
        }
    }

    /// Collects every remaining token, including the trailing EOF.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token == Token::EOF;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&ch) = self.input.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.input.next();
        }
    }

    fn read_less_than_operator(&mut self) -> Token {
        match self.input.peek() {
            Some('=') => {
                self.input.next();
                Token::LessEqual
            }
            Some('>') => {
                self.input.next();
                Token::NotEqual
            }
            _ => Token::LessThan,
        }
    }

    fn read_greater_than_operator(&mut self) -> Token {
        match self.input.peek() {
            Some('=') => {
                self.input.next();
                Token::GreaterEqual
            }
            _ => Token::GreaterThan,
        }
    }

    /// Reads a double-quoted string; `""` inside the literal is one quote.
    fn read_string(&mut self) -> Token {
        let mut result = String::new();
        while let Some(ch) = self.input.next() {
            if ch == '"' {
                if self.input.peek() == Some(&'"') {
                    self.input.next();
                    result.push('"');
                    continue;
                }
                return Token::String(result);
            }
            result.push(ch);
        }
        // Unterminated literal: keep what we have.
        Token::String(result)
    }

    /// Reads a quoted identifier (sheet name with spaces): 'Sheet Name'
    fn read_quoted_identifier(&mut self) -> Token {
        let mut result = String::new();
        while let Some(ch) = self.input.next() {
            if ch == '\'' {
                if self.input.peek() == Some(&'\'') {
                    result.push('\'');
                    self.input.next();
                } else {
                    return Token::QuotedIdentifier(result);
                }
            } else {
                result.push(ch);
            }
        }
        Token::QuotedIdentifier(result)
    }

    /// Reads an error literal after '#': `#N/A`, `#DIV/0!`, `#NAME?` ...
    fn read_error_literal(&mut self) -> Token {
        let mut literal = String::from("#");
        while let Some(&ch) = self.input.peek() {
            if ch.is_ascii_alphanumeric() || ch == '/' || ch == '_' {
                literal.push(ch.to_ascii_uppercase());
                self.input.next();
            } else if ch == '!' || ch == '?' {
                literal.push(ch);
                self.input.next();
                break;
            } else {
                break;
            }
        }
        if literal.len() == 1 {
            Token::Illegal('#')
        } else {
            Token::Error(literal)
        }
    }

    fn read_number(&mut self, first_char: char) -> Token {
        let mut number_str = String::from(first_char);
        let mut has_dot = first_char == '.';
        let mut has_exponent = false;

        while let Some(&ch) = self.input.peek() {
            if ch.is_ascii_digit() {
                number_str.push(ch);
                self.input.next();
            } else if ch == '.' && !has_dot && !has_exponent {
                has_dot = true;
                number_str.push(ch);
                self.input.next();
            } else if (ch == 'e' || ch == 'E') && !has_exponent {
                // Only an exponent when digits (optionally signed) follow.
                let mut lookahead = self.input.clone();
                lookahead.next();
                let signed = matches!(lookahead.peek(), Some('+') | Some('-'));
                if signed {
                    lookahead.next();
                }
                if !matches!(lookahead.peek(), Some(d) if d.is_ascii_digit()) {
                    break;
                }
                has_exponent = true;
                number_str.push('E');
                self.input.next();
                if signed {
                    if let Some(sign) = self.input.next() {
                        number_str.push(sign);
                    }
                }
            } else {
                break;
            }
        }

        match number_str.parse::<f64>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Illegal(first_char),
        }
    }

    fn read_identifier(&mut self, first_char: char) -> Token {
        let mut ident = String::from(first_char);

        while let Some(&ch) = self.input.peek() {
            if is_identifier_start(ch) || ch.is_ascii_digit() || ch == '.' {
                ident.push(ch);
                self.input.next();
            } else {
                break;
            }
        }

        match ident.to_uppercase().as_str() {
            "TRUE" => Token::Boolean(true),
            "FALSE" => Token::Boolean(false),
            _ => Token::Identifier(ident.to_uppercase()),
        }
    }
}

/// Returns true if `ch` can start an identifier.
/// Supports ASCII letters, underscore (`_xlfn.` prefixes), backslash
/// (`\TaxRate` style names) and `$` anchors.
fn is_identifier_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '\\' || ch == '$'
}
