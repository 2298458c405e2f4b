//! FILENAME: parser/src/parser.rs
//! PURPOSE: Recursive descent parser that converts a stream of Tokens into an AST.
//! CONTEXT: This is the second stage of the parsing pipeline. It takes tokens
//! from the Lexer and builds an Expression tree that can be evaluated.
//!
//! GRAMMAR:
//!   expression     --> comparison
//!   comparison     --> concatenation ( ("=" | "<>" | "<" | ">" | "<=" | ">=") concatenation )*
//!   concatenation  --> additive ( "&" additive )*
//!   additive       --> multiplicative ( ("+" | "-") multiplicative )*
//!   multiplicative --> power ( ("*" | "/") power )*
//!   power          --> percent ( "^" percent )*
//!   percent        --> unary ( "%" )*
//!   unary          --> ("-" | "+") unary | primary
//!   primary        --> NUMBER | STRING | BOOLEAN | ERROR | reference | function_call | "(" expression ")"
//!   reference      --> [sheet_prefix] (cell | cell ":" cell | col ":" col | row ":" row)
//!   sheet_prefix   --> (IDENTIFIER | QUOTED_IDENTIFIER) "!"
//!   function_call  --> IDENTIFIER "(" arguments? ")"
//!   arguments      --> expression ("," expression)*

use crate::ast::{BinaryOperator, Expression, UnaryOperator, Value};
use crate::lexer::Lexer;
use crate::token::Token;

/// Parser errors with descriptive messages.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// One side of a `:` reference, classified by its shape.
enum RefPart {
    Cell(String, u32),
    Column(String),
    Row(u32),
}

/// The Parser struct holds the lexer and current token state.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
}

impl<'a> Parser<'a> {
    /// Creates a new parser from an input string.
    /// Automatically advances to the first token.
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token();
        Parser {
            lexer,
            current_token,
        }
    }

    /// Parses the entire input and returns the AST.
    /// Accepts an optional leading '='.
    pub fn parse(&mut self) -> ParseResult<Expression> {
        if self.current_token == Token::Equals {
            self.advance();
        }

        if self.current_token == Token::EOF {
            return Err(ParseError::new("Empty expression"));
        }

        let expr = self.parse_expression()?;

        if self.current_token != Token::EOF {
            return Err(ParseError::new(format!(
                "Unexpected token after expression: {:?}",
                self.current_token
            )));
        }

        Ok(expr)
    }

    fn advance(&mut self) {
        self.current_token = self.lexer.next_token();
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current_token == expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::new(format!(
                "Expected {:?}, found {:?}",
                expected, self.current_token
            )))
        }
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_comparison()
    }

    fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match &self.current_token {
                Token::Equals => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_concatenation()?;
            left = Self::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_additive()?;

        while self.current_token == Token::Ampersand {
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(left, BinaryOperator::Concat, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match &self.current_token {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_power()?;

        loop {
            let op = match &self.current_token {
                Token::Asterisk => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            left = Self::binary(left, op, right);
        }

        Ok(left)
    }

    /// `^` is left-associative in spreadsheet formulas: 2^3^2 = 64.
    fn parse_power(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_percent()?;

        while self.current_token == Token::Caret {
            self.advance();
            let right = self.parse_percent()?;
            left = Self::binary(left, BinaryOperator::Power, right);
        }

        Ok(left)
    }

    fn parse_percent(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_unary()?;

        while self.current_token == Token::Percent {
            self.advance();
            expr = Expression::UnaryOp {
                op: UnaryOperator::Percent,
                operand: Box::new(expr),
            };
        }

        Ok(expr)
    }

    /// Negation binds tighter than `^`: -2^2 = 4.
    fn parse_unary(&mut self) -> ParseResult<Expression> {
        match self.current_token {
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::UnaryOp {
                    op: UnaryOperator::Negate,
                    operand: Box::new(operand),
                })
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        match self.current_token.clone() {
            // Number literal - could also be the start of a row reference (1:5)
            Token::Number(n) => {
                self.advance();
                if self.current_token == Token::Colon {
                    let start = row_number(n)?;
                    return self.parse_reference_tail(None, RefPart::Row(start));
                }
                Ok(Expression::Literal(Value::Number(n)))
            }

            Token::String(s) => {
                self.advance();
                Ok(Expression::Literal(Value::String(s)))
            }

            Token::Boolean(b) => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(b)))
            }

            Token::Error(e) => {
                self.advance();
                Ok(Expression::Literal(Value::Error(e)))
            }

            // Quoted identifier - must be a sheet reference
            Token::QuotedIdentifier(sheet_name) => {
                self.advance();
                self.expect(Token::Exclamation)?;
                self.parse_sheet_reference(sheet_name)
            }

            Token::Identifier(name) => {
                self.advance();

                if self.current_token == Token::Exclamation {
                    self.advance();
                    return self.parse_sheet_reference(name);
                }

                if self.current_token == Token::LParen {
                    return self.parse_function_call(name);
                }

                let part = classify_ref_part(&name)?;
                if self.current_token == Token::Colon {
                    return self.parse_reference_tail(None, part);
                }

                match part {
                    RefPart::Cell(col, row) => Ok(Expression::CellRef {
                        sheet: None,
                        col,
                        row,
                    }),
                    _ => Err(ParseError::new(format!("Unknown name: {}", name))),
                }
            }

            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }

            Token::EOF => Err(ParseError::new("Unexpected end of expression")),

            Token::Illegal(ch) => Err(ParseError::new(format!("Illegal character: {}", ch))),

            token => Err(ParseError::new(format!("Unexpected token: {:?}", token))),
        }
    }

    /// Parses a reference after a sheet prefix (SheetName!).
    fn parse_sheet_reference(&mut self, sheet_name: String) -> ParseResult<Expression> {
        let part = match self.current_token.clone() {
            Token::Number(n) => RefPart::Row(row_number(n)?),
            Token::Identifier(name) => classify_ref_part(&name)?,
            other => {
                return Err(ParseError::new(format!(
                    "Expected cell reference after '!', found {:?}",
                    other
                )))
            }
        };
        self.advance();

        if self.current_token == Token::Colon {
            return self.parse_reference_tail(Some(sheet_name), part);
        }

        match part {
            RefPart::Cell(col, row) => Ok(Expression::CellRef {
                sheet: Some(sheet_name),
                col,
                row,
            }),
            _ => Err(ParseError::new("Expected ':' after partial reference")),
        }
    }

    /// Parses the `: end` half of a range, column or row reference.
    fn parse_reference_tail(
        &mut self,
        sheet: Option<String>,
        start: RefPart,
    ) -> ParseResult<Expression> {
        // Consume the ':'
        self.advance();

        let end = match self.current_token.clone() {
            Token::Number(n) => RefPart::Row(row_number(n)?),
            Token::Identifier(name) => classify_ref_part(&name)?,
            other => {
                return Err(ParseError::new(format!(
                    "Expected reference after ':', found {:?}",
                    other
                )))
            }
        };
        self.advance();

        match (start, end) {
            (RefPart::Cell(start_col, start_row), RefPart::Cell(end_col, end_row)) => {
                Ok(Expression::Range {
                    sheet,
                    start_col,
                    start_row,
                    end_col,
                    end_row,
                })
            }
            (RefPart::Column(start_col), RefPart::Column(end_col)) => Ok(Expression::ColumnRef {
                sheet,
                start_col,
                end_col,
            }),
            (RefPart::Row(start_row), RefPart::Row(end_row)) => Ok(Expression::RowRef {
                sheet,
                start_row,
                end_row,
            }),
            _ => Err(ParseError::new("Mismatched reference kinds around ':'")),
        }
    }

    fn parse_function_call(&mut self, name: String) -> ParseResult<Expression> {
        // Consume the '('
        self.advance();

        let name = name
            .strip_prefix("_XLFN.")
            .map(str::to_string)
            .unwrap_or(name);

        let mut args = Vec::new();

        if self.current_token == Token::RParen {
            self.advance();
            return Ok(Expression::FunctionCall { name, args });
        }

        args.push(self.parse_expression()?);
        while self.current_token == Token::Comma {
            self.advance();
            args.push(self.parse_expression()?);
        }

        self.expect(Token::RParen)?;

        Ok(Expression::FunctionCall { name, args })
    }
}

fn row_number(n: f64) -> ParseResult<u32> {
    if n < 1.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(ParseError::new(format!("Invalid row number: {}", n)));
    }
    Ok(n as u32)
}

/// Classifies `A1`, `$A$1`, `A`, `$A`, `12` or `$12` after stripping anchors.
fn classify_ref_part(identifier: &str) -> ParseResult<RefPart> {
    let stripped: String = identifier.chars().filter(|c| *c != '$').collect();
    let letters: String = stripped
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let digits = &stripped[letters.len()..];

    if letters.len() > 3 {
        return Err(ParseError::new(format!("Unknown name: {}", identifier)));
    }

    match (letters.is_empty(), digits.is_empty()) {
        (false, true) => Ok(RefPart::Column(letters.to_uppercase())),
        (true, false) if digits.chars().all(|c| c.is_ascii_digit()) => {
            let row: u32 = digits
                .parse()
                .map_err(|_| ParseError::new(format!("Invalid row: {}", identifier)))?;
            if row == 0 {
                return Err(ParseError::new("Row numbers must be >= 1"));
            }
            Ok(RefPart::Row(row))
        }
        (false, false) if digits.chars().all(|c| c.is_ascii_digit()) => {
            let row: u32 = digits.parse().map_err(|_| {
                ParseError::new(format!("Invalid row number in cell reference: {}", identifier))
            })?;
            if row == 0 {
                return Err(ParseError::new(format!(
                    "Row number must be >= 1: {}",
                    identifier
                )));
            }
            Ok(RefPart::Cell(letters.to_uppercase(), row))
        }
        _ => Err(ParseError::new(format!("Unknown name: {}", identifier))),
    }
}

/// Convenience function to parse a formula string directly.
pub fn parse(input: &str) -> ParseResult<Expression> {
    let mut parser = Parser::new(input);
    parser.parse()
}
