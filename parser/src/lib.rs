//! FILENAME: parser/src/lib.rs
//! PURPOSE: Library root for the formula parser.
//! CONTEXT: This module exposes the lexer, parser, and AST components
//! needed to convert the formula text stored in template cells into
//! evaluatable expression trees.
//!
//! PIPELINE: Formula String --> Lexer --> Tokens --> Parser --> AST --> Evaluator

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

#[cfg(test)]
mod tests;

pub use ast::{BinaryOperator, Expression, UnaryOperator, Value};
pub use lexer::Lexer;
pub use parser::{parse, ParseError, ParseResult, Parser};
pub use token::Token;
