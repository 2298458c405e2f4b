//! FILENAME: parser/src/tests.rs
//! PURPOSE: Consolidated unit tests for the parser crate.

use crate::ast::{BinaryOperator, Expression, UnaryOperator, Value};
use crate::lexer::Lexer;
use crate::parser::parse;
use crate::token::Token;

fn cell(col: &str, row: u32) -> Expression {
    Expression::CellRef {
        sheet: None,
        col: col.to_string(),
        row,
    }
}

fn num(n: f64) -> Expression {
    Expression::Literal(Value::Number(n))
}

// ========================================
// LEXER TESTS
// ========================================

#[test]
fn lexer_tokenizes_simple_math() {
    let tokens = Lexer::new("=1 + 2").tokenize();
    assert_eq!(
        tokens,
        vec![
            Token::Equals,
            Token::Number(1.0),
            Token::Plus,
            Token::Number(2.0),
            Token::EOF
        ]
    );
}

#[test]
fn lexer_reads_quoted_sheet_with_escaped_quote() {
    let mut lexer = Lexer::new("'John''s Sheet'!A1");
    assert_eq!(
        lexer.next_token(),
        Token::QuotedIdentifier("John's Sheet".to_string())
    );
    assert_eq!(lexer.next_token(), Token::Exclamation);
    assert_eq!(lexer.next_token(), Token::Identifier("A1".to_string()));
}

#[test]
fn lexer_reads_doubled_quotes_inside_strings() {
    let mut lexer = Lexer::new(r#""say ""hi""""#);
    assert_eq!(lexer.next_token(), Token::String("say \"hi\"".to_string()));
    assert_eq!(lexer.next_token(), Token::EOF);
}

#[test]
fn lexer_reads_error_literals() {
    let tokens = Lexer::new("#N/A, #DIV/0!, #name?").tokenize();
    assert_eq!(tokens[0], Token::Error("#N/A".to_string()));
    assert_eq!(tokens[2], Token::Error("#DIV/0!".to_string()));
    assert_eq!(tokens[4], Token::Error("#NAME?".to_string()));
}

#[test]
fn lexer_reads_exponents_but_not_identifiers_after_numbers() {
    let mut lexer = Lexer::new("1.5E+3");
    assert_eq!(lexer.next_token(), Token::Number(1500.0));

    let mut lexer = Lexer::new("2E");
    assert_eq!(lexer.next_token(), Token::Number(2.0));
    assert_eq!(lexer.next_token(), Token::Identifier("E".to_string()));
}

#[test]
fn lexer_keeps_anchors_in_identifiers() {
    let mut lexer = Lexer::new("$a$1");
    assert_eq!(lexer.next_token(), Token::Identifier("$A$1".to_string()));
}

// ========================================
// PARSER TESTS
// ========================================

#[test]
fn parses_without_leading_equals() {
    assert_eq!(parse("A1").unwrap(), cell("A", 1));
    assert_eq!(parse("=A1").unwrap(), cell("A", 1));
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let expr = parse("1+2*3").unwrap();
    assert_eq!(
        expr,
        Expression::BinaryOp {
            left: Box::new(num(1.0)),
            op: BinaryOperator::Add,
            right: Box::new(Expression::BinaryOp {
                left: Box::new(num(2.0)),
                op: BinaryOperator::Multiply,
                right: Box::new(num(3.0)),
            }),
        }
    );
}

#[test]
fn negation_binds_tighter_than_power() {
    let expr = parse("-2^2").unwrap();
    assert_eq!(
        expr,
        Expression::BinaryOp {
            left: Box::new(Expression::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(num(2.0)),
            }),
            op: BinaryOperator::Power,
            right: Box::new(num(2.0)),
        }
    );
}

#[test]
fn power_is_left_associative() {
    let expr = parse("2^3^2").unwrap();
    match expr {
        Expression::BinaryOp { left, op, right } => {
            assert_eq!(op, BinaryOperator::Power);
            assert_eq!(*right, num(2.0));
            assert!(matches!(*left, Expression::BinaryOp { op: BinaryOperator::Power, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn parses_postfix_percent() {
    assert_eq!(
        parse("50%").unwrap(),
        Expression::UnaryOp {
            op: UnaryOperator::Percent,
            operand: Box::new(num(50.0)),
        }
    );
}

#[test]
fn parses_anchored_range_with_quoted_sheet() {
    assert_eq!(
        parse("SUM('Raw Data'!$B$2:$B$251)").unwrap(),
        Expression::FunctionCall {
            name: "SUM".to_string(),
            args: vec![Expression::Range {
                sheet: Some("Raw Data".to_string()),
                start_col: "B".to_string(),
                start_row: 2,
                end_col: "B".to_string(),
                end_row: 251,
            }],
        }
    );
}

#[test]
fn parses_column_and_row_references() {
    assert_eq!(
        parse("Data!C:D").unwrap(),
        Expression::ColumnRef {
            sheet: Some("DATA".to_string()),
            start_col: "C".to_string(),
            end_col: "D".to_string(),
        }
    );
    assert_eq!(
        parse("2:5").unwrap(),
        Expression::RowRef {
            sheet: None,
            start_row: 2,
            end_row: 5,
        }
    );
}

#[test]
fn strips_future_function_prefix() {
    match parse("_xlfn.CONCAT(\"a\",\"b\")").unwrap() {
        Expression::FunctionCall { name, args } => {
            assert_eq!(name, "CONCAT");
            assert_eq!(args.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn parses_error_literal_and_empty_call() {
    assert_eq!(
        parse("IFERROR(#N/A, NOW())").unwrap(),
        Expression::FunctionCall {
            name: "IFERROR".to_string(),
            args: vec![
                Expression::Literal(Value::Error("#N/A".to_string())),
                Expression::FunctionCall {
                    name: "NOW".to_string(),
                    args: vec![],
                },
            ],
        }
    );
}

#[test]
fn rejects_defined_names_and_garbage() {
    assert!(parse("TaxRate*2").is_err());
    assert!(parse("1+").is_err());
    assert!(parse("").is_err());
    assert!(parse("A1:5").is_err());
    assert!(parse("(1").is_err());
}
