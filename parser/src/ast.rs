//! FILENAME: parser/src/ast.rs
//! PURPOSE: Defines the Abstract Syntax Tree (AST) for formula expressions.
//! CONTEXT: After the Lexer tokenizes a formula string, the Parser converts
//! those tokens into this tree structure. The Evaluator then traverses
//! this tree to compute the final result.
//!
//! Column letters are stored upper-cased and rows 1-based, exactly as they
//! appear in A1 notation. `$` anchors are accepted by the parser but not
//! kept: evaluation never shifts formulas.

/// Represents a parsed formula expression.
#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    /// A literal value: number, string, boolean or error.
    Literal(Value),

    /// A single cell reference like A1, $B$2 or 'My Sheet'!C3.
    CellRef {
        sheet: Option<String>,
        col: String,
        row: u32,
    },

    /// A rectangular range like A1:B10 or Data!$A$2:$C$500.
    Range {
        sheet: Option<String>,
        start_col: String,
        start_row: u32,
        end_col: String,
        end_row: u32,
    },

    /// Whole columns: A:A, B:D, Data!C:C.
    ColumnRef {
        sheet: Option<String>,
        start_col: String,
        end_col: String,
    },

    /// Whole rows: 1:1, 2:5, Data!3:3.
    RowRef {
        sheet: Option<String>,
        start_row: u32,
        end_row: u32,
    },

    /// A binary operation: left op right (e.g., 5 + 3, A1 > 10).
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },

    /// A unary operation (prefix minus, postfix percent).
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },

    /// A function call like SUM(A1:A10). The name is upper-cased with any
    /// `_xlfn.` future-function prefix removed.
    FunctionCall { name: String, args: Vec<Expression> },
}

impl Expression {
    /// The explicit sheet qualifier of a reference, if any.
    pub fn sheet(&self) -> Option<&str> {
        match self {
            Expression::CellRef { sheet, .. }
            | Expression::Range { sheet, .. }
            | Expression::ColumnRef { sheet, .. }
            | Expression::RowRef { sheet, .. } => sheet.as_deref(),
            _ => None,
        }
    }

    /// True for any of the reference variants.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Expression::CellRef { .. }
                | Expression::Range { .. }
                | Expression::ColumnRef { .. }
                | Expression::RowRef { .. }
        )
    }
}

/// Literal values that can appear in formulas.
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    /// Error literal in its canonical text form (`#N/A`).
    Error(String),
}

/// Binary operators, listed by precedence group (comparison is lowest).
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,

    Concat,

    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

/// Unary operators.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOperator {
    Negate,
    /// Postfix `%`: divides the operand by 100.
    Percent,
}

impl std::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Power => "^",
            BinaryOperator::Concat => "&",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterEqual => ">=",
        };
        f.write_str(symbol)
    }
}

impl std::fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "-"),
            UnaryOperator::Percent => write!(f, "%"),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Error(e) => write!(f, "{}", e),
        }
    }
}
