//! FILENAME: engine/src/evaluator.rs
//! PURPOSE: Evaluates formula cells to compute their cached results.
//! CONTEXT: After a generation has written its data, every formula cell of the
//! workbook is evaluated here so readers see correct values without
//! recalculating. Rows that were already flushed are only visible through the
//! per-column digest of their sheet; anything that cannot be answered from
//! the resident cells plus the digest evaluates to `Unavailable`, and the
//! caller omits the cached value instead of writing a stale one.
//!
//! SUPPORTED FEATURES:
//! - Literals, cell references, ranges, whole-column and whole-row references
//! - Cross-sheet references (sheet names resolved case-insensitively)
//! - Binary operations: +, -, *, /, ^, &, =, <>, <, >, <=, >=
//! - Unary operations: - (negation), % (percent)
//! - Functions: SUM, AVERAGE, MIN, MAX, COUNT, COUNTA, PRODUCT, IF, IFERROR,
//!              AND, OR, NOT, ABS, ROUND, INT, MOD, POWER, SQRT, LEN, UPPER,
//!              LOWER, TRIM, LEFT, RIGHT, MID, CONCATENATE, CONCAT

use crate::aggregate::{Aggregate, AggregationType, SheetDigest};
use crate::cell::{Cell, CellError, CellValue};
use crate::coord::{col_to_index, CellCoord, CellRange, MAX_COL, MAX_ROW};
use log::debug;
use parser::{BinaryOperator, Expression, UnaryOperator, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Read access to the cells a formula may reference.
pub trait WorkbookView {
    /// Position of a sheet by name, compared case-insensitively.
    fn sheet_index(&self, name: &str) -> Option<usize>;

    /// A resident cell, if one exists at the coordinate.
    fn cell(&self, sheet: usize, row: u32, col: u32) -> Option<&Cell>;

    /// Every resident cell inside `range`, in any order.
    fn cells_in(&self, sheet: usize, range: CellRange) -> Vec<(CellCoord, &Cell)>;

    /// Summary of the rows the sheet has flushed, if it is streamed.
    fn digest(&self, sheet: usize) -> Option<&SheetDigest>;
}

/// The result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
    /// A reference to a cell with no content.
    Empty,
    /// Range expansion. May contain one `Summary` standing in for flushed rows.
    Array(Vec<EvalResult>),
    /// Aggregated flushed rows; only meaningful to aggregate functions.
    Summary(Box<Aggregate>),
    /// The value depends on data that is no longer resident, or on a
    /// construct this evaluator does not implement.
    Unavailable,
}

impl EvalResult {
    pub fn from_value(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => EvalResult::Empty,
            CellValue::Number(n) => EvalResult::Number(*n),
            CellValue::Text(s) => EvalResult::Text(s.clone()),
            CellValue::Boolean(b) => EvalResult::Boolean(*b),
            CellValue::Error(e) => EvalResult::Error(*e),
        }
    }

    /// Converts the result to a cached cell value.
    /// `None` means no value may be cached.
    pub fn to_cell_value(&self) -> Option<CellValue> {
        match self.scalar() {
            EvalResult::Number(n) => Some(CellValue::Number(n)),
            EvalResult::Text(s) => Some(CellValue::Text(s)),
            EvalResult::Boolean(b) => Some(CellValue::Boolean(b)),
            EvalResult::Error(e) => Some(CellValue::Error(e)),
            EvalResult::Empty => Some(CellValue::Number(0.0)),
            _ => None,
        }
    }

    /// Collapses arrays to their first value, as a single cell would.
    pub fn scalar(&self) -> EvalResult {
        match self {
            EvalResult::Array(items) => match items.first() {
                Some(first) => first.scalar(),
                None => EvalResult::Empty,
            },
            EvalResult::Summary(_) => EvalResult::Unavailable,
            other => other.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            EvalResult::Number(n) => Some(*n),
            EvalResult::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            EvalResult::Text(s) => s.trim().parse::<f64>().ok(),
            EvalResult::Empty => Some(0.0),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            EvalResult::Boolean(b) => Some(*b),
            EvalResult::Number(n) => Some(*n != 0.0),
            EvalResult::Empty => Some(false),
            EvalResult::Text(s) if s.eq_ignore_ascii_case("TRUE") => Some(true),
            EvalResult::Text(s) if s.eq_ignore_ascii_case("FALSE") => Some(false),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            EvalResult::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{:.0}", n)
                } else {
                    format!("{}", n)
                }
            }
            EvalResult::Text(s) => s.clone(),
            EvalResult::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            EvalResult::Error(e) => e.as_str().to_string(),
            _ => String::new(),
        }
    }

    /// Errors and `Unavailable` short-circuit every operation.
    fn is_terminal(&self) -> bool {
        matches!(self, EvalResult::Error(_) | EvalResult::Unavailable)
    }
}

/// Evaluates `$e` to a scalar and returns early on errors and `Unavailable`.
macro_rules! scalar_or_return {
    ($e:expr) => {{
        let value = $e.scalar();
        if value.is_terminal() {
            return value;
        }
        value
    }};
}

/// Evaluates `$e` to a number or returns the appropriate error.
macro_rules! number_or_return {
    ($e:expr) => {{
        let value = scalar_or_return!($e);
        match value.as_number() {
            Some(n) => n,
            None => return EvalResult::Error(CellError::Value),
        }
    }};
}

type CellKey = (usize, u32, u32);

/// A formula cell waiting for its dependencies.
struct Pending {
    key: CellKey,
    expr: Option<Expression>,
    deps: Vec<CellKey>,
    next: usize,
}

/// Evaluator with per-cell memoization and cycle detection. Reference
/// chains are walked with an explicit stack; only the expression tree of a
/// single formula is evaluated recursively.
pub struct Evaluator<'a, V: WorkbookView + ?Sized> {
    view: &'a V,
    memo: RefCell<HashMap<CellKey, EvalResult>>,
    visiting: RefCell<HashSet<CellKey>>,
}

impl<'a, V: WorkbookView + ?Sized> Evaluator<'a, V> {
    pub fn new(view: &'a V) -> Self {
        Evaluator {
            view,
            memo: RefCell::new(HashMap::new()),
            visiting: RefCell::new(HashSet::new()),
        }
    }

    /// Evaluates the cell at (row, col) of `sheet`, following its formula.
    pub fn evaluate_cell(&self, sheet: usize, row: u32, col: u32) -> EvalResult {
        let key = (sheet, row, col);
        if let Some(done) = self.memo.borrow().get(&key) {
            return done.clone();
        }
        if self.visiting.borrow().contains(&key) {
            return EvalResult::Error(CellError::Ref);
        }
        match self.formula_of(key) {
            Ok(text) => {
                self.settle(key, text);
                self.memo.borrow().get(&key).cloned().unwrap_or(EvalResult::Unavailable)
            }
            Err(value) => value,
        }
    }

    /// The formula text of a cell that needs evaluating, or the cell's
    /// result when there is nothing to evaluate.
    fn formula_of(&self, (sheet, row, col): CellKey) -> Result<&'a str, EvalResult> {
        let view: &'a V = self.view;
        let cell = match view.cell(sheet, row, col) {
            Some(cell) => cell,
            None if self.is_flushed(sheet, row) => return Err(EvalResult::Unavailable),
            None => return Err(EvalResult::Empty),
        };
        let formula = match &cell.formula {
            Some(formula) => formula,
            None => return Err(EvalResult::from_value(&cell.value)),
        };
        // Shared followers and array/table formulas need the master's
        // context to evaluate; leave them to the reader.
        if formula.is_shared_follower()
            || matches!(formula.attribute("t"), Some("array") | Some("dataTable"))
        {
            return Err(EvalResult::Unavailable);
        }
        Ok(formula.text.as_str())
    }

    /// Evaluates `root` and every formula it depends on, dependencies first,
    /// with an explicit stack. Each formula then only reads memoized results,
    /// so the depth of a reference chain never reaches the call stack.
    fn settle(&self, root: CellKey, text: &str) {
        self.visiting.borrow_mut().insert(root);
        let mut stack = vec![self.pending(root, text)];

        while let Some(top) = stack.last_mut() {
            if let Some(&dep) = top.deps.get(top.next) {
                top.next += 1;
                if self.memo.borrow().contains_key(&dep) || self.visiting.borrow().contains(&dep) {
                    continue;
                }
                if let Ok(text) = self.formula_of(dep) {
                    self.visiting.borrow_mut().insert(dep);
                    stack.push(self.pending(dep, text));
                }
                continue;
            }

            let Some(done) = stack.pop() else { break };
            let result = match &done.expr {
                Some(expr) => self.evaluate(done.key.0, expr),
                None => EvalResult::Unavailable,
            };
            self.visiting.borrow_mut().remove(&done.key);
            self.memo.borrow_mut().insert(done.key, result);
        }
    }

    fn pending(&self, key: CellKey, text: &str) -> Pending {
        match parser::parse(text) {
            Ok(expr) => {
                let mut deps = Vec::new();
                self.collect_formula_refs(key.0, &expr, &mut deps);
                Pending {
                    key,
                    expr: Some(expr),
                    deps,
                    next: 0,
                }
            }
            Err(e) => {
                debug!("formula '{}' not evaluated: {}", text, e);
                Pending {
                    key,
                    expr: None,
                    deps: Vec::new(),
                    next: 0,
                }
            }
        }
    }

    /// Formula cells `expr` may read, whichever branch it takes.
    fn collect_formula_refs(&self, sheet: usize, expr: &Expression, out: &mut Vec<CellKey>) {
        let area = match expr {
            Expression::Literal(_) => None,
            Expression::CellRef {
                sheet: target,
                col,
                row,
            } => {
                if let (Some(sheet), Some(col)) = (self.resolve(sheet, target), col_to_index(col)) {
                    if *row >= 1 {
                        out.push((sheet, row - 1, col));
                    }
                }
                None
            }
            Expression::Range {
                sheet: target,
                start_col,
                start_row,
                end_col,
                end_row,
            } => match (col_to_index(start_col), col_to_index(end_col)) {
                (Some(c1), Some(c2)) if *start_row >= 1 && *end_row >= 1 => self
                    .resolve(sheet, target)
                    .map(|s| (s, CellRange::new((start_row - 1, c1), (end_row - 1, c2)))),
                _ => None,
            },
            Expression::ColumnRef {
                sheet: target,
                start_col,
                end_col,
            } => match (col_to_index(start_col), col_to_index(end_col)) {
                (Some(c1), Some(c2)) => self
                    .resolve(sheet, target)
                    .map(|s| (s, CellRange::new((0, c1), (MAX_ROW, c2)))),
                _ => None,
            },
            Expression::RowRef {
                sheet: target,
                start_row,
                end_row,
            } if *start_row >= 1 && *end_row >= 1 => self
                .resolve(sheet, target)
                .map(|s| (s, CellRange::new((start_row - 1, 0), (end_row - 1, MAX_COL)))),
            Expression::RowRef { .. } => None,
            Expression::BinaryOp { left, right, .. } => {
                self.collect_formula_refs(sheet, left, out);
                self.collect_formula_refs(sheet, right, out);
                None
            }
            Expression::UnaryOp { operand, .. } => {
                self.collect_formula_refs(sheet, operand, out);
                None
            }
            Expression::FunctionCall { args, .. } => {
                for arg in args {
                    self.collect_formula_refs(sheet, arg, out);
                }
                None
            }
        };
        if let Some((target, range)) = area {
            out.extend(
                self.view
                    .cells_in(target, range)
                    .into_iter()
                    .filter(|(_, cell)| cell.formula.is_some())
                    .map(|((row, col), _)| (target, row, col)),
            );
        }
    }

    /// Parses and evaluates `text` as if it lived on `sheet`.
    pub fn evaluate_formula(&self, sheet: usize, text: &str) -> EvalResult {
        match parser::parse(text) {
            Ok(expr) => self.evaluate(sheet, &expr),
            Err(e) => {
                debug!("formula '{}' not evaluated: {}", text, e);
                EvalResult::Unavailable
            }
        }
    }

    fn evaluate(&self, sheet: usize, expr: &Expression) -> EvalResult {
        match expr {
            Expression::Literal(value) => self.eval_literal(value),
            Expression::CellRef {
                sheet: target,
                col,
                row,
            } => {
                let Some(sheet) = self.resolve(sheet, target) else {
                    return EvalResult::Error(CellError::Ref);
                };
                match col_to_index(col) {
                    Some(col) if *row >= 1 => self.evaluate_cell(sheet, row - 1, col),
                    _ => EvalResult::Error(CellError::Ref),
                }
            }
            Expression::Range {
                sheet: target,
                start_col,
                start_row,
                end_col,
                end_row,
            } => {
                let Some(sheet) = self.resolve(sheet, target) else {
                    return EvalResult::Error(CellError::Ref);
                };
                match (col_to_index(start_col), col_to_index(end_col)) {
                    (Some(c1), Some(c2)) if *start_row >= 1 && *end_row >= 1 => {
                        let range = CellRange::new((start_row - 1, c1), (end_row - 1, c2));
                        self.eval_area(sheet, range)
                    }
                    _ => EvalResult::Error(CellError::Ref),
                }
            }
            Expression::ColumnRef {
                sheet: target,
                start_col,
                end_col,
            } => {
                let Some(sheet) = self.resolve(sheet, target) else {
                    return EvalResult::Error(CellError::Ref);
                };
                match (col_to_index(start_col), col_to_index(end_col)) {
                    (Some(c1), Some(c2)) => {
                        self.eval_area(sheet, CellRange::new((0, c1), (MAX_ROW, c2)))
                    }
                    _ => EvalResult::Error(CellError::Ref),
                }
            }
            Expression::RowRef {
                sheet: target,
                start_row,
                end_row,
            } => {
                let Some(sheet) = self.resolve(sheet, target) else {
                    return EvalResult::Error(CellError::Ref);
                };
                if *start_row < 1 || *end_row < 1 {
                    return EvalResult::Error(CellError::Ref);
                }
                self.eval_area(
                    sheet,
                    CellRange::new((start_row - 1, 0), (end_row - 1, MAX_COL)),
                )
            }
            Expression::BinaryOp { left, op, right } => self.eval_binary_op(sheet, left, *op, right),
            Expression::UnaryOp { op, operand } => {
                let n = number_or_return!(self.evaluate(sheet, operand));
                match op {
                    UnaryOperator::Negate => EvalResult::Number(-n),
                    UnaryOperator::Percent => EvalResult::Number(n / 100.0),
                }
            }
            Expression::FunctionCall { name, args } => self.eval_function(sheet, name, args),
        }
    }

    fn resolve(&self, current: usize, target: &Option<String>) -> Option<usize> {
        match target {
            Some(name) => self.view.sheet_index(name),
            None => Some(current),
        }
    }

    fn is_flushed(&self, sheet: usize, row: u32) -> bool {
        self.view
            .digest(sheet)
            .and_then(SheetDigest::row_span)
            .map_or(false, |(first, last)| row >= first && row <= last)
    }

    fn eval_literal(&self, value: &Value) -> EvalResult {
        match value {
            Value::Number(n) => EvalResult::Number(*n),
            Value::String(s) => EvalResult::Text(s.clone()),
            Value::Boolean(b) => EvalResult::Boolean(*b),
            Value::Error(code) => {
                EvalResult::Error(CellError::from_code(code).unwrap_or(CellError::Name))
            }
        }
    }

    /// Expands a rectangle. Flushed rows contribute one `Summary` when the
    /// rectangle spans all of them; a partial overlap cannot be answered.
    fn eval_area(&self, sheet: usize, range: CellRange) -> EvalResult {
        let mut items = Vec::new();

        if let Some(digest) = self.view.digest(sheet) {
            if let Some((first, last)) = digest.row_span() {
                let overlaps = range.first.0 <= last && range.last.0 >= first;
                if overlaps {
                    if range.first.0 <= first && range.last.0 >= last {
                        let summary = digest.summarize(range.first.1, range.last.1);
                        items.push(EvalResult::Summary(Box::new(summary)));
                    } else {
                        return EvalResult::Unavailable;
                    }
                }
            }
        }

        let mut cells = self.view.cells_in(sheet, range);
        cells.sort_by_key(|(coord, _)| *coord);
        for ((row, col), cell) in cells {
            let value = if cell.formula.is_some() {
                self.evaluate_cell(sheet, row, col)
            } else {
                EvalResult::from_value(&cell.value)
            };
            if value == EvalResult::Unavailable {
                return value;
            }
            items.push(value);
        }

        EvalResult::Array(items)
    }

    fn eval_binary_op(
        &self,
        sheet: usize,
        left: &Expression,
        op: BinaryOperator,
        right: &Expression,
    ) -> EvalResult {
        let left = scalar_or_return!(self.evaluate(sheet, left));
        let right = scalar_or_return!(self.evaluate(sheet, right));

        match op {
            BinaryOperator::Add => arithmetic(&left, &right, |l, r| l + r),
            BinaryOperator::Subtract => arithmetic(&left, &right, |l, r| l - r),
            BinaryOperator::Multiply => arithmetic(&left, &right, |l, r| l * r),
            BinaryOperator::Divide => match right.as_number() {
                Some(r) if r == 0.0 && left.as_number().is_some() => {
                    EvalResult::Error(CellError::Div0)
                }
                _ => arithmetic(&left, &right, |l, r| l / r),
            },
            BinaryOperator::Power => arithmetic(&left, &right, f64::powf),
            BinaryOperator::Concat => {
                EvalResult::Text(format!("{}{}", left.as_text(), right.as_text()))
            }
            BinaryOperator::Equal => EvalResult::Boolean(compare(&left, &right) == Ordering::Equal),
            BinaryOperator::NotEqual => {
                EvalResult::Boolean(compare(&left, &right) != Ordering::Equal)
            }
            BinaryOperator::LessThan => EvalResult::Boolean(compare(&left, &right) == Ordering::Less),
            BinaryOperator::GreaterThan => {
                EvalResult::Boolean(compare(&left, &right) == Ordering::Greater)
            }
            BinaryOperator::LessEqual => {
                EvalResult::Boolean(compare(&left, &right) != Ordering::Greater)
            }
            BinaryOperator::GreaterEqual => {
                EvalResult::Boolean(compare(&left, &right) != Ordering::Less)
            }
        }
    }

    // ==================== Function dispatch ====================

    fn eval_function(&self, sheet: usize, name: &str, args: &[Expression]) -> EvalResult {
        match name {
            "SUM" => self.fn_aggregate(sheet, args, |agg| Ok(agg.sum)),
            "AVERAGE" => self.fn_aggregate(sheet, args, |agg| agg.evaluate(AggregationType::Average)),
            "MIN" => self.fn_aggregate(sheet, args, |agg| Ok(agg.compute(AggregationType::Min))),
            "MAX" => self.fn_aggregate(sheet, args, |agg| Ok(agg.compute(AggregationType::Max))),
            "PRODUCT" => {
                self.fn_aggregate(sheet, args, |agg| Ok(agg.compute(AggregationType::Product)))
            }
            "COUNT" => self.fn_count(sheet, args, |agg| agg.count_numbers),
            "COUNTA" => self.fn_count(sheet, args, |agg| agg.count),

            "IF" => self.fn_if(sheet, args),
            "IFERROR" => self.fn_iferror(sheet, args),
            "AND" => self.fn_logical(sheet, args, true),
            "OR" => self.fn_logical(sheet, args, false),
            "NOT" => {
                if args.len() != 1 {
                    return EvalResult::Error(CellError::Value);
                }
                let value = scalar_or_return!(self.evaluate(sheet, &args[0]));
                match value.as_boolean() {
                    Some(b) => EvalResult::Boolean(!b),
                    None => EvalResult::Error(CellError::Value),
                }
            }
            "TRUE" if args.is_empty() => EvalResult::Boolean(true),
            "FALSE" if args.is_empty() => EvalResult::Boolean(false),

            "ABS" => self.fn_unary_math(sheet, args, |n| Ok(n.abs())),
            "INT" => self.fn_unary_math(sheet, args, |n| Ok(n.floor())),
            "SQRT" => self.fn_unary_math(sheet, args, |n| {
                if n < 0.0 {
                    Err(CellError::Num)
                } else {
                    Ok(n.sqrt())
                }
            }),
            "ROUND" => self.fn_round(sheet, args),
            "MOD" => self.fn_binary_math(sheet, args, |n, d| {
                if d == 0.0 {
                    Err(CellError::Div0)
                } else {
                    Ok(n - d * (n / d).floor())
                }
            }),
            "POWER" => self.fn_binary_math(sheet, args, |b, e| Ok(b.powf(e))),

            "LEN" => self.fn_text(sheet, args, |s| EvalResult::Number(s.chars().count() as f64)),
            "UPPER" => self.fn_text(sheet, args, |s| EvalResult::Text(s.to_uppercase())),
            "LOWER" => self.fn_text(sheet, args, |s| EvalResult::Text(s.to_lowercase())),
            "TRIM" => self.fn_text(sheet, args, |s| {
                EvalResult::Text(s.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" "))
            }),
            "LEFT" => self.fn_left_right(sheet, args, true),
            "RIGHT" => self.fn_left_right(sheet, args, false),
            "MID" => self.fn_mid(sheet, args),
            "CONCATENATE" | "CONCAT" => self.fn_concatenate(sheet, args),

            _ => {
                debug!("function {} is not evaluated", name);
                EvalResult::Unavailable
            }
        }
    }

    // ==================== Aggregate Functions ====================

    /// Folds every argument into one aggregate. References contribute only
    /// numbers; literal arguments are coerced.
    fn collect(
        &self,
        sheet: usize,
        args: &[Expression],
        strict: bool,
    ) -> Result<Aggregate, EvalResult> {
        let mut total = Aggregate::new();
        for arg in args {
            let value = self.evaluate(sheet, arg);
            if value == EvalResult::Unavailable {
                return Err(value);
            }
            if arg.is_reference() || matches!(value, EvalResult::Array(_)) {
                fold_reference(&mut total, &value, strict)?;
            } else {
                match value {
                    EvalResult::Error(e) if strict => return Err(EvalResult::Error(e)),
                    EvalResult::Error(_) => total.add_non_number(),
                    EvalResult::Empty => {}
                    other => match other.as_number() {
                        Some(n) => total.add_number(n),
                        None if strict => return Err(EvalResult::Error(CellError::Value)),
                        None => total.add_non_number(),
                    },
                }
            }
        }
        Ok(total)
    }

    fn fn_aggregate<F>(&self, sheet: usize, args: &[Expression], finish: F) -> EvalResult
    where
        F: Fn(&Aggregate) -> Result<f64, CellError>,
    {
        match self.collect(sheet, args, true) {
            Ok(total) => match finish(&total) {
                Ok(n) => EvalResult::Number(n),
                Err(e) => EvalResult::Error(e),
            },
            Err(stop) => stop,
        }
    }

    fn fn_count<F>(&self, sheet: usize, args: &[Expression], pick: F) -> EvalResult
    where
        F: Fn(&Aggregate) -> u64,
    {
        match self.collect(sheet, args, false) {
            Ok(total) => EvalResult::Number(pick(&total) as f64),
            Err(stop) => stop,
        }
    }

    // ==================== Logical Functions ====================

    fn fn_if(&self, sheet: usize, args: &[Expression]) -> EvalResult {
        if args.len() < 2 || args.len() > 3 {
            return EvalResult::Error(CellError::Value);
        }
        let condition = scalar_or_return!(self.evaluate(sheet, &args[0]));
        match condition.as_boolean() {
            Some(true) => self.evaluate(sheet, &args[1]).scalar(),
            Some(false) => match args.get(2) {
                Some(otherwise) => self.evaluate(sheet, otherwise).scalar(),
                None => EvalResult::Boolean(false),
            },
            None => EvalResult::Error(CellError::Value),
        }
    }

    fn fn_iferror(&self, sheet: usize, args: &[Expression]) -> EvalResult {
        if args.len() != 2 {
            return EvalResult::Error(CellError::Value);
        }
        match self.evaluate(sheet, &args[0]).scalar() {
            EvalResult::Error(_) => self.evaluate(sheet, &args[1]).scalar(),
            other => other,
        }
    }

    fn fn_logical(&self, sheet: usize, args: &[Expression], all: bool) -> EvalResult {
        if args.is_empty() {
            return EvalResult::Error(CellError::Value);
        }
        let mut seen = false;
        let mut acc = all;
        for arg in args {
            let value = self.evaluate(sheet, arg);
            let items = match value {
                EvalResult::Array(items) => items,
                other => vec![other],
            };
            for item in items {
                let truth = match item {
                    EvalResult::Error(_) | EvalResult::Unavailable => return item,
                    EvalResult::Summary(_) => return EvalResult::Unavailable,
                    EvalResult::Empty => continue,
                    EvalResult::Text(_) if arg.is_reference() => continue,
                    other => match other.as_boolean() {
                        Some(b) => b,
                        None => return EvalResult::Error(CellError::Value),
                    },
                };
                seen = true;
                acc = if all { acc && truth } else { acc || truth };
            }
        }
        if seen {
            EvalResult::Boolean(acc)
        } else {
            EvalResult::Error(CellError::Value)
        }
    }

    // ==================== Math Functions ====================

    fn fn_unary_math<F>(&self, sheet: usize, args: &[Expression], op: F) -> EvalResult
    where
        F: Fn(f64) -> Result<f64, CellError>,
    {
        if args.len() != 1 {
            return EvalResult::Error(CellError::Value);
        }
        let n = number_or_return!(self.evaluate(sheet, &args[0]));
        finite(op(n))
    }

    fn fn_binary_math<F>(&self, sheet: usize, args: &[Expression], op: F) -> EvalResult
    where
        F: Fn(f64, f64) -> Result<f64, CellError>,
    {
        if args.len() != 2 {
            return EvalResult::Error(CellError::Value);
        }
        let a = number_or_return!(self.evaluate(sheet, &args[0]));
        let b = number_or_return!(self.evaluate(sheet, &args[1]));
        finite(op(a, b))
    }

    fn fn_round(&self, sheet: usize, args: &[Expression]) -> EvalResult {
        if args.is_empty() || args.len() > 2 {
            return EvalResult::Error(CellError::Value);
        }
        let num = number_or_return!(self.evaluate(sheet, &args[0]));
        let digits = match args.get(1) {
            Some(arg) => number_or_return!(self.evaluate(sheet, arg)).trunc() as i32,
            None => 0,
        };
        let multiplier = 10_f64.powi(digits);
        finite(Ok((num * multiplier).round() / multiplier))
    }

    // ==================== Text Functions ====================

    fn fn_text<F>(&self, sheet: usize, args: &[Expression], op: F) -> EvalResult
    where
        F: Fn(&str) -> EvalResult,
    {
        if args.len() != 1 {
            return EvalResult::Error(CellError::Value);
        }
        let value = scalar_or_return!(self.evaluate(sheet, &args[0]));
        op(&value.as_text())
    }

    fn fn_left_right(&self, sheet: usize, args: &[Expression], left: bool) -> EvalResult {
        if args.is_empty() || args.len() > 2 {
            return EvalResult::Error(CellError::Value);
        }
        let text = scalar_or_return!(self.evaluate(sheet, &args[0])).as_text();
        let count = match args.get(1) {
            Some(arg) => {
                let n = number_or_return!(self.evaluate(sheet, arg));
                if n < 0.0 {
                    return EvalResult::Error(CellError::Value);
                }
                n as usize
            }
            None => 1,
        };
        let result: String = if left {
            text.chars().take(count).collect()
        } else {
            let skip = text.chars().count().saturating_sub(count);
            text.chars().skip(skip).collect()
        };
        EvalResult::Text(result)
    }

    fn fn_mid(&self, sheet: usize, args: &[Expression]) -> EvalResult {
        if args.len() != 3 {
            return EvalResult::Error(CellError::Value);
        }
        let text = scalar_or_return!(self.evaluate(sheet, &args[0])).as_text();
        let start = number_or_return!(self.evaluate(sheet, &args[1]));
        let count = number_or_return!(self.evaluate(sheet, &args[2]));
        if start < 1.0 || count < 0.0 {
            return EvalResult::Error(CellError::Value);
        }
        let result: String = text
            .chars()
            .skip(start as usize - 1)
            .take(count as usize)
            .collect();
        EvalResult::Text(result)
    }

    fn fn_concatenate(&self, sheet: usize, args: &[Expression]) -> EvalResult {
        let mut result = String::new();
        for arg in args {
            let items = match self.evaluate(sheet, arg) {
                EvalResult::Array(items) => items,
                other => vec![other],
            };
            for item in items {
                match item {
                    EvalResult::Error(_) | EvalResult::Unavailable => return item,
                    EvalResult::Summary(_) => return EvalResult::Unavailable,
                    other => result.push_str(&other.as_text()),
                }
            }
        }
        EvalResult::Text(result)
    }
}

/// Folds an expanded reference: only numbers count as numbers.
fn fold_reference(total: &mut Aggregate, value: &EvalResult, strict: bool) -> Result<(), EvalResult> {
    let items: &[EvalResult] = match value {
        EvalResult::Array(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    };
    for item in items {
        match item {
            EvalResult::Number(n) => total.add_number(*n),
            EvalResult::Empty => {}
            EvalResult::Summary(summary) => {
                if let (true, Some(e)) = (strict, summary.error) {
                    return Err(EvalResult::Error(e));
                }
                total.merge(summary);
            }
            EvalResult::Error(e) if strict => return Err(EvalResult::Error(*e)),
            EvalResult::Unavailable => return Err(EvalResult::Unavailable),
            EvalResult::Array(nested) => {
                for inner in nested {
                    fold_reference(total, inner, strict)?;
                }
            }
            _ => total.add_non_number(),
        }
    }
    Ok(())
}

fn arithmetic<F>(left: &EvalResult, right: &EvalResult, op: F) -> EvalResult
where
    F: Fn(f64, f64) -> f64,
{
    match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => finite(Ok(op(l, r))),
        _ => EvalResult::Error(CellError::Value),
    }
}

fn finite(result: Result<f64, CellError>) -> EvalResult {
    match result {
        Ok(n) if n.is_finite() => EvalResult::Number(n),
        Ok(_) => EvalResult::Error(CellError::Num),
        Err(e) => EvalResult::Error(e),
    }
}

/// Spreadsheet ordering: numbers < text < booleans; text ignores case.
/// An empty operand takes the neutral value of the other side's type.
fn compare(left: &EvalResult, right: &EvalResult) -> Ordering {
    fn rank(value: &EvalResult) -> u8 {
        match value {
            EvalResult::Text(_) => 1,
            EvalResult::Boolean(_) => 2,
            _ => 0,
        }
    }
    let neutral = |other: &EvalResult| match other {
        EvalResult::Text(_) => EvalResult::Text(String::new()),
        EvalResult::Boolean(_) => EvalResult::Boolean(false),
        _ => EvalResult::Number(0.0),
    };
    let left = if *left == EvalResult::Empty { neutral(right) } else { left.clone() };
    let right = if *right == EvalResult::Empty { neutral(&left) } else { right.clone() };

    match (&left, &right) {
        (EvalResult::Number(l), EvalResult::Number(r)) => l.partial_cmp(r).unwrap_or(Ordering::Equal),
        (EvalResult::Text(l), EvalResult::Text(r)) => l.to_lowercase().cmp(&r.to_lowercase()),
        (EvalResult::Boolean(l), EvalResult::Boolean(r)) => l.cmp(r),
        _ => rank(&left).cmp(&rank(&right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Minimal in-memory workbook: named sheets of sparse cells plus an
    /// optional digest per sheet.
    #[derive(Default)]
    struct MemoryBook {
        names: Vec<String>,
        cells: Vec<BTreeMap<CellCoord, Cell>>,
        digests: Vec<Option<SheetDigest>>,
    }

    impl MemoryBook {
        fn sheet(&mut self, name: &str) -> usize {
            self.names.push(name.to_string());
            self.cells.push(BTreeMap::new());
            self.digests.push(None);
            self.names.len() - 1
        }

        fn set(&mut self, sheet: usize, a1: &str, cell: Cell) {
            let coord = crate::coord::parse_a1(a1).unwrap();
            self.cells[sheet].insert(coord, cell);
        }
    }

    impl WorkbookView for MemoryBook {
        fn sheet_index(&self, name: &str) -> Option<usize> {
            self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
        }

        fn cell(&self, sheet: usize, row: u32, col: u32) -> Option<&Cell> {
            self.cells.get(sheet)?.get(&(row, col))
        }

        fn cells_in(&self, sheet: usize, range: CellRange) -> Vec<(CellCoord, &Cell)> {
            self.cells[sheet]
                .iter()
                .filter(|(coord, _)| range.contains(**coord))
                .map(|(coord, cell)| (*coord, cell))
                .collect()
        }

        fn digest(&self, sheet: usize) -> Option<&SheetDigest> {
            self.digests.get(sheet)?.as_ref()
        }
    }

    fn book() -> (MemoryBook, usize) {
        // A1 = 10, A2 = 20, A3 = 30
        // B1 = 5, B2 = 15, B3 = "Hello"
        let mut book = MemoryBook::default();
        let s = book.sheet("Data");
        book.set(s, "A1", Cell::new_number(10.0));
        book.set(s, "A2", Cell::new_number(20.0));
        book.set(s, "A3", Cell::new_number(30.0));
        book.set(s, "B1", Cell::new_number(5.0));
        book.set(s, "B2", Cell::new_number(15.0));
        book.set(s, "B3", Cell::new_text("Hello"));
        (book, s)
    }

    fn eval(book: &MemoryBook, sheet: usize, formula: &str) -> EvalResult {
        Evaluator::new(book).evaluate_formula(sheet, formula)
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let (book, s) = book();
        assert_eq!(eval(&book, s, "A1+B1*2"), EvalResult::Number(20.0));
        assert_eq!(eval(&book, s, "-A1^2"), EvalResult::Number(100.0));
        assert_eq!(eval(&book, s, "50%"), EvalResult::Number(0.5));
        assert_eq!(eval(&book, s, "A1/0"), EvalResult::Error(CellError::Div0));
        assert_eq!(eval(&book, s, "B3+1"), EvalResult::Error(CellError::Value));
        assert_eq!(eval(&book, s, "C9+1"), EvalResult::Number(1.0));
    }

    #[test]
    fn test_aggregates_over_ranges() {
        let (book, s) = book();
        assert_eq!(eval(&book, s, "SUM(A1:B3)"), EvalResult::Number(80.0));
        assert_eq!(eval(&book, s, "SUM(A:A)"), EvalResult::Number(60.0));
        assert_eq!(eval(&book, s, "SUM(1:1)"), EvalResult::Number(15.0));
        assert_eq!(eval(&book, s, "AVERAGE(A1:A3)"), EvalResult::Number(20.0));
        assert_eq!(eval(&book, s, "COUNT(A1:B3)"), EvalResult::Number(5.0));
        assert_eq!(eval(&book, s, "COUNTA(A1:B3)"), EvalResult::Number(6.0));
        assert_eq!(eval(&book, s, "MAX(A1:A3, 99)"), EvalResult::Number(99.0));
        assert_eq!(eval(&book, s, "MIN(B1:B3)"), EvalResult::Number(5.0));
        assert_eq!(eval(&book, s, "PRODUCT(A1, 2)"), EvalResult::Number(20.0));
        assert_eq!(eval(&book, s, "AVERAGE(C1:C9)"), EvalResult::Error(CellError::Div0));
        assert_eq!(eval(&book, s, "SUM(\"abc\")"), EvalResult::Error(CellError::Value));
    }

    #[test]
    fn test_logical_and_text_functions() {
        let (book, s) = book();
        assert_eq!(eval(&book, s, "IF(A1>5,\"big\",\"small\")"), EvalResult::Text("big".into()));
        assert_eq!(eval(&book, s, "IF(A1<5,1)"), EvalResult::Boolean(false));
        assert_eq!(eval(&book, s, "IFERROR(A1/0,-1)"), EvalResult::Number(-1.0));
        assert_eq!(eval(&book, s, "AND(A1>5,B1>5)"), EvalResult::Boolean(false));
        assert_eq!(eval(&book, s, "OR(A1>5,B1>5)"), EvalResult::Boolean(true));
        assert_eq!(eval(&book, s, "NOT(TRUE)"), EvalResult::Boolean(false));
        assert_eq!(eval(&book, s, "B3=\"hello\""), EvalResult::Boolean(true));
        assert_eq!(eval(&book, s, "\"a\">1"), EvalResult::Boolean(true));
        assert_eq!(eval(&book, s, "LEN(B3)&UPPER(B3)"), EvalResult::Text("5HELLO".into()));
        assert_eq!(eval(&book, s, "TRIM(\"  a   b \")"), EvalResult::Text("a b".into()));
        assert_eq!(eval(&book, s, "MID(B3,2,3)"), EvalResult::Text("ell".into()));
        assert_eq!(eval(&book, s, "RIGHT(B3,2)&LEFT(B3)"), EvalResult::Text("loH".into()));
        assert_eq!(eval(&book, s, "CONCAT(A1:A2,\"!\")"), EvalResult::Text("1020!".into()));
        assert_eq!(eval(&book, s, "ROUND(1.25,1)"), EvalResult::Number(1.3));
        assert_eq!(eval(&book, s, "MOD(-3,2)"), EvalResult::Number(1.0));
        assert_eq!(eval(&book, s, "SQRT(-1)"), EvalResult::Error(CellError::Num));
        assert_eq!(eval(&book, s, "INT(-2.5)"), EvalResult::Number(-3.0));
    }

    #[test]
    fn test_formula_chains_and_cycles() {
        let (mut book, s) = book();
        book.set(s, "C1", Cell::new_formula("=A1*2"));
        book.set(s, "C2", Cell::new_formula("=C1+1"));
        book.set(s, "D1", Cell::new_formula("=D2"));
        book.set(s, "D2", Cell::new_formula("=D1"));
        let evaluator = Evaluator::new(&book);
        assert_eq!(evaluator.evaluate_cell(s, 1, 2), EvalResult::Number(21.0));
        assert_eq!(evaluator.evaluate_cell(s, 0, 3), EvalResult::Error(CellError::Ref));
    }

    #[test]
    fn test_long_reference_chains() {
        let mut book = MemoryBook::default();
        let s = book.sheet("Chain");
        let n = 20_000u32;
        for row in 1..n {
            book.set(s, &format!("A{}", row), Cell::new_formula(&format!("A{}+1", row + 1)));
        }
        book.set(s, &format!("A{}", n), Cell::new_number(1.0));
        // Ranges over formula cells chain the same way.
        book.set(s, "B1", Cell::new_formula("SUM(A1:A3)"));

        {
            let evaluator = Evaluator::new(&book);
            assert_eq!(evaluator.evaluate_cell(s, 0, 0), EvalResult::Number(n as f64));
            assert_eq!(evaluator.evaluate_cell(s, 0, 1), EvalResult::Number(3.0 * n as f64 - 3.0));
        }

        // A cycle closing at the end of a long chain still reports #REF!.
        book.set(s, &format!("A{}", n), Cell::new_formula("A1"));
        let evaluator = Evaluator::new(&book);
        assert_eq!(evaluator.evaluate_cell(s, 0, 0), EvalResult::Error(CellError::Ref));
    }

    #[test]
    fn test_cross_sheet_reference_is_case_insensitive() {
        let (mut book, data) = book();
        let summary = book.sheet("Summary");
        book.set(summary, "A1", Cell::new_formula("SUM(data!A1:A3)+'Data'!B1"));
        let evaluator = Evaluator::new(&book);
        assert_eq!(evaluator.evaluate_cell(summary, 0, 0), EvalResult::Number(65.0));
        assert_eq!(eval(&book, data, "Missing!A1"), EvalResult::Error(CellError::Ref));
    }

    #[test]
    fn test_unavailable_cases() {
        let (mut book, s) = book();
        let mut follower = Cell::new();
        follower.formula = Some(crate::cell::Formula {
            text: String::new(),
            attributes: vec![("t".into(), "shared".into()), ("si".into(), "0".into())],
        });
        book.set(s, "E1", follower);
        assert_eq!(eval(&book, s, "E1+1"), EvalResult::Unavailable);
        assert_eq!(eval(&book, s, "VLOOKUP(1,A1:B3,2)"), EvalResult::Unavailable);
        assert_eq!(eval(&book, s, "SUM(A1:"), EvalResult::Unavailable);
        assert_eq!(EvalResult::Unavailable.to_cell_value(), None);
        assert_eq!(EvalResult::Empty.to_cell_value(), Some(CellValue::Number(0.0)));
    }

    #[test]
    fn test_flushed_rows_answered_from_digest() {
        let mut book = MemoryBook::default();
        let s = book.sheet("Data");
        book.set(s, "B1", Cell::new_text("Amount"));
        let mut digest = SheetDigest::new();
        for row in 1..=250u32 {
            let amount = CellValue::Number(row as f64);
            digest.record_row(row, [(1, &amount)]);
        }
        book.digests[s] = Some(digest);

        // B2:B251 covers every flushed row; B:B too.
        assert_eq!(eval(&book, s, "SUM(B2:B251)"), EvalResult::Number(31375.0));
        assert_eq!(eval(&book, s, "COUNT(B:B)"), EvalResult::Number(250.0));
        assert_eq!(eval(&book, s, "COUNTA(B:B)"), EvalResult::Number(251.0));
        assert_eq!(eval(&book, s, "MAX(B:B)"), EvalResult::Number(250.0));
        // Partial overlap and single flushed cells cannot be answered.
        assert_eq!(eval(&book, s, "SUM(B2:B100)"), EvalResult::Unavailable);
        assert_eq!(eval(&book, s, "B10*2"), EvalResult::Unavailable);
        // Rows past the flushed block are ordinary empty cells.
        assert_eq!(eval(&book, s, "B300+1"), EvalResult::Number(1.0));
    }
}
