//! FILENAME: engine/src/lib.rs
//! PURPOSE: Main library entry point for the spreadsheet engine.
//! CONTEXT: Cell model, coordinates, the Style Manager, running aggregates
//! and the formula evaluator. Nothing here touches the package format.

pub mod aggregate;
pub mod cell;
pub mod coord;
pub mod evaluator;
pub mod style;

// Re-export commonly used types at the crate root
pub use aggregate::{Aggregate, AggregationType, SheetDigest};
pub use cell::{display_value, Cell, CellError, CellType, CellValue, Formula};
pub use coord::{
    col_to_index, coord_to_a1, index_to_col, parse_a1, CellCoord, CellRange, MAX_COL, MAX_ROW,
};
pub use evaluator::{EvalResult, Evaluator, WorkbookView};
pub use style::{StyleError, StyleKey, StyleManager};
