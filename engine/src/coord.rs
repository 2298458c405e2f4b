//! FILENAME: engine/src/coord.rs
//! PURPOSE: Conversions between A1 notation and numeric coordinates.
//! CONTEXT: Internally rows and columns are 0-based. Column "A" = 0, "AA" = 26.
//! Row 1 in A1 notation = row 0 internally. Package XML always speaks A1, so
//! these helpers sit on the hot path of both the reader and the row writer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cell coordinate as (row, col) with 0-based indices.
pub type CellCoord = (u32, u32);

/// Largest column index a worksheet accepts (XFD).
pub const MAX_COL: u32 = 16_383;
/// Largest row index a worksheet accepts.
pub const MAX_ROW: u32 = 1_048_575;

/// Converts a column string ("A", "aa", "XFD") to a 0-based index.
/// Returns `None` for empty input, non-letters or columns past XFD.
pub fn col_to_index(col_str: &str) -> Option<u32> {
    if col_str.is_empty() || col_str.len() > 3 {
        return None;
    }
    let mut result: u32 = 0;
    for c in col_str.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        result = result * 26 + digit;
    }
    let index = result - 1;
    (index <= MAX_COL).then_some(index)
}

/// Converts a 0-based column index to its letters.
/// 0 -> "A", 25 -> "Z", 26 -> "AA".
pub fn index_to_col(mut col_index: u32) -> String {
    let mut letters = Vec::with_capacity(3);
    loop {
        letters.push(b'A' + (col_index % 26) as u8);
        if col_index < 26 {
            break;
        }
        col_index = col_index / 26 - 1;
    }
    letters.iter().rev().map(|b| *b as char).collect()
}

/// Parses "B7", "$B$7" or "b7" into a 0-based (row, col).
pub fn parse_a1(reference: &str) -> Option<CellCoord> {
    let cleaned: String = reference.chars().filter(|c| *c != '$').collect();
    let split = cleaned.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cleaned.split_at(split);
    let col = col_to_index(letters)?;
    let row: u32 = digits.parse().ok()?;
    if row == 0 || row - 1 > MAX_ROW {
        return None;
    }
    Some((row - 1, col))
}

/// Converts a 0-based (row, col) coordinate to an A1 reference.
/// (0, 0) -> "A1", (99, 26) -> "AA100"
pub fn coord_to_a1(coord: CellCoord) -> String {
    let (row, col) = coord;
    format!("{}{}", index_to_col(col), row + 1)
}

/// Inclusive rectangle of cells, normalized so `first` is top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub first: CellCoord,
    pub last: CellCoord,
}

impl CellRange {
    pub fn new(a: CellCoord, b: CellCoord) -> Self {
        CellRange {
            first: (a.0.min(b.0), a.1.min(b.1)),
            last: (a.0.max(b.0), a.1.max(b.1)),
        }
    }

    pub fn single(coord: CellCoord) -> Self {
        CellRange::new(coord, coord)
    }

    /// Parses "A1:D20" or a single reference "C3".
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once(':') {
            Some((start, end)) => Some(CellRange::new(parse_a1(start)?, parse_a1(end)?)),
            None => parse_a1(text).map(CellRange::single),
        }
    }

    pub fn rows(&self) -> u32 {
        self.last.0 - self.first.0 + 1
    }

    pub fn columns(&self) -> u32 {
        self.last.1 - self.first.1 + 1
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        coord.0 >= self.first.0
            && coord.0 <= self.last.0
            && coord.1 >= self.first.1
            && coord.1 <= self.last.1
    }

    /// Returns the smallest range covering both.
    pub fn union(&self, other: &CellRange) -> CellRange {
        CellRange {
            first: (self.first.0.min(other.first.0), self.first.1.min(other.first.1)),
            last: (self.last.0.max(other.last.0), self.last.1.max(other.last.1)),
        }
    }

    /// Same columns, last row moved to `row` (never shrinks).
    pub fn extend_to_row(&self, row: u32) -> CellRange {
        CellRange {
            first: self.first,
            last: (self.last.0.max(row), self.last.1),
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", coord_to_a1(self.first))
        } else {
            write!(f, "{}:{}", coord_to_a1(self.first), coord_to_a1(self.last))
        }
    }
}
