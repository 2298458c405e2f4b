//! FILENAME: engine/src/cell.rs
//! PURPOSE: Defines the fundamental data structures for a single spreadsheet cell.
//! CONTEXT: This file contains the `Cell` struct, the `CellValue` enum and the
//! closed `CellType` set the sheet writer serializes. It separates the formula
//! text from the cached result so readers never have to recalculate.
//! It is designed to be lightweight as millions of these instances pass
//! through the row window.

use serde::{Deserialize, Serialize};

/// Errors a cell can hold, with their canonical spreadsheet spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellError {
    Null,        // #NULL!
    Div0,        // #DIV/0!
    Value,       // #VALUE!
    Ref,         // #REF!
    Name,        // #NAME?
    Num,         // #NUM!
    NA,          // #N/A
    GettingData, // #GETTING_DATA
}

impl CellError {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellError::Null => "#NULL!",
            CellError::Div0 => "#DIV/0!",
            CellError::Value => "#VALUE!",
            CellError::Ref => "#REF!",
            CellError::Name => "#NAME?",
            CellError::Num => "#NUM!",
            CellError::NA => "#N/A",
            CellError::GettingData => "#GETTING_DATA",
        }
    }

    /// Parses the text stored in a `<v>` element of an error cell.
    pub fn from_code(code: &str) -> Option<Self> {
        let error = match code.trim().to_ascii_uppercase().as_str() {
            "#NULL!" => CellError::Null,
            "#DIV/0!" => CellError::Div0,
            "#VALUE!" => CellError::Value,
            "#REF!" => CellError::Ref,
            "#NAME?" => CellError::Name,
            "#NUM!" => CellError::Num,
            "#N/A" => CellError::NA,
            "#GETTING_DATA" => CellError::GettingData,
            _ => return None,
        };
        Some(error)
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the calculated result or raw data within a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

/// The closed set of cell kinds the sheet writer knows how to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    Blank,
    Formula,
    String,
    Numeric,
    Boolean,
    Error,
}

/// Formula text (without the leading '=') plus the `<f>` attributes the
/// template carried (`t`, `ref`, `si`, `ca`, ...), kept verbatim so shared
/// and array formulas survive untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub text: String,
    pub attributes: Vec<(String, String)>,
}

impl Formula {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let text = text.strip_prefix('=').map(str::to_string).unwrap_or(text);
        Formula {
            text,
            attributes: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// A shared-formula follower carries only `t="shared" si=".."`; its text
    /// lives on the master cell.
    pub fn is_shared_follower(&self) -> bool {
        self.attribute("t") == Some("shared") && self.text.trim().is_empty()
    }
}

/// The atomic unit of the spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// For formula cells this is the cached result of the last evaluation.
    pub value: CellValue,
    pub formula: Option<Formula>,
    /// Cell format index (`s` attribute). `None` means "no explicit style";
    /// the writer may still resolve a column style for it.
    pub style: Option<u32>,
}

impl Cell {
    pub fn new() -> Self {
        Cell {
            value: CellValue::Empty,
            formula: None,
            style: None,
        }
    }

    pub fn new_number(num: f64) -> Self {
        Cell {
            value: CellValue::Number(num),
            ..Cell::new()
        }
    }

    pub fn new_text(text: impl Into<String>) -> Self {
        Cell {
            value: CellValue::Text(text.into()),
            ..Cell::new()
        }
    }

    pub fn new_boolean(value: bool) -> Self {
        Cell {
            value: CellValue::Boolean(value),
            ..Cell::new()
        }
    }

    pub fn new_error(error: CellError) -> Self {
        Cell {
            value: CellValue::Error(error),
            ..Cell::new()
        }
    }

    pub fn new_formula(formula: impl Into<String>) -> Self {
        Cell {
            formula: Some(Formula::new(formula)),
            ..Cell::new()
        }
    }

    pub fn with_style(mut self, style: Option<u32>) -> Self {
        self.style = style;
        self
    }

    pub fn cell_type(&self) -> CellType {
        if self.formula.is_some() {
            return CellType::Formula;
        }
        match self.value {
            CellValue::Empty => CellType::Blank,
            CellValue::Number(_) => CellType::Numeric,
            CellValue::Text(_) => CellType::String,
            CellValue::Boolean(_) => CellType::Boolean,
            CellValue::Error(_) => CellType::Error,
        }
    }

    /// Returns the display value of the cell as a String.
    /// Used for pivot item labels and header captions.
    pub fn display_value(&self) -> String {
        display_value(&self.value)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a value without unnecessary decimal places.
pub fn display_value(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{:.0}", n)
            } else {
                format!("{}", n)
            }
        }
        CellValue::Text(s) => s.clone(),
        CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellValue::Error(e) => e.as_str().to_string(),
    }
}
