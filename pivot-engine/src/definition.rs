//! FILENAME: pivot-engine/src/definition.rs
//! Pivot Table Definition - what a template pivot table IS.
//!
//! These structures describe a pivot table found in a template package:
//! where its source data lives, which source columns sit on which axis and
//! how value fields aggregate. They are read from the package once per
//! generation and never mutated while rows stream.

use engine::{AggregationType, CellRange};
use serde::{Deserialize, Serialize};

/// Index into the source data columns (0-based from the source range).
pub type FieldIndex = usize;

/// Caption used for the row axis header when the template gives none.
pub const DEFAULT_ROW_HEADER: &str = "Row Labels";
/// Caption used for the grand total row when the template gives none.
pub const DEFAULT_GRAND_TOTAL: &str = "Grand Total";

/// A value field with its aggregation function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataField {
    pub source_index: FieldIndex,
    /// Header caption, e.g. "Sum of Amount".
    pub name: String,
    pub aggregation: AggregationType,
}

impl DataField {
    pub fn new(source_index: FieldIndex, name: impl Into<String>, aggregation: AggregationType) -> Self {
        DataField {
            source_index,
            name: name.into(),
            aggregation,
        }
    }
}

/// Whether a pivot table can be recomputed from streamed rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PivotShape {
    /// One row field, no column or page fields, at least one data field.
    SingleRowField { row_field: FieldIndex },
    /// Anything else; only the source range and refresh flag are updated.
    Unsupported(String),
}

/// The full configuration of one pivot table and its cache source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotDefinition {
    pub name: String,
    /// Sheet holding the source data (`worksheetSource sheet`).
    pub source_sheet: String,
    /// Source rectangle including its header row.
    pub source_range: CellRange,
    /// Cache field names, one per source column.
    pub field_names: Vec<String>,
    pub row_fields: Vec<FieldIndex>,
    pub column_fields: Vec<FieldIndex>,
    pub page_fields: Vec<FieldIndex>,
    pub data_fields: Vec<DataField>,
    /// Where the rendered table sits on its host sheet.
    pub location: CellRange,
    pub row_header_caption: Option<String>,
    pub grand_total_caption: Option<String>,
}

impl PivotDefinition {
    pub fn new(name: impl Into<String>, source_sheet: impl Into<String>, source_range: CellRange) -> Self {
        PivotDefinition {
            name: name.into(),
            source_sheet: source_sheet.into(),
            source_range,
            field_names: Vec::new(),
            row_fields: Vec::new(),
            column_fields: Vec::new(),
            page_fields: Vec::new(),
            data_fields: Vec::new(),
            location: source_range,
            row_header_caption: None,
            grand_total_caption: None,
        }
    }

    pub fn shape(&self) -> PivotShape {
        if !self.column_fields.is_empty() {
            return PivotShape::Unsupported("column fields".to_string());
        }
        if !self.page_fields.is_empty() {
            return PivotShape::Unsupported("page fields".to_string());
        }
        if self.data_fields.is_empty() {
            return PivotShape::Unsupported("no data fields".to_string());
        }
        let width = self.source_range.columns() as usize;
        if self.data_fields.iter().any(|f| f.source_index >= width) {
            return PivotShape::Unsupported("data field outside source range".to_string());
        }
        match self.row_fields.as_slice() {
            [row_field] if *row_field < width => PivotShape::SingleRowField { row_field: *row_field },
            [_] => PivotShape::Unsupported("row field outside source range".to_string()),
            fields => PivotShape::Unsupported(format!("{} row fields", fields.len())),
        }
    }

    /// Header row of the source range.
    pub fn header_row(&self) -> u32 {
        self.source_range.first.0
    }

    /// Sheet column of a source field.
    pub fn source_column(&self, field: FieldIndex) -> u32 {
        self.source_range.first.1 + field as u32
    }

    pub fn row_header(&self) -> &str {
        self.row_header_caption.as_deref().unwrap_or(DEFAULT_ROW_HEADER)
    }

    pub fn grand_total(&self) -> &str {
        self.grand_total_caption.as_deref().unwrap_or(DEFAULT_GRAND_TOTAL)
    }
}
