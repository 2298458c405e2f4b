//! FILENAME: pivot-engine/src/engine.rs
//! Pivot Engine - turns accumulated aggregates into cells.
//!
//! Layout (values on columns, compact form):
//! 1. Header row: row-axis caption, then one caption per data field
//! 2. One row per item, in first-appearance order
//! 3. Grand total row
//!
//! The result is positioned at the top-left corner of the pivot location.

use crate::cache::PivotAccumulator;
use crate::definition::PivotDefinition;
use engine::{CellError, CellRange, CellValue};

/// A single rendered cell, in sheet coordinates (0-based).
#[derive(Debug, Clone, PartialEq)]
pub struct PivotViewCell {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
}

/// The rendered table plus the area it occupies.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotView {
    pub cells: Vec<PivotViewCell>,
    pub range: CellRange,
}

impl PivotView {
    pub fn rows(&self) -> u32 {
        self.range.rows()
    }
}

/// Renders `accumulator` at the location of `definition`.
pub fn calculate_pivot(definition: &PivotDefinition, accumulator: &PivotAccumulator) -> PivotView {
    let (top, left) = definition.location.first;
    let mut cells = Vec::with_capacity((accumulator.item_count() + 2) * (definition.data_fields.len() + 1));

    // Header
    cells.push(PivotViewCell {
        row: top,
        col: left,
        value: CellValue::Text(definition.row_header().to_string()),
    });
    for (i, field) in definition.data_fields.iter().enumerate() {
        cells.push(PivotViewCell {
            row: top,
            col: left + 1 + i as u32,
            value: CellValue::Text(field.name.clone()),
        });
    }

    // Items
    let mut row = top + 1;
    for (item, aggregates) in accumulator.items() {
        cells.push(PivotViewCell {
            row,
            col: left,
            value: item.to_cell_value(),
        });
        for (i, field) in definition.data_fields.iter().enumerate() {
            cells.push(PivotViewCell {
                row,
                col: left + 1 + i as u32,
                value: aggregate_value(aggregates.get(i), field.aggregation),
            });
        }
        row += 1;
    }

    // Grand total
    cells.push(PivotViewCell {
        row,
        col: left,
        value: CellValue::Text(definition.grand_total().to_string()),
    });
    for (i, field) in definition.data_fields.iter().enumerate() {
        cells.push(PivotViewCell {
            row,
            col: left + 1 + i as u32,
            value: aggregate_value(accumulator.grand_total().get(i), field.aggregation),
        });
    }

    let range = CellRange::new((top, left), (row, left + definition.data_fields.len() as u32));
    PivotView { cells, range }
}

fn aggregate_value(aggregate: Option<&engine::Aggregate>, aggregation: engine::AggregationType) -> CellValue {
    match aggregate.map(|a| a.evaluate(aggregation)) {
        Some(Ok(n)) => CellValue::Number(n),
        Some(Err(e)) => CellValue::Error(e),
        None => CellValue::Error(CellError::Ref),
    }
}
