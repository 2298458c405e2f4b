//! FILENAME: engine/src/aggregate.rs
//! PURPOSE: Running aggregates that summarize rows without keeping them.
//! CONTEXT: Once a row leaves the row window it can no longer be read back.
//! Every flushed row is folded into one `Aggregate` per column here, so
//! formulas over whole data columns and pivot tables can still be answered
//! from O(columns) state.

use crate::cell::{CellError, CellValue};
use serde::{Deserialize, Serialize};

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AggregationType {
    #[default]
    Sum,
    Count,
    Average,
    Min,
    Max,
    CountNumbers,
    StdDev,
    StdDevP,
    Var,
    VarP,
    Product,
}

impl AggregationType {
    /// Maps the `subtotal` attribute of a pivot `dataField`.
    /// A missing attribute means `sum`.
    pub fn from_subtotal(name: &str) -> Option<Self> {
        let aggregation = match name {
            "sum" => AggregationType::Sum,
            "count" => AggregationType::Count,
            "average" => AggregationType::Average,
            "min" => AggregationType::Min,
            "max" => AggregationType::Max,
            "countNums" => AggregationType::CountNumbers,
            "stdDev" => AggregationType::StdDev,
            "stdDevp" => AggregationType::StdDevP,
            "var" => AggregationType::Var,
            "varp" => AggregationType::VarP,
            "product" => AggregationType::Product,
            _ => return None,
        };
        Some(aggregation)
    }

    /// Caption prefix used for data field headers ("Sum of Amount").
    pub fn caption(&self) -> &'static str {
        match self {
            AggregationType::Sum => "Sum",
            AggregationType::Count => "Count",
            AggregationType::Average => "Average",
            AggregationType::Min => "Min",
            AggregationType::Max => "Max",
            AggregationType::CountNumbers => "Count",
            AggregationType::StdDev => "StdDev",
            AggregationType::StdDevP => "StdDevp",
            AggregationType::Var => "Var",
            AggregationType::VarP => "Varp",
            AggregationType::Product => "Product",
        }
    }
}

/// Accumulator for all aggregation types in a single pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub sum: f64,
    /// Non-empty values of any kind.
    pub count: u64,
    pub count_numbers: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub product: f64,
    /// Sum of squared differences from the mean (Welford).
    pub m2: f64,
    pub mean: f64,
    pub has_product: bool,
    /// First error value seen, if any.
    pub error: Option<CellError>,
}

impl Aggregate {
    pub fn new() -> Self {
        Aggregate {
            sum: 0.0,
            count: 0,
            count_numbers: 0,
            min: None,
            max: None,
            product: 1.0,
            m2: 0.0,
            mean: 0.0,
            has_product: false,
            error: None,
        }
    }

    pub fn add_number(&mut self, value: f64) {
        self.count += 1;
        self.count_numbers += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));

        if self.has_product {
            self.product *= value;
        } else {
            self.has_product = true;
            self.product = value;
        }

        let delta = value - self.mean;
        self.mean += delta / (self.count_numbers as f64);
        self.m2 += delta * (value - self.mean);
    }

    /// Counts a value that takes no part in numeric aggregation.
    pub fn add_non_number(&mut self) {
        self.count += 1;
    }

    /// Folds one stored cell value. Empty cells are ignored.
    pub fn add_value(&mut self, value: &CellValue) {
        match value {
            CellValue::Empty => {}
            CellValue::Number(n) if n.is_finite() => self.add_number(*n),
            CellValue::Error(e) => {
                self.error.get_or_insert(*e);
                self.add_non_number();
            }
            _ => self.add_non_number(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn compute(&self, aggregation: AggregationType) -> f64 {
        let n = self.count_numbers as f64;
        match aggregation {
            AggregationType::Sum => self.sum,
            AggregationType::Count => self.count as f64,
            AggregationType::CountNumbers => n,
            AggregationType::Average => {
                if self.count_numbers > 0 {
                    self.sum / n
                } else {
                    0.0
                }
            }
            AggregationType::Min => self.min.unwrap_or(0.0),
            AggregationType::Max => self.max.unwrap_or(0.0),
            AggregationType::Product => {
                if self.has_product {
                    self.product
                } else {
                    0.0
                }
            }
            AggregationType::Var if self.count_numbers > 1 => self.m2 / (n - 1.0),
            AggregationType::VarP if self.count_numbers > 0 => self.m2 / n,
            AggregationType::StdDev if self.count_numbers > 1 => (self.m2 / (n - 1.0)).sqrt(),
            AggregationType::StdDevP if self.count_numbers > 0 => (self.m2 / n).sqrt(),
            AggregationType::Var
            | AggregationType::VarP
            | AggregationType::StdDev
            | AggregationType::StdDevP => 0.0,
        }
    }

    /// Like [`Aggregate::compute`] but reports spreadsheet errors where a
    /// spreadsheet would (average of nothing, sample variance of one value).
    pub fn evaluate(&self, aggregation: AggregationType) -> Result<f64, CellError> {
        match aggregation {
            AggregationType::Average if self.count_numbers == 0 => Err(CellError::Div0),
            AggregationType::Var | AggregationType::StdDev if self.count_numbers < 2 => {
                Err(CellError::Div0)
            }
            AggregationType::VarP | AggregationType::StdDevP if self.count_numbers == 0 => {
                Err(CellError::Div0)
            }
            _ => Ok(self.compute(aggregation)),
        }
    }

    /// Merges another accumulator into this one (parallel Welford).
    pub fn merge(&mut self, other: &Aggregate) {
        if other.count == 0 {
            return;
        }

        let combined = self.count_numbers + other.count_numbers;
        if self.count_numbers > 0 && other.count_numbers > 0 {
            let delta = other.mean - self.mean;
            let new_mean = self.mean + delta * (other.count_numbers as f64) / (combined as f64);
            self.m2 = self.m2
                + other.m2
                + delta * delta * (self.count_numbers as f64) * (other.count_numbers as f64)
                    / (combined as f64);
            self.mean = new_mean;
        } else if other.count_numbers > 0 {
            self.mean = other.mean;
            self.m2 = other.m2;
        }

        self.sum += other.sum;
        self.count += other.count;
        self.count_numbers = combined;

        if let Some(other_min) = other.min {
            self.min = Some(self.min.map_or(other_min, |m| m.min(other_min)));
        }
        if let Some(other_max) = other.max {
            self.max = Some(self.max.map_or(other_max, |m| m.max(other_max)));
        }
        if other.has_product {
            if self.has_product {
                self.product *= other.product;
            } else {
                self.product = other.product;
                self.has_product = true;
            }
        }
        if self.error.is_none() {
            self.error = other.error;
        }
    }
}

impl Default for Aggregate {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SHEET DIGEST
// ============================================================================

/// Per-column summary of every row a streamed sheet has flushed.
#[derive(Debug, Clone, Default)]
pub struct SheetDigest {
    first_row: Option<u32>,
    last_row: Option<u32>,
    columns: Vec<Aggregate>,
}

impl SheetDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one flushed row. Rows arrive in ascending order.
    pub fn record_row<'a, I>(&mut self, row: u32, cells: I)
    where
        I: IntoIterator<Item = (u32, &'a CellValue)>,
    {
        self.first_row.get_or_insert(row);
        self.last_row = Some(row);
        for (col, value) in cells {
            let col = col as usize;
            if self.columns.len() <= col {
                self.columns.resize_with(col + 1, Aggregate::new);
            }
            self.columns[col].add_value(value);
        }
    }

    /// Inclusive span of flushed rows, if any row was flushed.
    pub fn row_span(&self) -> Option<(u32, u32)> {
        Some((self.first_row?, self.last_row?))
    }

    pub fn column(&self, col: u32) -> Option<&Aggregate> {
        self.columns.get(col as usize)
    }

    /// Merged aggregate over an inclusive column span.
    pub fn summarize(&self, first_col: u32, last_col: u32) -> Aggregate {
        let mut total = Aggregate::new();
        let end = (last_col as usize).min(self.columns.len().saturating_sub(1));
        for col in first_col as usize..=end {
            if let Some(aggregate) = self.columns.get(col) {
                total.merge(aggregate);
            }
        }
        total
    }
}
