//! FILENAME: pivot-engine/src/cache.rs
//! Pivot Accumulator - folds source records into per-item aggregates.
//!
//! Records are never stored. Each record is reduced to its row-field item and
//! one `Aggregate` per data field, so memory is bounded by the number of
//! distinct items, not by the number of rows that streamed through.
//!
//! Items keep first-appearance order, which is also the render order.

use crate::definition::{FieldIndex, PivotDefinition, PivotShape};
use engine::{display_value, Aggregate, CellValue};
use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ============================================================================
// VALUE INTERNING
// ============================================================================

/// A normalized, hashable representation of a cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheValue {
    Empty,
    Number(OrderedFloat),
    Text(String),
    Boolean(bool),
    Error(String),
}

impl From<&CellValue> for CacheValue {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => CacheValue::Empty,
            CellValue::Number(n) => CacheValue::Number(OrderedFloat(*n)),
            CellValue::Text(s) if s.is_empty() => CacheValue::Empty,
            CellValue::Text(s) => CacheValue::Text(s.clone()),
            CellValue::Boolean(b) => CacheValue::Boolean(*b),
            CellValue::Error(e) => CacheValue::Error(e.as_str().to_string()),
        }
    }
}

impl CacheValue {
    /// The value written into the item column of the rendered table.
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            CacheValue::Empty => CellValue::Text("(blank)".to_string()),
            CacheValue::Number(n) => CellValue::Number(n.0),
            CacheValue::Text(s) => CellValue::Text(s.clone()),
            CacheValue::Boolean(b) => CellValue::Boolean(*b),
            CacheValue::Error(e) => CellValue::Text(e.clone()),
        }
    }

    pub fn label(&self) -> String {
        display_value(&self.to_cell_value())
    }
}

/// f64 wrapper usable as a hash key. All NaNs are equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        (self.0.is_nan() && other.0.is_nan()) || self.0 == other.0
    }
}

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.0.is_nan() {
            u64::MAX.hash(state);
        } else if self.0 == 0.0 {
            // 0.0 and -0.0 compare equal
            0u64.hash(state);
        } else {
            self.0.to_bits().hash(state);
        }
    }
}

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// One accumulator per data field; almost every pivot has one or two.
pub type FieldAggregates = SmallVec<[Aggregate; 2]>;

/// Streaming accumulator for a single-row-field pivot table.
#[derive(Debug, Clone)]
pub struct PivotAccumulator {
    row_field: FieldIndex,
    data_fields: Vec<FieldIndex>,
    item_index: FxHashMap<CacheValue, usize>,
    items: Vec<(CacheValue, FieldAggregates)>,
    grand_total: FieldAggregates,
    records: u64,
}

impl PivotAccumulator {
    /// Returns `None` when the pivot shape cannot be recomputed from records.
    pub fn for_definition(definition: &PivotDefinition) -> Option<Self> {
        match definition.shape() {
            PivotShape::SingleRowField { row_field } => Some(PivotAccumulator::new(
                row_field,
                definition.data_fields.iter().map(|f| f.source_index).collect(),
            )),
            PivotShape::Unsupported(reason) => {
                debug!("pivot '{}' is not recomputed: {}", definition.name, reason);
                None
            }
        }
    }

    pub fn new(row_field: FieldIndex, data_fields: Vec<FieldIndex>) -> Self {
        let empty = data_fields.iter().map(|_| Aggregate::new()).collect();
        PivotAccumulator {
            row_field,
            data_fields,
            item_index: FxHashMap::default(),
            items: Vec::new(),
            grand_total: empty,
            records: 0,
        }
    }

    /// Folds one source record. `value_at` returns the record's value for a
    /// source field (missing cells are `None`).
    pub fn add_record<'a, F>(&mut self, value_at: F)
    where
        F: Fn(FieldIndex) -> Option<&'a CellValue>,
    {
        let key = value_at(self.row_field)
            .map(CacheValue::from)
            .unwrap_or(CacheValue::Empty);

        let slot = match self.item_index.get(&key) {
            Some(slot) => *slot,
            None => {
                let slot = self.items.len();
                let empty = self.data_fields.iter().map(|_| Aggregate::new()).collect();
                self.items.push((key.clone(), empty));
                self.item_index.insert(key, slot);
                slot
            }
        };

        for (i, field) in self.data_fields.iter().enumerate() {
            if let Some(value) = value_at(*field) {
                self.items[slot].1[i].add_value(value);
                self.grand_total[i].add_value(value);
            }
        }
        self.records += 1;
    }

    /// Items in first-appearance order with their per-field aggregates.
    pub fn items(&self) -> impl Iterator<Item = (&CacheValue, &FieldAggregates)> {
        self.items.iter().map(|(key, aggregates)| (key, aggregates))
    }

    pub fn grand_total(&self) -> &FieldAggregates {
        &self.grand_total
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn record_count(&self) -> u64 {
        self.records
    }
}
