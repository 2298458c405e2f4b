//! FILENAME: pivot-engine/src/lib.rs
//! Pivot Table subsystem.
//!
//! Recomputes template pivot tables from rows that stream past once. It
//! depends on `engine` only for shared types (CellValue, CellRange, Aggregate).
//!
//! Layers:
//! - `definition`: what the pivot table IS (read from the template)
//! - `cache`: bounded accumulator fed while rows are flushed
//! - `engine`: renders the accumulated table into cells

pub mod cache;
pub mod definition;
pub mod engine;

pub use cache::{CacheValue, FieldAggregates, OrderedFloat, PivotAccumulator};
pub use definition::*;
pub use engine::{calculate_pivot, PivotView, PivotViewCell};
pub use ::engine::AggregationType;
