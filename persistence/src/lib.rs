//! FILENAME: persistence/src/lib.rs
//! Persistence Module
//!
//! Reads template packages (zipped SpreadsheetML) and writes finished ones.
//! A template is parsed into a [`Workbook`] that keeps every part it does not
//! model as raw bytes; a [`StreamingWorkbook`] wraps it so rows can be
//! written to a sheet while only a bounded window of them stays in memory.

mod cell_xml;
mod error;
mod evaluation;
mod factory;
mod package;
mod pivot;
mod security;
mod shared_strings;
mod sheet;
mod streaming;
mod styles;
mod xlsx_reader;
mod xlsx_writer;
mod xml;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cell_xml::StringPolicy;
pub use error::PersistenceError;
pub use evaluation::EvaluationSummary;
pub use factory::{
    Document, DocumentFactory, DocumentFactoryExt, Streamed, WithFallback, WithTransformation,
    XlsxDocumentFactory,
};
pub use pivot::PivotTable;
pub use security::{
    ArchiveLimits, Chain, GuardError, InflateLimits, SecurityGate, StreamPolicy, TemplateSource,
    DEFAULT_MAX_ENTRIES, DEFAULT_MAX_ENTRY_BYTES, GRACE_ENTRY_SIZE,
};
pub use shared_strings::SharedStrings;
pub use sheet::{Row, Sheet};
pub use streaming::{SheetStats, StreamingConfig, StreamingWorkbook};
pub use xlsx_reader::load_xlsx;
pub use styles::{StyleSheet, FIRST_CUSTOM_NUM_FMT};

use crate::package::{ContentTypes, Package, Relationships};
use log::info;
use std::io::{Seek, Write};

// ============================================================================
// SHEET ORDER
// ============================================================================

/// Sheet names in the order the template's `workbook.xml` lists them.
/// Lookups ignore ASCII case, as spreadsheet applications do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetOrder {
    names: Vec<String>,
}

impl SheetOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `name` unless an equal name is already present. Returns its
    /// position.
    pub fn push(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        match self.position(&name) {
            Some(existing) => existing,
            None => {
                self.names.push(name);
                self.names.len() - 1
            }
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn name(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ============================================================================
// WORKBOOK
// ============================================================================

/// A parsed template package.
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub(crate) package: Package,
    pub(crate) content_types: ContentTypes,
    pub(crate) workbook_part: String,
    pub(crate) workbook_rels: Relationships,
    /// Indexed by [`SheetOrder`] position.
    pub(crate) sheets: Vec<Sheet>,
    pub(crate) sheet_order: SheetOrder,
    pub(crate) shared_strings: SharedStrings,
    pub(crate) shared_strings_part: Option<String>,
    pub(crate) styles: StyleSheet,
    pub(crate) styles_part: Option<String>,
    pub(crate) pivots: Vec<PivotTable>,
    pub(crate) full_calc_on_load: bool,
}

impl Workbook {
    /// A document with no sheets, used whenever a template is unusable.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet_order(&self) -> &SheetOrder {
        &self.sheet_order
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheet_order.position(name)
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Sheet> {
        self.sheets.get_mut(index)
    }

    pub fn sheet_by_name(&self, name: &str) -> Option<&Sheet> {
        self.sheet_index(name).and_then(|i| self.sheets.get(i))
    }

    pub fn sheets(&self) -> impl Iterator<Item = &Sheet> {
        self.sheets.iter()
    }

    pub fn styles(&self) -> &StyleSheet {
        &self.styles
    }

    pub fn styles_mut(&mut self) -> &mut StyleSheet {
        &mut self.styles
    }

    pub fn shared_strings(&self) -> &SharedStrings {
        &self.shared_strings
    }

    pub fn pivot_tables(&self) -> &[PivotTable] {
        &self.pivots
    }

    pub fn full_calc_on_load(&self) -> bool {
        self.full_calc_on_load
    }

    /// Asks readers to recalculate every formula when the file is opened.
    pub fn set_full_calc_on_load(&mut self, on: bool) {
        self.full_calc_on_load = on;
    }

    /// Recomputes every pivot table from the rows of its source sheet.
    /// Returns how many tables were re-rendered.
    pub fn refresh_pivots(&mut self) -> usize {
        let mut rendered = 0;
        for i in 0..self.pivots.len() {
            let pivot = &self.pivots[i];
            let source = self.sheet_order.position(&pivot.definition.source_sheet);
            let host = self.sheet_order.position(&pivot.host_sheet);

            let last_row = source.and_then(|s| self.sheets[s].last_row_num());
            let accumulator = match (pivot.accumulator(), source) {
                (Some(mut acc), Some(s)) => {
                    for row in self.sheets[s].rows() {
                        pivot.feed(&mut acc, row);
                    }
                    Some(acc)
                }
                _ => None,
            };
            let host = host.and_then(|h| self.sheets.get_mut(h));
            if self.pivots[i].refresh(last_row, accumulator.as_ref(), host).is_some() {
                rendered += 1;
            }
        }
        info!("refreshed {} pivot tables, {} re-rendered", self.pivots.len(), rendered);
        rendered
    }

    /// Evaluates every formula and stores the results as cached values.
    pub fn evaluate_formulas(&mut self) -> EvaluationSummary {
        let digests = vec![None; self.sheets.len()];
        let summary = evaluation::evaluate_sheets(&mut self.sheets, &digests);
        if summary.unavailable > 0 {
            self.full_calc_on_load = true;
        }
        summary
    }

    /// Serializes the package.
    pub fn write<W: Write + Seek>(&mut self, out: W) -> Result<W, PersistenceError> {
        xlsx_writer::write_workbook(self, out, &mut xlsx_writer::TemplateRows)
    }
}
