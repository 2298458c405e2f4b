//! FILENAME: persistence/src/streaming.rs
//! PURPOSE: Writes rows to template sheets while keeping only a bounded
//! window of them in memory.
//! CONTEXT: The template [`Workbook`] stays fully parsed for its styles,
//! strings and structure. Each sheet that receives rows gets a
//! [`StreamingSheet`] that points back at its template sheet by index; rows
//! leaving the window are serialized to a spill file and folded into the
//! sheet's digest and any pivot tables that read from it. Serialization
//! splices the spill between the template rows.

use crate::cell_xml::{write_row, StringPolicy};
use crate::evaluation::{self, EvaluationSummary};
use crate::pivot::PivotTable;
use crate::shared_strings::SharedStrings;
use crate::sheet::{Row, Sheet};
use crate::xlsx_writer::{self, SheetRows, TemplateRows};
use crate::{PersistenceError, Workbook};
use engine::{CellRange, SheetDigest, StyleManager, MAX_ROW};
use log::{debug, info, warn};
use pivot_engine::PivotAccumulator;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};

const DEFAULT_WINDOW: usize = 100;

/// How a streamed workbook writes rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Rows kept in memory per sheet.
    pub window: usize,
    pub string_policy: StringPolicy,
    pub style_max_columns: usize,
    pub style_max_keys: usize,
}

impl StreamingConfig {
    pub fn new(window: usize) -> Self {
        StreamingConfig {
            window,
            string_policy: StringPolicy::Inline,
            style_max_columns: engine::style::DEFAULT_MAX_COLUMNS,
            style_max_keys: engine::style::DEFAULT_MAX_KEYS,
        }
    }

    pub fn with_shared_strings(mut self, shared: bool) -> Self {
        self.string_policy = if shared {
            StringPolicy::Shared
        } else {
            StringPolicy::Inline
        };
        self
    }

    pub fn with_style_bounds(mut self, max_columns: usize, max_keys: usize) -> Self {
        self.style_max_columns = max_columns;
        self.style_max_keys = max_keys;
        self
    }

    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.window == 0 {
            return Err(PersistenceError::InvalidWindow);
        }
        Ok(())
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig::new(DEFAULT_WINDOW)
    }
}

/// Counters for one streamed sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SheetStats {
    pub resident_rows: usize,
    /// Highest number of resident rows observed after a row was created.
    pub peak_resident_rows: usize,
    /// Flush passes that wrote at least one row.
    pub flush_count: u64,
    pub rows_flushed: u64,
    pub last_flushed: Option<u32>,
}

// ============================================================================
// STREAMING SHEET
// ============================================================================

/// Write-side state of one sheet. Owns nothing of the template.
#[derive(Debug)]
pub(crate) struct StreamingSheet {
    /// Index of the backing sheet in the template workbook.
    template: usize,
    name: String,
    pending: BTreeMap<u32, Row>,
    /// Last template row; streamed rows must come after it.
    template_last_row: Option<u32>,
    first_spilled: Option<u32>,
    spill: BufWriter<File>,
    spilled_bytes: u64,
    scratch: Vec<u8>,
    digest: SheetDigest,
    extent: Option<CellRange>,
    stats: SheetStats,
}

impl StreamingSheet {
    fn new(template: usize, sheet: &Sheet) -> io::Result<Self> {
        Ok(StreamingSheet {
            template,
            name: sheet.name().to_string(),
            pending: BTreeMap::new(),
            template_last_row: sheet.last_row_num(),
            first_spilled: None,
            spill: BufWriter::new(tempfile::tempfile()?),
            spilled_bytes: 0,
            scratch: Vec::with_capacity(1024),
            digest: SheetDigest::new(),
            extent: None,
            stats: SheetStats::default(),
        })
    }

    /// Highest row index that can no longer be created.
    fn floor(&self) -> Option<u32> {
        match (self.template_last_row, self.stats.last_flushed) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn last_row_num(&self) -> Option<u32> {
        let pending = self.pending.keys().next_back().copied();
        match (pending, self.floor()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn copy_spill(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        self.spill.flush()?;
        let file = self.spill.get_mut();
        file.seek(SeekFrom::Start(0))?;
        let copied = io::copy(file, out)?;
        file.seek(SeekFrom::End(0))?;
        Ok(copied)
    }
}

/// Pivot table whose source sheet exists in the template.
#[derive(Debug)]
struct PivotTracker {
    pivot: usize,
    source: usize,
    accumulator: Option<PivotAccumulator>,
}

/// Everything a flush touches besides the sheet itself.
struct FlushContext<'a> {
    strings: &'a mut SharedStrings,
    policy: StringPolicy,
    styles: &'a StyleManager,
    pivots: &'a [PivotTable],
    trackers: &'a mut [PivotTracker],
}

/// Serializes and evicts the lowest rows until at most `keep` remain.
fn flush(sheet: &mut StreamingSheet, keep: usize, ctx: &mut FlushContext<'_>) -> Result<usize, PersistenceError> {
    let styles = ctx.styles;
    let key = styles.key(&sheet.name);
    let mut flushed = 0usize;
    while sheet.pending.len() > keep {
        let Some((index, row)) = sheet.pending.pop_first() else {
            break;
        };

        sheet.scratch.clear();
        write_row(&mut sheet.scratch, &row, ctx.strings, ctx.policy, |col| {
            key.and_then(|k| styles.style_at(col, k))
        })?;
        sheet.spill.write_all(&sheet.scratch)?;
        sheet.spilled_bytes += sheet.scratch.len() as u64;

        sheet.digest.record_row(index, row.cells().map(|(col, cell)| (col, &cell.value)));
        if let Some((first, last)) = row.column_span() {
            let span = CellRange::new((index, first), (index, last));
            sheet.extent = Some(match sheet.extent {
                Some(extent) => extent.union(&span),
                None => span,
            });
        }
        for tracker in ctx.trackers.iter_mut().filter(|t| t.source == sheet.template) {
            if let Some(acc) = tracker.accumulator.as_mut() {
                ctx.pivots[tracker.pivot].feed(acc, &row);
            }
        }

        sheet.first_spilled.get_or_insert(index);
        sheet.stats.last_flushed = Some(index);
        flushed += 1;
    }
    if flushed > 0 {
        sheet.stats.flush_count += 1;
        sheet.stats.rows_flushed += flushed as u64;
    }
    sheet.stats.resident_rows = sheet.pending.len();
    Ok(flushed)
}

// ============================================================================
// STREAMING WORKBOOK
// ============================================================================

/// A template workbook that accepts an unbounded number of rows per sheet.
#[derive(Debug)]
pub struct StreamingWorkbook {
    template: Workbook,
    config: StreamingConfig,
    streams: Vec<StreamingSheet>,
    /// Template sheet index -> slot in `streams`.
    forward: Vec<Option<usize>>,
    styles: StyleManager,
    trackers: Vec<PivotTracker>,
}

impl StreamingWorkbook {
    pub fn new(template: Workbook, config: StreamingConfig) -> Result<Self, PersistenceError> {
        config.validate()?;

        let mut trackers = Vec::new();
        for (i, pivot) in template.pivots.iter().enumerate() {
            let Some(source) = template.sheet_index(&pivot.definition().source_sheet) else {
                debug!("pivot '{}' reads from a missing sheet", pivot.definition().name);
                continue;
            };
            let mut accumulator = pivot.accumulator();
            if let Some(acc) = accumulator.as_mut() {
                for row in template.sheets[source].rows() {
                    pivot.feed(acc, row);
                }
            }
            trackers.push(PivotTracker {
                pivot: i,
                source,
                accumulator,
            });
        }

        Ok(StreamingWorkbook {
            forward: vec![None; template.sheet_count()],
            styles: StyleManager::new(config.style_max_columns, config.style_max_keys),
            template,
            config,
            streams: Vec::new(),
            trackers,
        })
    }

    pub fn template(&self) -> &Workbook {
        &self.template
    }

    /// The backing workbook, for style sheet edits and column widths.
    pub fn template_mut(&mut self) -> &mut Workbook {
        &mut self.template
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn window(&self) -> usize {
        self.config.window
    }

    pub fn sheet_count(&self) -> usize {
        self.template.sheet_count()
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.template.sheet_index(name)
    }

    pub fn sheet_name(&self, sheet: usize) -> Option<&str> {
        self.template.sheet(sheet).map(Sheet::name)
    }

    pub fn styles(&self) -> &StyleManager {
        &self.styles
    }

    pub fn styles_mut(&mut self) -> &mut StyleManager {
        &mut self.styles
    }

    /// Highest row index in use on the sheet, template rows included.
    pub fn last_row_num(&self, sheet: usize) -> Option<u32> {
        match self.forward.get(sheet).copied().flatten() {
            Some(slot) => self.streams[slot].last_row_num(),
            None => self.template.sheet(sheet)?.last_row_num(),
        }
    }

    /// Index of the first row after everything already on the sheet.
    pub fn next_row_index(&self, sheet: usize) -> u32 {
        self.last_row_num(sheet).map_or(0, |r| r + 1)
    }

    pub fn stats(&self, sheet: usize) -> SheetStats {
        self.forward
            .get(sheet)
            .copied()
            .flatten()
            .map(|slot| self.streams[slot].stats)
            .unwrap_or_default()
    }

    /// Resident (unflushed) rows of a sheet.
    pub fn resident_rows(&self, sheet: usize) -> usize {
        self.stats(sheet).resident_rows
    }

    fn ensure_stream(&mut self, sheet: usize) -> Result<usize, PersistenceError> {
        let template = self
            .template
            .sheet(sheet)
            .ok_or_else(|| PersistenceError::SheetNotFound(format!("#{}", sheet)))?;
        if let Some(slot) = self.forward[sheet] {
            return Ok(slot);
        }
        let stream = StreamingSheet::new(sheet, template)?;
        debug!("streaming sheet '{}' (window {})", stream.name, self.config.window);
        self.streams.push(stream);
        let slot = self.streams.len() - 1;
        self.forward[sheet] = Some(slot);
        Ok(slot)
    }

    fn flush_slot(&mut self, slot: usize, keep: usize) -> Result<usize, PersistenceError> {
        let mut ctx = FlushContext {
            strings: &mut self.template.shared_strings,
            policy: self.config.string_policy,
            styles: &self.styles,
            pivots: &self.template.pivots,
            trackers: &mut self.trackers,
        };
        flush(&mut self.streams[slot], keep, &mut ctx)
    }

    /// The row at `row`, created if needed. Creating a row may flush the
    /// lowest resident rows so the sheet stays within its window.
    pub fn create_row(&mut self, sheet: usize, row: u32) -> Result<&mut Row, PersistenceError> {
        if row > MAX_ROW {
            return Err(PersistenceError::RowOutOfRange(row));
        }
        let slot = self.ensure_stream(sheet)?;
        let window = self.config.window;

        let exists = self.streams[slot].pending.contains_key(&row);
        if !exists {
            self.check_floor(slot, row)?;
            if self.streams[slot].pending.len() >= window {
                self.flush_slot(slot, window - 1)?;
                self.check_floor(slot, row)?;
            }
        }

        let stream = &mut self.streams[slot];
        let resident = stream.pending.len() + usize::from(!exists);
        stream.stats.resident_rows = resident;
        stream.stats.peak_resident_rows = stream.stats.peak_resident_rows.max(resident);
        Ok(stream.pending.entry(row).or_insert_with(|| Row::new(row)))
    }

    fn check_floor(&self, slot: usize, row: u32) -> Result<(), PersistenceError> {
        let stream = &self.streams[slot];
        match stream.floor() {
            Some(floor) if row <= floor => Err(PersistenceError::RowAlreadyFlushed {
                sheet: stream.name.clone(),
                row,
                last_flushed: floor,
            }),
            _ => Ok(()),
        }
    }

    /// A resident row, if it has not been flushed yet.
    pub fn row_mut(&mut self, sheet: usize, row: u32) -> Option<&mut Row> {
        let slot = self.forward.get(sheet).copied().flatten()?;
        self.streams[slot].pending.get_mut(&row)
    }

    /// Flushes every resident row of the sheet now and leaves it open for
    /// rows past the flushed ones. Returns how many rows were written.
    pub fn flush_resident(&mut self, sheet: usize) -> Result<usize, PersistenceError> {
        match self.forward.get(sheet).copied().flatten() {
            Some(slot) => self.flush_slot(slot, 0),
            None => Ok(0),
        }
    }

    /// Flushes every resident row of the sheet.
    pub fn finish_sheet(&mut self, sheet: usize) -> Result<(), PersistenceError> {
        if let Some(slot) = self.forward.get(sheet).copied().flatten() {
            let flushed = self.flush_slot(slot, 0)?;
            let stats = self.streams[slot].stats;
            info!(
                "sheet '{}' finished: {} rows in {} flushes ({} on close)",
                self.streams[slot].name, stats.rows_flushed, stats.flush_count, flushed
            );
        }
        Ok(())
    }

    /// Flushes every sheet.
    pub fn finish(&mut self) -> Result<(), PersistenceError> {
        for slot in 0..self.streams.len() {
            self.flush_slot(slot, 0)?;
        }
        Ok(())
    }

    /// Re-renders pivot tables from the accumulated rows and extends their
    /// cache sources to the final data. Returns how many were re-rendered.
    pub fn refresh_pivots(&mut self) -> Result<usize, PersistenceError> {
        self.finish()?;
        let mut rendered = 0;
        for tracker in &self.trackers {
            let streamed = self.forward[tracker.source].and_then(|s| self.streams[s].stats.last_flushed);
            let template_last = self.template.sheets[tracker.source].last_row_num();
            let last_row = streamed.max(template_last);

            let pivot = &mut self.template.pivots[tracker.pivot];
            let host = self.template.sheet_order.position(pivot.host_sheet());
            let host = host.and_then(|h| self.template.sheets.get_mut(h));
            if pivot.refresh(last_row, tracker.accumulator.as_ref(), host).is_some() {
                rendered += 1;
            }
        }
        info!("refreshed {} pivot tables, {} re-rendered", self.trackers.len(), rendered);
        Ok(rendered)
    }

    /// Evaluates every template formula against resident cells and the
    /// digests of flushed rows.
    pub fn evaluate_formulas(&mut self) -> Result<EvaluationSummary, PersistenceError> {
        self.finish()?;
        let digests: Vec<Option<&SheetDigest>> = self
            .forward
            .iter()
            .map(|slot| slot.map(|s| &self.streams[s].digest))
            .collect();
        let summary = evaluation::evaluate_sheets(&mut self.template.sheets, &digests);
        if summary.unavailable > 0 {
            self.template.full_calc_on_load = true;
        }
        Ok(summary)
    }

    /// Flushes everything and serializes the package.
    pub fn write<W: Write + Seek>(&mut self, out: W) -> Result<W, PersistenceError> {
        self.finish()?;
        let mut rows = StreamedRows {
            streams: &mut self.streams,
            forward: &self.forward,
        };
        xlsx_writer::write_workbook(&mut self.template, out, &mut rows)
    }
}

/// Template rows with each sheet's spill spliced in.
struct StreamedRows<'a> {
    streams: &'a mut [StreamingSheet],
    forward: &'a [Option<usize>],
}

impl SheetRows for StreamedRows<'_> {
    fn extent(&self, index: usize, sheet: &Sheet) -> Option<CellRange> {
        let used = sheet.used_range();
        let streamed = self
            .forward
            .get(index)
            .copied()
            .flatten()
            .and_then(|slot| self.streams[slot].extent);
        match (used, streamed) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        }
    }

    fn write_rows(
        &mut self,
        index: usize,
        sheet: &Sheet,
        strings: &mut SharedStrings,
        out: &mut dyn Write,
    ) -> Result<(), PersistenceError> {
        let Some(slot) = self.forward.get(index).copied().flatten() else {
            return TemplateRows.write_rows(index, sheet, strings, out);
        };
        let stream = &mut self.streams[slot];
        let (Some(first), Some(last)) = (stream.first_spilled, stream.stats.last_flushed) else {
            return TemplateRows.write_rows(index, sheet, strings, out);
        };

        for row in sheet.rows.range(..first).map(|(_, row)| row) {
            write_row(out, row, strings, StringPolicy::Shared, |_| None)?;
        }
        stream.copy_spill(out)?;
        for (row_index, row) in sheet.rows.range(first..) {
            if *row_index <= last {
                warn!(
                    "row {} of '{}' overlaps streamed rows and was not written",
                    row_index + 1,
                    stream.name
                );
                continue;
            }
            write_row(out, row, strings, StringPolicy::Shared, |_| None)?;
        }
        Ok(())
    }

    fn is_large(&self, index: usize) -> bool {
        self.forward
            .get(index)
            .copied()
            .flatten()
            .map_or(false, |slot| self.streams[slot].spilled_bytes > u64::from(u32::MAX) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::xlsx_reader::load_xlsx;
    use crate::TemplateSource;
    use engine::{Cell, CellValue};
    use std::io::Cursor;

    fn sales(window: usize) -> StreamingWorkbook {
        let template = load_xlsx(TemplateSource::from_bytes(fixtures::sales_template())).unwrap();
        StreamingWorkbook::new(template, StreamingConfig::new(window)).unwrap()
    }

    fn write_sale(book: &mut StreamingWorkbook, sheet: usize, region: &str, amount: f64) {
        let index = book.next_row_index(sheet);
        let row = book.create_row(sheet, index).unwrap();
        row.set_cell(0, Cell::new_text(region));
        row.set_cell(1, Cell::new_text(format!("rep{}", index)));
        row.set_cell(2, Cell::new_number(amount));
    }

    fn output(book: &mut StreamingWorkbook) -> Vec<u8> {
        book.write(Cursor::new(Vec::new())).unwrap().into_inner()
    }

    #[test]
    fn zero_window_is_rejected() {
        let template = load_xlsx(TemplateSource::from_bytes(fixtures::sales_template())).unwrap();
        let err = StreamingWorkbook::new(template, StreamingConfig::new(0)).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidWindow));
    }

    #[test]
    fn resident_rows_stay_within_the_window() {
        let mut book = sales(100);
        let data = book.sheet_index("Data").unwrap();
        assert_eq!(book.next_row_index(data), 4);

        for i in 0..250 {
            write_sale(&mut book, data, "North", i as f64);
            assert!(book.resident_rows(data) <= 100);
        }
        book.finish_sheet(data).unwrap();

        let stats = book.stats(data);
        assert_eq!(stats.rows_flushed, 250);
        assert_eq!(stats.resident_rows, 0);
        assert_eq!(stats.peak_resident_rows, 100);
        assert_eq!(stats.flush_count, 151);
        assert_eq!(stats.last_flushed, Some(253));
    }

    #[test]
    fn rows_at_or_below_the_floor_are_refused() {
        let mut book = sales(2);
        let data = book.sheet_index("Data").unwrap();

        let err = book.create_row(data, 3).unwrap_err();
        assert!(matches!(err, PersistenceError::RowAlreadyFlushed { row: 3, last_flushed: 3, .. }));

        for _ in 0..3 {
            write_sale(&mut book, data, "South", 1.0);
        }
        // Rows 4 and 5 were resident, creating row 6 flushed row 4.
        assert!(book.row_mut(data, 4).is_none());
        assert!(book.row_mut(data, 5).is_some());
        assert!(matches!(
            book.create_row(data, 4),
            Err(PersistenceError::RowAlreadyFlushed { last_flushed: 4, .. })
        ));
        assert!(book.create_row(data, 5).is_ok());
        assert!(matches!(book.create_row(data, MAX_ROW + 1), Err(PersistenceError::RowOutOfRange(_))));
    }

    #[test]
    fn unknown_sheets_are_reported() {
        let mut book = sales(10);
        assert!(matches!(book.create_row(7, 0), Err(PersistenceError::SheetNotFound(_))));
    }

    #[test]
    fn spilled_rows_land_after_the_template_rows() {
        let mut book = sales(8);
        let data = book.sheet_index("Data").unwrap();
        for i in 0..40 {
            write_sale(&mut book, data, "West", i as f64);
        }
        let bytes = output(&mut book);

        let parts = fixtures::unzip(&bytes);
        let sheet = &parts["xl/worksheets/sheet1.xml"];
        assert!(sheet.contains("<dimension ref=\"A1:C44\"/>"));
        assert!(sheet.contains("<c r=\"A5\" t=\"inlineStr\"><is><t>West</t></is></c>"));
        assert!(sheet.find("<row r=\"4\"").unwrap() < sheet.find("<row r=\"5\"").unwrap());

        let again = load_xlsx(TemplateSource::from_bytes(bytes)).unwrap();
        let data = again.sheet_by_name("Data").unwrap();
        assert_eq!(data.row_count(), 44);
        assert_eq!(data.cell(1, 2).unwrap().value, CellValue::Number(10.0));
        assert_eq!(data.cell(43, 2).unwrap().value, CellValue::Number(39.0));
        assert_eq!(data.cell(43, 0).unwrap().value, CellValue::Text("West".into()));
    }

    #[test]
    fn shared_string_policy_interns_streamed_text() {
        let template = load_xlsx(TemplateSource::from_bytes(fixtures::sales_template())).unwrap();
        let config = StreamingConfig::new(4).with_shared_strings(true);
        let mut book = StreamingWorkbook::new(template, config).unwrap();
        let data = book.sheet_index("Data").unwrap();
        write_sale(&mut book, data, "North", 1.0);
        let parts = fixtures::unzip(&output(&mut book));
        // "North" is entry 3 of the template's table.
        assert!(parts["xl/worksheets/sheet1.xml"].contains("<c r=\"A5\" t=\"s\"><v>3</v></c>"));
    }

    #[test]
    fn column_styles_override_streamed_cell_styles() {
        let mut book = sales(4);
        let data = book.sheet_index("Data").unwrap();
        book.styles_mut().set_style(2, "Data", 1).unwrap();
        write_sale(&mut book, data, "North", 1.0);
        let index = book.next_row_index(data);
        let row = book.create_row(data, index).unwrap();
        row.set_cell(1, Cell::new_number(7.0).with_style(Some(3)));
        row.set_cell(2, Cell::new_number(2.0).with_style(Some(3)));

        let parts = fixtures::unzip(&output(&mut book));
        let sheet = &parts["xl/worksheets/sheet1.xml"];
        assert!(sheet.contains("<c r=\"C5\" s=\"1\"><v>1</v></c>"));
        assert!(sheet.contains("<c r=\"B6\" s=\"3\"><v>7</v></c>"));
        assert!(sheet.contains("<c r=\"C6\" s=\"1\"><v>2</v></c>"));
    }

    #[test]
    fn rows_flushed_early_keep_their_own_styles() {
        let mut book = sales(4);
        let data = book.sheet_index("Data").unwrap();
        write_sale(&mut book, data, "North", 1.0);
        assert_eq!(book.flush_resident(data).unwrap(), 1);
        assert_eq!(book.resident_rows(data), 0);
        book.styles_mut().set_style(2, "Data", 1).unwrap();
        write_sale(&mut book, data, "South", 2.0);

        let parts = fixtures::unzip(&output(&mut book));
        let sheet = &parts["xl/worksheets/sheet1.xml"];
        assert!(sheet.contains("<c r=\"C5\"><v>1</v></c>"));
        assert!(sheet.contains("<c r=\"C6\" s=\"1\"><v>2</v></c>"));
    }

    #[test]
    fn pivots_include_streamed_rows() {
        let mut book = sales(5);
        let data = book.sheet_index("Data").unwrap();
        for amount in [1.0, 2.0, 3.0] {
            write_sale(&mut book, data, "North", amount);
        }
        write_sale(&mut book, data, "East", 100.0);
        assert_eq!(book.refresh_pivots().unwrap(), 1);

        let report = book.template().sheet_by_name("Report").unwrap();
        let value = |row: u32, col: u32| report.cell(row, col).map(|c| c.value.clone());
        assert_eq!(value(3, 0), Some(CellValue::Text("North".into())));
        assert_eq!(value(3, 1), Some(CellValue::Number(21.0)));
        assert_eq!(value(4, 1), Some(CellValue::Number(20.0)));
        assert_eq!(value(5, 0), Some(CellValue::Text("East".into())));
        assert_eq!(value(5, 1), Some(CellValue::Number(100.0)));
        assert_eq!(value(6, 1), Some(CellValue::Number(141.0)));

        let parts = fixtures::unzip(&output(&mut book));
        let cache = &parts["xl/pivotCache/pivotCacheDefinition1.xml"];
        assert!(cache.contains("ref=\"A1:C8\""));
        assert!(cache.contains("refreshOnLoad=\"1\""));
        assert!(parts["xl/pivotTables/pivotTable1.xml"].contains("<location ref=\"A3:B7\""));
    }

    #[test]
    fn formulas_over_flushed_rows_use_the_digest() {
        let mut book = sales(3);
        let data = book.sheet_index("Data").unwrap();
        let report = book.sheet_index("Report").unwrap();
        for _ in 0..10 {
            write_sale(&mut book, data, "South", 2.0);
        }
        {
            let sheet = book.template_mut().sheet_mut(report).unwrap();
            sheet.set_cell(0, 0, Cell::new_formula("SUM(Data!C2:C1000)"));
            sheet.set_cell(0, 1, Cell::new_formula("COUNT(Data!C2:C4)"));
            sheet.set_cell(0, 2, Cell::new_formula("Data!C9*2"));
        }

        let summary = book.evaluate_formulas().unwrap();
        assert_eq!(summary.evaluated, 3);
        assert_eq!(summary.unavailable, 1);
        assert!(book.template().full_calc_on_load());

        let sheet = book.template().sheet(report).unwrap();
        assert_eq!(sheet.cell(0, 0).unwrap().value, CellValue::Number(55.0));
        assert_eq!(sheet.cell(0, 1).unwrap().value, CellValue::Number(3.0));
        assert_eq!(sheet.cell(0, 2).unwrap().value, CellValue::Empty);

        let parts = fixtures::unzip(&output(&mut book));
        assert!(parts["xl/workbook.xml"].contains("fullCalcOnLoad=\"1\""));
    }
}
