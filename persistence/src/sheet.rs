//! FILENAME: persistence/src/sheet.rs
//! PURPOSE: The worksheet model: rows of cells plus the raw markup around
//! `<sheetData>`.
//! CONTEXT: A worksheet part is split into three pieces. The head (sheet
//! properties, dimension, views, columns) and the tail (merges, conditional
//! formats, drawings, ...) stay raw text; only the rows are parsed into
//! cells. On write the head gets its `<dimension>` and `<cols>` refreshed.

use crate::shared_strings::SharedStrings;
use crate::xml::{
    attributes, find_element, get_attribute, insertion_point, local_name, open_tag, unescape_hex,
    upsert_element_attributes,
};
use crate::PersistenceError;
use engine::{parse_a1, Cell, CellError, CellRange, CellValue, Formula};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

/// One worksheet row. Cells are keyed by 0-based column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    index: u32,
    /// Row attributes other than `r` and `spans` (height, hidden, style, ...).
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) cells: BTreeMap<u32, Cell>,
}

impl Row {
    pub fn new(index: u32) -> Self {
        Row {
            index,
            ..Row::default()
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn set_cell(&mut self, col: u32, cell: Cell) {
        self.cells.insert(col, cell);
    }

    pub fn cell(&self, col: u32) -> Option<&Cell> {
        self.cells.get(&col)
    }

    pub fn cell_mut(&mut self, col: u32) -> Option<&mut Cell> {
        self.cells.get_mut(&col)
    }

    pub fn cells(&self) -> impl Iterator<Item = (u32, &Cell)> {
        self.cells.iter().map(|(col, cell)| (*col, cell))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Columns spanned by the row's cells.
    pub(crate) fn column_span(&self) -> Option<(u32, u32)> {
        let first = self.cells.keys().next()?;
        let last = self.cells.keys().next_back()?;
        Some((*first, *last))
    }
}

#[derive(Debug, Clone)]
pub struct Sheet {
    name: String,
    pub(crate) part_name: String,
    head: String,
    tail: String,
    pub(crate) rows: BTreeMap<u32, Row>,
    column_widths: BTreeMap<u32, f64>,
}

impl Sheet {
    /// A blank sheet that is not backed by a package part yet.
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            part_name: String::new(),
            head: String::from(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><dimension ref=\"A1\"/>",
            ),
            tail: String::from("</worksheet>"),
            rows: BTreeMap::new(),
            column_widths: BTreeMap::new(),
        }
    }

    pub(crate) fn parse(
        name: &str,
        part_name: &str,
        xml: &str,
        strings: &SharedStrings,
    ) -> Result<Self, PersistenceError> {
        let (span, _, is_empty) = find_element(xml, "sheetData")?.ok_or_else(|| {
            PersistenceError::InvalidFormat(format!("{} has no sheetData", part_name))
        })?;
        let rows = if is_empty {
            BTreeMap::new()
        } else {
            parse_rows(&xml[span.start..span.end], strings)?
        };
        Ok(Sheet {
            name: name.to_string(),
            part_name: part_name.to_string(),
            head: xml[..span.start].to_string(),
            tail: xml[span.end..].to_string(),
            rows,
            column_widths: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest row index present, if any.
    pub fn last_row_num(&self) -> Option<u32> {
        self.rows.keys().next_back().copied()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: u32) -> Option<&Row> {
        self.rows.get(&index)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// The row at `index`, created empty if absent.
    pub fn create_row(&mut self, index: u32) -> &mut Row {
        self.rows.entry(index).or_insert_with(|| Row::new(index))
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.rows.get(&row).and_then(|r| r.cell(col))
    }

    pub fn set_cell(&mut self, row: u32, col: u32, cell: Cell) {
        self.create_row(row).set_cell(col, cell);
    }

    /// Overrides the width of one 0-based column.
    pub fn set_column_width(&mut self, col: u32, width: f64) {
        self.column_widths.insert(col, width);
    }

    pub fn column_width(&self, col: u32) -> Option<f64> {
        self.column_widths.get(&col).copied()
    }

    /// Smallest range covering every resident cell.
    pub fn used_range(&self) -> Option<CellRange> {
        let mut range: Option<CellRange> = None;
        for row in self.rows.values() {
            if let Some((first, last)) = row.column_span() {
                let span = CellRange::new((row.index, first), (row.index, last));
                range = Some(match range {
                    Some(r) => r.union(&span),
                    None => span,
                });
            }
        }
        range
    }

    /// The head markup with `<dimension>` set to `extent` and any column
    /// width overrides merged into `<cols>`.
    pub(crate) fn render_head(&self, extent: Option<CellRange>) -> Result<String, PersistenceError> {
        let reference = extent.map(|r| r.to_string()).unwrap_or_else(|| "A1".to_string());
        let head = upsert_element_attributes(
            &self.head,
            "dimension",
            |xml| {
                Ok(insertion_point(xml, &["sheetViews", "sheetFormatPr", "cols"], "worksheet")?
                    .or(Some(xml.len())))
            },
            |attrs| crate::xml::set_attribute(attrs, "ref", reference),
        )?;
        if self.column_widths.is_empty() {
            return Ok(head);
        }
        merge_column_widths(&head, &self.column_widths)
    }

    pub(crate) fn tail(&self) -> &str {
        &self.tail
    }
}

// ============================================================================
// COLUMNS
// ============================================================================

#[derive(Debug, Clone)]
struct ColumnSpec {
    min: u32,
    max: u32,
    attrs: Vec<(String, String)>,
}

impl ColumnSpec {
    fn with_bounds(&self, min: u32, max: u32) -> ColumnSpec {
        ColumnSpec {
            min,
            max,
            attrs: self.attrs.clone(),
        }
    }
}

fn merge_column_widths(head: &str, widths: &BTreeMap<u32, f64>) -> Result<String, PersistenceError> {
    let existing = find_element(head, "cols")?;
    let mut specs: Vec<ColumnSpec> = Vec::new();
    if let Some((span, _, false)) = existing {
        let mut reader = Reader::from_str(&head[span.start..span.end]);
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) if local_name(&e) == "col" => {
                    let mut attrs = attributes(&e)?;
                    let min = get_attribute(&attrs, "min").and_then(|v| v.parse().ok());
                    let max = get_attribute(&attrs, "max").and_then(|v| v.parse().ok());
                    if let (Some(min), Some(max)) = (min, max) {
                        attrs.retain(|(k, _)| k != "min" && k != "max");
                        specs.push(ColumnSpec { min, max, attrs });
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
    }

    for (col, width) in widths {
        let position = col + 1;
        let mut spec = match specs.iter().position(|s| s.min <= position && position <= s.max) {
            Some(i) => {
                let found = specs.remove(i);
                if found.min < position {
                    specs.push(found.with_bounds(found.min, position - 1));
                }
                if position < found.max {
                    specs.push(found.with_bounds(position + 1, found.max));
                }
                found.with_bounds(position, position)
            }
            None => ColumnSpec {
                min: position,
                max: position,
                attrs: Vec::new(),
            },
        };
        crate::xml::set_attribute(&mut spec.attrs, "width", format_width(*width));
        crate::xml::set_attribute(&mut spec.attrs, "customWidth", "1");
        specs.push(spec);
    }
    specs.sort_by_key(|s| s.min);

    let mut block = String::from("<cols>");
    for spec in &specs {
        let mut attrs = vec![
            ("min".to_string(), spec.min.to_string()),
            ("max".to_string(), spec.max.to_string()),
        ];
        attrs.extend(spec.attrs.iter().cloned());
        block.push_str(&open_tag("col", &attrs));
        block.push_str("/>");
    }
    block.push_str("</cols>");

    Ok(match existing {
        Some((span, _, _)) => format!("{}{}{}", &head[..span.start], block, &head[span.end..]),
        None => format!("{}{}", head, block),
    })
}

fn format_width(width: f64) -> String {
    let rounded = (width * 100.0).round() / 100.0;
    format!("{}", rounded)
}

// ============================================================================
// ROW PARSING
// ============================================================================

#[derive(Default)]
struct PendingCell {
    coord: (u32, u32),
    kind: Option<String>,
    style: Option<u32>,
    formula: Option<Formula>,
    value: Option<String>,
    inline: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    Formula,
    Value,
    Inline,
}

fn parse_rows(fragment: &str, strings: &SharedStrings) -> Result<BTreeMap<u32, Row>, PersistenceError> {
    let mut rows = BTreeMap::new();
    let mut reader = Reader::from_str(fragment);

    let mut next_row = 0u32;
    let mut current: Option<Row> = None;
    let mut next_col = 0u32;
    let mut cell: Option<PendingCell> = None;
    let mut target = TextTarget::None;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match local_name(&e).as_str() {
                "row" => {
                    let row = open_row(&e, next_row)?;
                    next_row = row.index + 1;
                    next_col = 0;
                    current = Some(row);
                }
                "c" => {
                    let pending = open_cell(&e, current.as_ref().map_or(next_row, |r| r.index), next_col)?;
                    next_col = pending.coord.1 + 1;
                    cell = Some(pending);
                }
                "f" => {
                    if let Some(c) = cell.as_mut() {
                        c.formula = Some(formula_from(&e)?);
                        target = TextTarget::Formula;
                    }
                }
                "v" => target = TextTarget::Value,
                "is" => {
                    if let Some(c) = cell.as_mut() {
                        c.inline = Some(String::new());
                    }
                }
                "rPh" => phonetic_depth += 1,
                "t" if phonetic_depth == 0 && cell.as_ref().map_or(false, |c| c.inline.is_some()) => {
                    target = TextTarget::Inline;
                }
                _ => {}
            },
            Event::Empty(e) => match local_name(&e).as_str() {
                "row" => {
                    let row = open_row(&e, next_row)?;
                    next_row = row.index + 1;
                    rows.insert(row.index, row);
                }
                "c" => {
                    let pending = open_cell(&e, current.as_ref().map_or(next_row, |r| r.index), next_col)?;
                    next_col = pending.coord.1 + 1;
                    if let Some(row) = current.as_mut() {
                        let (_, col) = pending.coord;
                        row.set_cell(col, finish_cell(pending, strings));
                    }
                }
                "f" => {
                    if let Some(c) = cell.as_mut() {
                        c.formula = Some(formula_from(&e)?);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if target != TextTarget::None {
                    let text = t.unescape()?;
                    if let Some(c) = cell.as_mut() {
                        match target {
                            TextTarget::Formula => {
                                if let Some(f) = c.formula.as_mut() {
                                    f.text.push_str(&text);
                                }
                            }
                            TextTarget::Value => {
                                c.value.get_or_insert_with(String::new).push_str(&text);
                            }
                            TextTarget::Inline => {
                                if let Some(s) = c.inline.as_mut() {
                                    s.push_str(&text);
                                }
                            }
                            TextTarget::None => {}
                        }
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"f" | b"v" | b"t" => target = TextTarget::None,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"c" => {
                    if let (Some(pending), Some(row)) = (cell.take(), current.as_mut()) {
                        let (_, col) = pending.coord;
                        row.set_cell(col, finish_cell(pending, strings));
                    }
                }
                b"row" => {
                    if let Some(row) = current.take() {
                        rows.insert(row.index, row);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn open_row(e: &BytesStart<'_>, next_row: u32) -> Result<Row, PersistenceError> {
    let mut attrs = attributes(e)?;
    let index = get_attribute(&attrs, "r")
        .and_then(|r| r.parse::<u32>().ok())
        .filter(|r| *r > 0)
        .map(|r| r - 1)
        .unwrap_or(next_row);
    attrs.retain(|(k, _)| k != "r" && k != "spans");
    Ok(Row {
        index,
        attributes: attrs,
        cells: BTreeMap::new(),
    })
}

fn open_cell(e: &BytesStart<'_>, row: u32, next_col: u32) -> Result<PendingCell, PersistenceError> {
    let attrs = attributes(e)?;
    let coord = get_attribute(&attrs, "r")
        .and_then(parse_a1)
        .unwrap_or((row, next_col));
    Ok(PendingCell {
        coord,
        kind: get_attribute(&attrs, "t").map(str::to_string),
        style: get_attribute(&attrs, "s").and_then(|s| s.parse().ok()),
        ..PendingCell::default()
    })
}

fn formula_from(e: &BytesStart<'_>) -> Result<Formula, PersistenceError> {
    Ok(Formula {
        text: String::new(),
        attributes: attributes(e)?,
    })
}

fn finish_cell(pending: PendingCell, strings: &SharedStrings) -> Cell {
    let raw = pending.value.as_deref();
    let value = match pending.kind.as_deref() {
        Some("s") => raw
            .and_then(|v| v.trim().parse::<u32>().ok())
            .and_then(|i| strings.get(i))
            .map(|s| CellValue::Text(s.to_string()))
            .unwrap_or(CellValue::Empty),
        Some("inlineStr") => pending
            .inline
            .map(|s| CellValue::Text(unescape_hex(&s)))
            .unwrap_or(CellValue::Empty),
        Some("str") | Some("d") => raw
            .map(|s| CellValue::Text(unescape_hex(s)))
            .unwrap_or(CellValue::Empty),
        Some("b") => raw
            .map(|v| CellValue::Boolean(v.trim() == "1" || v.trim().eq_ignore_ascii_case("true")))
            .unwrap_or(CellValue::Empty),
        Some("e") => raw
            .map(|v| CellValue::Error(CellError::from_code(v.trim()).unwrap_or(CellError::Value)))
            .unwrap_or(CellValue::Empty),
        _ => match raw.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v
                .parse::<f64>()
                .map(CellValue::Number)
                .unwrap_or_else(|_| CellValue::Text(v.to_string())),
            None => CellValue::Empty,
        },
    };
    Cell {
        value,
        formula: pending.formula,
        style: pending.style,
    }
}
