//! FILENAME: report/src/generator.rs
//! PURPOSE: Runs one report from template to finished package.
//! CONTEXT: A generation owns its document from load to write. Mappings are
//! written one after another; each pulls its rows lazily from the data source
//! and streams them into the target sheet, so memory stays bounded by the
//! row window whatever the result size. Pivot tables are refreshed before
//! formulas are evaluated because formulas may read pivot output.

use crate::data_source::{DataSource, FieldValue};
use crate::definition::{FieldAttribute, QueryMapping, ReportDefinition};
use crate::error::ReportError;
use crate::template::TemplateService;
use engine::Cell;
use log::{debug, info, warn};
use persistence::{EvaluationSummary, SheetStats, StreamingWorkbook};
use serde::Serialize;
use std::io::{Seek, Write};

/// What one mapping wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingSummary {
    pub sheet_name: String,
    /// The target sheet was missing from the template.
    pub skipped: bool,
    pub rows_written: u64,
    pub header_written: bool,
    pub stats: SheetStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationSummary {
    pub report_id: String,
    pub mappings: Vec<MappingSummary>,
    pub pivots_rendered: usize,
    pub formulas: EvaluationSummary,
}

pub struct ReportGenerator {
    templates: TemplateService,
}

impl ReportGenerator {
    pub fn new(templates: TemplateService) -> Self {
        ReportGenerator { templates }
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    /// Generates `definition` into `out`. On error nothing written to `out`
    /// is usable.
    pub fn stream<W: Write + Seek>(
        &self,
        definition: &ReportDefinition,
        source: &dyn DataSource,
        out: W,
    ) -> Result<GenerationSummary, ReportError> {
        let document = self.templates.find_template_by_id(&definition.template_id)?;
        let mut book = document.into_streaming(*self.templates.streaming_config())?;

        let mut summary = GenerationSummary {
            report_id: definition.id.clone(),
            ..GenerationSummary::default()
        };
        for mapping in &definition.mappings {
            summary.mappings.push(write_mapping(&mut book, mapping, source)?);
        }

        summary.pivots_rendered = book.refresh_pivots()?;
        summary.formulas = book.evaluate_formulas()?;
        book.write(out)?;

        info!(
            "report '{}' generated: {} rows over {} mappings",
            definition.id,
            summary.mappings.iter().map(|m| m.rows_written).sum::<u64>(),
            summary.mappings.len()
        );
        Ok(summary)
    }
}

fn write_mapping(
    book: &mut StreamingWorkbook,
    mapping: &QueryMapping,
    source: &dyn DataSource,
) -> Result<MappingSummary, ReportError> {
    let Some(sheet) = book.sheet_index(mapping.sheet_name()) else {
        warn!(
            "template has no sheet '{}', skipping query {}",
            mapping.sheet_name(),
            mapping.query()
        );
        return Ok(MappingSummary {
            sheet_name: mapping.sheet_name().to_string(),
            skipped: true,
            ..MappingSummary::default()
        });
    };
    let sheet_name = book.sheet_name(sheet).unwrap_or(mapping.sheet_name()).to_string();
    let fields = mapping.fields();
    let mut summary = MappingSummary {
        sheet_name: sheet_name.clone(),
        ..MappingSummary::default()
    };
    let mut next = book.next_row_index(sheet);

    // Column styles resolve when a row is flushed, so the header goes out
    // before the data formats are registered.
    if book.last_row_num(sheet).is_none() {
        let header = book.create_row(sheet, next)?;
        for (col, field) in fields.iter().enumerate() {
            header.set_cell(col as u32, Cell::new_text(field.display_name.as_str()));
        }
        book.flush_resident(sheet)?;
        summary.header_written = true;
        next += 1;
    }
    apply_column_formats(book, sheet, &sheet_name, fields)?;

    for row in source.query_for_stream(mapping.query(), mapping.parameters())? {
        let row = row?;
        let target = book.create_row(sheet, next)?;
        for (col, field) in fields.iter().enumerate() {
            let value = field.to_cell_value(row.get(&field.field_name).unwrap_or(&FieldValue::Null));
            if !value.is_empty() {
                target.set_cell(col as u32, Cell { value, ..Cell::new() });
            }
        }
        next += 1;
        summary.rows_written += 1;
    }

    book.finish_sheet(sheet)?;
    summary.stats = book.stats(sheet);
    debug!(
        "sheet '{}': {} rows, {} flushes",
        sheet_name, summary.rows_written, summary.stats.flush_count
    );
    Ok(summary)
}

/// Registers each field's cell format for streamed cells and applies column
/// widths. Formats derive from the style of the same column in the last
/// template row so borders and fonts carry over.
fn apply_column_formats(
    book: &mut StreamingWorkbook,
    sheet: usize,
    sheet_name: &str,
    fields: &[FieldAttribute],
) -> Result<(), ReportError> {
    let base_styles: Vec<Option<u32>> = {
        let template = book.template().sheet(sheet);
        let last_row = template.and_then(|s| s.last_row_num().and_then(|r| s.row(r)));
        (0..fields.len() as u32)
            .map(|col| last_row.and_then(|r| r.cell(col)).and_then(|c| c.style))
            .collect()
    };

    for ((col, field), base) in fields.iter().enumerate().zip(base_styles) {
        let col = col as u32;
        let style = match field.number_format() {
            Some(code) => {
                let styles = book.template_mut().styles_mut();
                let num_fmt = styles.number_format_id(&code);
                Some(styles.derive_cell_format(base, num_fmt))
            }
            None => base,
        };
        if let Some(style) = style {
            book.styles_mut().set_style(col, sheet_name, style)?;
        }
        if let Some(width) = field.column_width {
            if let Some(target) = book.template_mut().sheet_mut(sheet) {
                target.set_column_width(col, width);
            }
        }
    }
    Ok(())
}
