//! FILENAME: persistence/src/xlsx_writer.rs
//! PURPOSE: Serializes a [`Workbook`] back into a zipped package.
//! CONTEXT: Parts the workbook does not model are copied byte for byte.
//! Worksheets are rebuilt from their head, their rows and their tail; the
//! string table and style sheet are written last because writing rows can
//! still add to them.

use crate::cell_xml::{write_row, StringPolicy};
use crate::package::{
    relative_target, rels_part_for, resolve_target, Package, CONTENT_TYPES_PART, CT_SHARED_STRINGS,
    CT_STYLES,
    REL_CALC_CHAIN, REL_OFFICE_DOCUMENT, REL_SHARED_STRINGS, REL_STYLES, REL_WORKSHEET,
    ROOT_RELS_PART,
};
use crate::sheet::Sheet;
use crate::shared_strings::SharedStrings;
use crate::styles::StyleSheet;
use crate::xlsx_reader::read_package;
use crate::xml::{insertion_point, set_attribute, upsert_element_attributes};
use crate::{PersistenceError, Workbook};
use engine::CellRange;
use log::debug;
use std::collections::HashMap;
use std::io::{BufWriter, Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Elements that follow `calcPr` inside `<workbook>`.
const AFTER_CALC_PR: &[&str] = &[
    "oleSize",
    "customWorkbookViews",
    "pivotCaches",
    "smartTagPr",
    "smartTagTypes",
    "webPublishing",
    "fileRecoveryPr",
    "webPublishObjects",
    "extLst",
];

/// Supplies the rows inside each worksheet's `<sheetData>`.
pub(crate) trait SheetRows {
    /// Final used range of the sheet, for `<dimension>`.
    fn extent(&self, index: usize, sheet: &Sheet) -> Option<CellRange>;

    fn write_rows(
        &mut self,
        index: usize,
        sheet: &Sheet,
        strings: &mut SharedStrings,
        out: &mut dyn Write,
    ) -> Result<(), PersistenceError>;

    /// Whether the part may exceed the 4 GiB limit of plain zip entries.
    fn is_large(&self, _index: usize) -> bool {
        false
    }
}

/// Rows held entirely by the workbook.
pub(crate) struct TemplateRows;

impl SheetRows for TemplateRows {
    fn extent(&self, _index: usize, sheet: &Sheet) -> Option<CellRange> {
        sheet.used_range()
    }

    fn write_rows(
        &mut self,
        _index: usize,
        sheet: &Sheet,
        strings: &mut SharedStrings,
        out: &mut dyn Write,
    ) -> Result<(), PersistenceError> {
        for row in sheet.rows() {
            write_row(out, row, strings, StringPolicy::Shared, |_| None)?;
        }
        Ok(())
    }
}

pub(crate) fn write_workbook<W, R>(book: &mut Workbook, out: W, rows: &mut R) -> Result<W, PersistenceError>
where
    W: Write + Seek,
    R: SheetRows + ?Sized,
{
    if book.sheets.is_empty() {
        debug!("writing an empty document as a blank single-sheet package");
        let mut blank = blank_workbook()?;
        return write_workbook(&mut blank, out, &mut TemplateRows);
    }

    let Workbook {
        package,
        content_types,
        workbook_part,
        workbook_rels,
        sheets,
        shared_strings,
        shared_strings_part,
        styles,
        styles_part,
        pivots,
        full_calc_on_load,
        ..
    } = book;

    // Relationship and content-type bookkeeping, decided before anything is
    // written because [Content_Types].xml goes first.
    let mut content_types = content_types.clone();
    let mut workbook_rels = workbook_rels.clone();
    let workbook_rels_part = rels_part_for(workbook_part);

    let calc_chain: Vec<String> = workbook_rels
        .by_type(REL_CALC_CHAIN)
        .map(|rel| resolve_target(workbook_part, &rel.target))
        .collect();
    if workbook_rels.remove_type(REL_CALC_CHAIN) {
        for part in &calc_chain {
            content_types.remove_override(part);
        }
    }

    let strings_part = match shared_strings_part {
        Some(part) => part.clone(),
        None => {
            let part = resolve_target(workbook_part, "sharedStrings.xml");
            workbook_rels.add(REL_SHARED_STRINGS, &relative_target(workbook_part, &part));
            part
        }
    };
    content_types.add_override(&strings_part, CT_SHARED_STRINGS);

    let styles_part = match styles_part {
        Some(part) => part.clone(),
        None => {
            let part = resolve_target(workbook_part, "styles.xml");
            workbook_rels.add(REL_STYLES, &relative_target(workbook_part, &part));
            content_types.add_override(&part, CT_STYLES);
            part
        }
    };

    let sheet_parts: HashMap<&str, usize> = sheets
        .iter()
        .enumerate()
        .map(|(i, s)| (s.part_name.as_str(), i))
        .collect();
    let mut cache_parts: HashMap<&str, usize> = HashMap::new();
    let mut table_parts: HashMap<&str, usize> = HashMap::new();
    for (i, pivot) in pivots.iter().enumerate() {
        if pivot.refreshed_source.is_some() {
            cache_parts.insert(pivot.cache_part.as_str(), i);
            table_parts.insert(pivot.table_part.as_str(), i);
        }
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(out);

    zip.start_file(CONTENT_TYPES_PART, options)?;
    content_types.write(&mut zip)?;

    let mut wrote_workbook_rels = false;
    for part in package.parts() {
        let name = part.name.as_str();
        if name == CONTENT_TYPES_PART
            || calc_chain.iter().any(|p| p == name)
            || name == styles_part
            || name == strings_part
        {
            continue;
        }

        if let Some(&index) = sheet_parts.get(name) {
            let sheet = &sheets[index];
            let options = options.large_file(rows.is_large(index));
            zip.start_file(name, options)?;
            let mut w = BufWriter::new(&mut zip);
            w.write_all(sheet.render_head(rows.extent(index, sheet))?.as_bytes())?;
            w.write_all(b"<sheetData>")?;
            rows.write_rows(index, sheet, shared_strings, &mut w)?;
            w.write_all(b"</sheetData>")?;
            w.write_all(sheet.tail().as_bytes())?;
            w.flush()?;
            continue;
        }

        zip.start_file(name, options)?;
        if name == workbook_rels_part {
            workbook_rels.write(&mut zip)?;
            wrote_workbook_rels = true;
        } else if name == workbook_part.as_str() && *full_calc_on_load {
            let xml = utf8(name, &part.data)?;
            let xml = upsert_element_attributes(
                xml,
                "calcPr",
                |x| insertion_point(x, AFTER_CALC_PR, "workbook"),
                |attrs| set_attribute(attrs, "fullCalcOnLoad", "1"),
            )?;
            zip.write_all(xml.as_bytes())?;
        } else if let Some(&i) = cache_parts.get(name) {
            let xml = pivots[i].rewrite_cache(utf8(name, &part.data)?)?;
            zip.write_all(xml.as_bytes())?;
        } else if let Some(&i) = table_parts.get(name) {
            let xml = pivots[i].rewrite_table(utf8(name, &part.data)?)?;
            zip.write_all(xml.as_bytes())?;
        } else {
            zip.write_all(&part.data)?;
        }
    }

    if !wrote_workbook_rels {
        zip.start_file(workbook_rels_part.as_str(), options)?;
        workbook_rels.write(&mut zip)?;
    }

    zip.start_file(styles_part.as_str(), options)?;
    styles.write(&mut zip)?;

    zip.start_file(strings_part.as_str(), options)?;
    {
        let mut w = BufWriter::new(&mut zip);
        shared_strings.write(&mut w)?;
        w.flush()?;
    }

    Ok(zip.finish()?)
}

fn utf8<'a>(name: &str, data: &'a [u8]) -> Result<&'a str, PersistenceError> {
    std::str::from_utf8(data).map_err(|e| PersistenceError::InvalidFormat(format!("{}: {}", name, e)))
}

// ============================================================================
// BLANK PACKAGE
// ============================================================================

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PKG_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// A one-sheet package, parsed like any template.
fn blank_workbook() -> Result<Workbook, PersistenceError> {
    let mut package = Package::default();
    package.insert(
        CONTENT_TYPES_PART,
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
            "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
            "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>",
            "<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
            "<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>",
            "<Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
            "<Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>",
            "</Types>"
        )
        .as_bytes()
        .to_vec(),
    );
    package.insert(
        ROOT_RELS_PART,
        format!(
            "<Relationships xmlns=\"{}\"><Relationship Id=\"rId1\" Type=\"{}\" Target=\"xl/workbook.xml\"/></Relationships>",
            NS_PKG_REL, REL_OFFICE_DOCUMENT
        )
        .into_bytes(),
    );
    package.insert(
        "xl/workbook.xml",
        format!(
            "<workbook xmlns=\"{}\" xmlns:r=\"{}\"><sheets><sheet name=\"Sheet1\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>",
            NS_MAIN, NS_REL
        )
        .into_bytes(),
    );
    package.insert(
        "xl/_rels/workbook.xml.rels",
        format!(
            "<Relationships xmlns=\"{}\"><Relationship Id=\"rId1\" Type=\"{}\" Target=\"worksheets/sheet1.xml\"/><Relationship Id=\"rId2\" Type=\"{}\" Target=\"styles.xml\"/></Relationships>",
            NS_PKG_REL, REL_WORKSHEET, REL_STYLES
        )
        .into_bytes(),
    );
    package.insert(
        "xl/worksheets/sheet1.xml",
        format!(
            "<worksheet xmlns=\"{}\" xmlns:r=\"{}\"><dimension ref=\"A1\"/><sheetData/></worksheet>",
            NS_MAIN, NS_REL
        )
        .into_bytes(),
    );
    let mut styles = Vec::new();
    StyleSheet::default().write(&mut styles)?;
    package.insert("xl/styles.xml", styles);
    read_package(package)
}
