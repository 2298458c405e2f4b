//! FILENAME: persistence/src/xlsx_reader.rs
//! PURPOSE: Turns a template package into a [`Workbook`].
//! CONTEXT: Parts are resolved through relationships, never by fixed names,
//! so templates saved by any producer load the same way.

use crate::package::{
    resolve_target, ContentTypes, Package, Relationships, CONTENT_TYPES_PART,
    REL_OFFICE_DOCUMENT, REL_PIVOT_TABLE, REL_SHARED_STRINGS, REL_STYLES, REL_WORKSHEET,
    ROOT_RELS_PART,
};
use crate::pivot::read_pivot_table;
use crate::security::TemplateSource;
use crate::shared_strings::SharedStrings;
use crate::sheet::Sheet;
use crate::styles::StyleSheet;
use crate::xml::{attribute, attribute_local, local_name};
use crate::{PersistenceError, SheetOrder, Workbook};
use log::debug;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Reads and parses a template under the limits the source carries.
pub fn load_xlsx(source: TemplateSource) -> Result<Workbook, PersistenceError> {
    let (bytes, limits) = source.into_parts()?;
    if bytes.is_empty() {
        return Err(PersistenceError::InvalidFormat("empty stream".to_string()));
    }
    let package = Package::read(&bytes, &limits)?;
    read_package(package)
}

pub(crate) fn read_package(package: Package) -> Result<Workbook, PersistenceError> {
    let content_types = match package.get_str(CONTENT_TYPES_PART)? {
        Some(xml) => ContentTypes::parse(xml)?,
        None => {
            return Err(PersistenceError::InvalidFormat(
                "package has no content types".to_string(),
            ))
        }
    };

    let root_rels = match package.get_str(ROOT_RELS_PART)? {
        Some(xml) => Relationships::parse(xml)?,
        None => Relationships::default(),
    };
    let workbook_part = root_rels
        .by_type(REL_OFFICE_DOCUMENT)
        .next()
        .map(|rel| resolve_target("", &rel.target))
        .unwrap_or_else(|| "xl/workbook.xml".to_string());
    let workbook_xml = package.get_str(&workbook_part)?.ok_or_else(|| {
        PersistenceError::InvalidFormat(format!("missing workbook part {}", workbook_part))
    })?;
    let workbook_rels = Relationships::for_part(&package, &workbook_part)?;

    let shared_strings_part = workbook_rels
        .by_type(REL_SHARED_STRINGS)
        .next()
        .map(|rel| resolve_target(&workbook_part, &rel.target));
    let shared_strings = match shared_strings_part.as_deref().map(|p| package.get_str(p)) {
        Some(Ok(Some(xml))) => SharedStrings::parse(xml)?,
        Some(Err(e)) => return Err(e),
        _ => SharedStrings::new(),
    };

    let styles_part = workbook_rels
        .by_type(REL_STYLES)
        .next()
        .map(|rel| resolve_target(&workbook_part, &rel.target));
    let styles = match styles_part.as_deref().map(|p| package.get_str(p)) {
        Some(Ok(Some(xml))) => StyleSheet::parse(xml)?,
        Some(Err(e)) => return Err(e),
        _ => StyleSheet::default(),
    };

    let mut sheet_order = SheetOrder::new();
    let mut sheets = Vec::new();
    let mut pivots = Vec::new();
    for (name, rel_id) in list_sheets(workbook_xml)? {
        let rel = match workbook_rels.by_id(&rel_id) {
            Some(rel) if rel.rel_type == REL_WORKSHEET => rel,
            // Chart sheets and dialog sheets stay raw.
            _ => continue,
        };
        let part = resolve_target(&workbook_part, &rel.target);
        let xml = package
            .get_str(&part)?
            .ok_or_else(|| PersistenceError::InvalidFormat(format!("missing worksheet {}", part)))?;
        let sheet = Sheet::parse(&name, &part, xml, &shared_strings)?;
        debug!("sheet '{}' ({}): {} template rows", name, part, sheet.row_count());

        for pivot_rel in Relationships::for_part(&package, &part)?.by_type(REL_PIVOT_TABLE) {
            let table_part = resolve_target(&part, &pivot_rel.target);
            if let Some(pivot) = read_pivot_table(&package, &name, &table_part)? {
                pivots.push(pivot);
            }
        }

        sheet_order.push(name);
        sheets.push(sheet);
    }
    if sheets.is_empty() {
        return Err(PersistenceError::InvalidFormat(
            "workbook has no worksheets".to_string(),
        ));
    }

    Ok(Workbook {
        package,
        content_types,
        workbook_part,
        workbook_rels,
        sheets,
        sheet_order,
        shared_strings,
        shared_strings_part,
        styles,
        styles_part,
        pivots,
        full_calc_on_load: false,
    })
}

/// `(name, relationship id)` of every `<sheet>` in workbook order.
fn list_sheets(xml: &str) -> Result<Vec<(String, String)>, PersistenceError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(&e) == "sheet" => {
                let name = attribute(&e, "name")?;
                let id = attribute_local(&e, "id")?;
                if let (Some(name), Some(id)) = (name, id) {
                    sheets.push((name, id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}
