//! FILENAME: persistence/src/pivot.rs
//! PURPOSE: Pivot tables as they live in a package: reading their definition
//! from the cache and table parts, and applying a refresh back onto them.
//! CONTEXT: The numbers come from `pivot-engine`; this module only knows
//! where they go (host sheet cells, cache source ref, table location).

use crate::package::{resolve_target, Package, Relationships, REL_PIVOT_CACHE_DEFINITION};
use crate::sheet::{Row, Sheet};
use crate::xml::{attribute, find_element, local_name, set_attribute, upsert_element_attributes};
use crate::PersistenceError;
use engine::{AggregationType, Cell, CellRange};
use log::debug;
use pivot_engine::{calculate_pivot, DataField, PivotAccumulator, PivotDefinition, PivotView};
use quick_xml::events::Event;
use quick_xml::Reader;

/// One pivot table of the template and what a refresh changed about it.
#[derive(Debug, Clone)]
pub struct PivotTable {
    pub(crate) definition: PivotDefinition,
    /// Sheet that displays the table.
    pub(crate) host_sheet: String,
    pub(crate) table_part: String,
    pub(crate) cache_part: String,
    pub(crate) refreshed_source: Option<CellRange>,
    pub(crate) refreshed_location: Option<CellRange>,
}

impl PivotTable {
    pub fn definition(&self) -> &PivotDefinition {
        &self.definition
    }

    pub fn host_sheet(&self) -> &str {
        &self.host_sheet
    }

    /// Location after the last refresh, or the template location.
    pub fn location(&self) -> CellRange {
        self.refreshed_location.unwrap_or(self.definition.location)
    }

    /// Source range after the last refresh, or the template range.
    pub fn source_range(&self) -> CellRange {
        self.refreshed_source.unwrap_or(self.definition.source_range)
    }

    /// An accumulator for the table when its shape can be recomputed.
    pub(crate) fn accumulator(&self) -> Option<PivotAccumulator> {
        PivotAccumulator::for_definition(&self.definition)
    }

    /// Folds one source row into `accumulator` if it lies below the header
    /// and has content in the source columns.
    pub(crate) fn feed(&self, accumulator: &mut PivotAccumulator, row: &Row) {
        let def = &self.definition;
        if row.index() <= def.header_row() {
            return;
        }
        let first = def.source_range.first.1;
        let last = def.source_range.last.1;
        if !row.cells().any(|(col, cell)| col >= first && col <= last && !cell.value.is_empty()) {
            return;
        }
        accumulator.add_record(|field| row.cell(def.source_column(field)).map(|c| &c.value));
    }

    /// Records the final extent of the source data and, when an accumulator
    /// is given, renders the table into `host`.
    pub(crate) fn refresh(
        &mut self,
        last_data_row: Option<u32>,
        accumulator: Option<&PivotAccumulator>,
        host: Option<&mut Sheet>,
    ) -> Option<PivotView> {
        let source = match last_data_row {
            Some(row) => self.definition.source_range.extend_to_row(row),
            None => self.definition.source_range,
        };
        self.refreshed_source = Some(source);

        let (accumulator, host) = match (accumulator, host) {
            (Some(a), Some(h)) => (a, h),
            _ => {
                debug!(
                    "pivot '{}' marked for refresh on load only ({:?})",
                    self.definition.name,
                    self.definition.shape()
                );
                return None;
            }
        };

        let view = calculate_pivot(&self.definition, accumulator);
        clear_area(host, self.location());
        for cell in &view.cells {
            let style = host.cell(cell.row, cell.col).and_then(|c| c.style);
            host.set_cell(
                cell.row,
                cell.col,
                Cell {
                    value: cell.value.clone(),
                    formula: None,
                    style,
                },
            );
        }
        self.refreshed_location = Some(view.range);
        Some(view)
    }

    /// Cache part with the refreshed source ref and `refreshOnLoad`.
    pub(crate) fn rewrite_cache(&self, xml: &str) -> Result<String, PersistenceError> {
        let source = self.source_range().to_string();
        let xml = upsert_element_attributes(
            xml,
            "pivotCacheDefinition",
            |_| Ok(None),
            |attrs| set_attribute(attrs, "refreshOnLoad", "1"),
        )?;
        if find_element(&xml, "worksheetSource")?.is_none() {
            return Ok(xml);
        }
        upsert_element_attributes(&xml, "worksheetSource", |_| Ok(None), |attrs| {
            if attrs.iter().any(|(k, _)| k == "ref") {
                set_attribute(attrs, "ref", source)
            }
        })
    }

    /// Table part with its refreshed location.
    pub(crate) fn rewrite_table(&self, xml: &str) -> Result<String, PersistenceError> {
        match self.refreshed_location {
            Some(location) => upsert_element_attributes(xml, "location", |_| Ok(None), |attrs| {
                set_attribute(attrs, "ref", location.to_string())
            }),
            None => Ok(xml.to_string()),
        }
    }
}

/// Removes previously rendered values, keeping cell styles in place.
fn clear_area(sheet: &mut Sheet, area: CellRange) {
    for row in area.first.0..=area.last.0 {
        for col in area.first.1..=area.last.1 {
            if let Some(cell) = sheet.rows.get_mut(&row).and_then(|r| r.cell_mut(col)) {
                *cell = Cell::new().with_style(cell.style);
            }
        }
    }
}

// ============================================================================
// READING
// ============================================================================

/// Reads the pivot table `table_part` displayed on `host_sheet`. Tables
/// whose cache is not a plain worksheet range are skipped.
pub(crate) fn read_pivot_table(
    package: &Package,
    host_sheet: &str,
    table_part: &str,
) -> Result<Option<PivotTable>, PersistenceError> {
    let table_xml = match package.get_str(table_part)? {
        Some(xml) => xml,
        None => return Ok(None),
    };
    let rels = Relationships::for_part(package, table_part)?;
    let cache_part = match rels.by_type(REL_PIVOT_CACHE_DEFINITION).next() {
        Some(rel) => resolve_target(table_part, &rel.target),
        None => return Ok(None),
    };
    let cache_xml = match package.get_str(&cache_part)? {
        Some(xml) => xml,
        None => return Ok(None),
    };

    let cache = match parse_cache(cache_xml, host_sheet)? {
        Some(cache) => cache,
        None => {
            debug!("pivot cache {} has no worksheet range source", cache_part);
            return Ok(None);
        }
    };

    let mut definition = PivotDefinition::new("", cache.sheet, cache.range);
    definition.field_names = cache.fields;
    parse_table(table_xml, &mut definition)?;

    Ok(Some(PivotTable {
        definition,
        host_sheet: host_sheet.to_string(),
        table_part: table_part.to_string(),
        cache_part,
        refreshed_source: None,
        refreshed_location: None,
    }))
}

struct CacheSource {
    sheet: String,
    range: CellRange,
    fields: Vec<String>,
}

fn parse_cache(xml: &str, host_sheet: &str) -> Result<Option<CacheSource>, PersistenceError> {
    let mut reader = Reader::from_str(xml);
    let mut source: Option<(String, CellRange)> = None;
    let mut fields = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match local_name(&e).as_str() {
                "worksheetSource" => {
                    let range = attribute(&e, "ref")?.and_then(|r| CellRange::parse(&r));
                    let sheet = attribute(&e, "sheet")?.unwrap_or_else(|| host_sheet.to_string());
                    if let Some(range) = range {
                        source = Some((sheet, range));
                    }
                }
                "cacheField" => fields.push(attribute(&e, "name")?.unwrap_or_default()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(source.map(|(sheet, range)| CacheSource { sheet, range, fields }))
}

#[derive(Clone, Copy, PartialEq)]
enum FieldList {
    None,
    Rows,
    Columns,
}

fn parse_table(xml: &str, def: &mut PivotDefinition) -> Result<(), PersistenceError> {
    let mut reader = Reader::from_str(xml);
    let mut list = FieldList::None;
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match local_name(&e).as_str() {
                "pivotTableDefinition" => {
                    def.name = attribute(&e, "name")?.unwrap_or_default();
                    def.row_header_caption = attribute(&e, "rowHeaderCaption")?;
                    def.grand_total_caption = attribute(&e, "grandTotalCaption")?;
                }
                "location" => {
                    if let Some(range) = attribute(&e, "ref")?.and_then(|r| CellRange::parse(&r)) {
                        def.location = range;
                    }
                }
                "rowFields" => list = FieldList::Rows,
                "colFields" => list = FieldList::Columns,
                "field" => {
                    // Negative indexes name the synthetic "Values" field.
                    let index = attribute(&e, "x")?.and_then(|x| x.parse::<i64>().ok());
                    if let Some(index) = index.filter(|i| *i >= 0) {
                        match list {
                            FieldList::Rows => def.row_fields.push(index as usize),
                            FieldList::Columns => def.column_fields.push(index as usize),
                            FieldList::None => {}
                        }
                    }
                }
                "pageField" => {
                    if let Some(index) = attribute(&e, "fld")?.and_then(|f| f.parse().ok()) {
                        def.page_fields.push(index);
                    }
                }
                "dataField" => {
                    let index: Option<usize> = attribute(&e, "fld")?.and_then(|f| f.parse().ok());
                    if let Some(index) = index {
                        let aggregation = attribute(&e, "subtotal")?
                            .and_then(|s| AggregationType::from_subtotal(&s))
                            .unwrap_or_default();
                        let name = attribute(&e, "name")?.unwrap_or_else(|| {
                            let field = def.field_names.get(index).cloned().unwrap_or_default();
                            format!("{} of {}", aggregation.caption(), field)
                        });
                        def.data_fields.push(DataField::new(index, name, aggregation));
                    }
                }
                _ => {}
            },
            Event::End(e) => {
                if matches!(e.local_name().as_ref(), b"rowFields" | b"colFields") {
                    list = FieldList::None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::CellValue;
    use pivot_engine::PivotShape;

    const CACHE: &str = r#"<pivotCacheDefinition xmlns="m" r:id="rId1" refreshOnLoad="0"><cacheSource type="worksheet"><worksheetSource ref="A1:C3" sheet="Data"/></cacheSource><cacheFields count="3"><cacheField name="Region" numFmtId="0"><sharedItems/></cacheField><cacheField name="Rep"/><cacheField name="Amount"/></cacheFields></pivotCacheDefinition>"#;

    const TABLE: &str = r#"<pivotTableDefinition xmlns="m" name="Sales" cacheId="1" grandTotalCaption="Total"><location ref="A3:B6" firstHeaderRow="1" firstDataRow="1" firstDataCol="1"/><pivotFields count="3"/><rowFields count="1"><field x="0"/></rowFields><colFields count="1"><field x="-2"/></colFields><dataFields count="2"><dataField name="Sum of Amount" fld="2" baseField="0" baseItem="0"/><dataField fld="2" subtotal="count"/></dataFields></pivotTableDefinition>"#;

    fn table() -> PivotTable {
        let cache = parse_cache(CACHE, "Report").unwrap().unwrap();
        let mut definition = PivotDefinition::new("", cache.sheet, cache.range);
        definition.field_names = cache.fields;
        parse_table(TABLE, &mut definition).unwrap();
        PivotTable {
            definition,
            host_sheet: "Report".into(),
            table_part: "xl/pivotTables/pivotTable1.xml".into(),
            cache_part: "xl/pivotCache/pivotCacheDefinition1.xml".into(),
            refreshed_source: None,
            refreshed_location: None,
        }
    }

    #[test]
    fn reads_fields_axes_and_captions() {
        let def = table().definition;
        assert_eq!(def.name, "Sales");
        assert_eq!(def.source_sheet, "Data");
        assert_eq!(def.field_names, vec!["Region", "Rep", "Amount"]);
        assert_eq!(def.row_fields, vec![0]);
        assert!(def.column_fields.is_empty());
        assert_eq!(def.data_fields[0].aggregation, AggregationType::Sum);
        assert_eq!(def.data_fields[1].aggregation, AggregationType::Count);
        assert_eq!(def.data_fields[1].name, "Count of Amount");
        assert_eq!(def.grand_total(), "Total");
        assert_eq!(def.location.to_string(), "A3:B6");
        assert_eq!(def.shape(), PivotShape::SingleRowField { row_field: 0 });
    }

    #[test]
    fn refresh_renders_into_the_host_and_extends_the_source() {
        let mut pivot = table();
        let mut acc = pivot.accumulator().unwrap();
        for (i, (region, amount)) in [("N", 1.0), ("S", 2.0), ("N", 3.0)].iter().enumerate() {
            let mut row = Row::new(i as u32 + 1);
            row.set_cell(0, Cell::new_text(*region));
            row.set_cell(2, Cell::new_number(*amount));
            pivot.feed(&mut acc, &row);
        }
        let mut header = Row::new(0);
        header.set_cell(0, Cell::new_text("Region"));
        pivot.feed(&mut acc, &header);
        assert_eq!(acc.record_count(), 3);

        let mut host = Sheet::new("Report");
        host.set_cell(5, 1, Cell::new_number(99.0).with_style(Some(3)));
        let view = pivot.refresh(Some(3), Some(&acc), Some(&mut host)).unwrap();
        assert_eq!(view.range.to_string(), "A3:C6");
        assert_eq!(host.cell(3, 1).unwrap().value, CellValue::Number(4.0));
        assert_eq!(host.cell(5, 0).unwrap().value, CellValue::Text("Total".into()));
        assert_eq!(host.cell(5, 1).unwrap().value, CellValue::Number(6.0));
        assert_eq!(host.cell(5, 1).unwrap().style, Some(3));
        assert_eq!(pivot.source_range().to_string(), "A1:C4");

        let cache = pivot.rewrite_cache(CACHE).unwrap();
        assert!(cache.contains("<worksheetSource ref=\"A1:C4\" sheet=\"Data\"/>"));
        assert!(cache.contains("refreshOnLoad=\"1\""));
        let table = pivot.rewrite_table(TABLE).unwrap();
        assert!(table.contains("<location ref=\"A3:C6\""));
    }

    #[test]
    fn unsupported_shapes_only_extend_the_source() {
        let mut pivot = table();
        pivot.definition.column_fields.push(1);
        assert!(pivot.accumulator().is_none());
        let mut host = Sheet::new("Report");
        assert!(pivot.refresh(Some(10), None, Some(&mut host)).is_none());
        assert_eq!(pivot.source_range().to_string(), "A1:C11");
        assert_eq!(pivot.location().to_string(), "A3:B6");
        assert_eq!(pivot.rewrite_table(TABLE).unwrap(), TABLE);
    }
}
