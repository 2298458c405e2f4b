//! Shared fixtures for the report scenarios.
#![allow(dead_code)]

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use report::{
    DataRow, EngineConfig, FieldAttribute, FormatType, MemoryDataSource, MemoryTemplateRepository, QueryMapping,
    ReportDefinition, ReportGenerator, TemplateService,
};
use rust_xlsxwriter::{Format, Workbook};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const REGIONS: [&str; 3] = ["North", "South", "East"];

/// `Data` holds only a bold header row; `Summary!A1` totals the amounts.
pub fn sales_template() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    let data = workbook.add_worksheet();
    data.set_name("Data").unwrap();
    for (col, title) in ["Region", "Rep", "Amount", "Day"].iter().enumerate() {
        data.write_string_with_format(0, col as u16, *title, &bold).unwrap();
    }

    let summary = workbook.add_worksheet();
    summary.set_name("Summary").unwrap();
    summary.write_string(0, 0, "Total").unwrap();
    summary.write_formula(0, 1, "=SUM(Data!C2:C100000)").unwrap();

    workbook.save_to_buffer().unwrap()
}

/// A template whose first sheet has no rows at all.
pub fn blank_sheet_template() -> Vec<u8> {
    let mut workbook = Workbook::new();
    workbook.add_worksheet().set_name("Export").unwrap();
    workbook.save_to_buffer().unwrap()
}

/// `template` plus a deflated entry of zero bytes that inflates far past
/// any sane compression ratio.
pub fn bomb(template: &[u8], zeros: usize) -> Vec<u8> {
    let mut source = ZipArchive::new(Cursor::new(template)).unwrap();
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for i in 0..source.len() {
        let mut entry = source.by_index(i).unwrap();
        let name = entry.name().to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        zip.start_file(name, options).unwrap();
        zip.write_all(&data).unwrap();
    }
    zip.start_file("xl/media/filler.bin", options).unwrap();
    let chunk = vec![0u8; 1 << 16];
    let mut left = zeros;
    while left > 0 {
        let n = left.min(chunk.len());
        zip.write_all(&chunk[..n]).unwrap();
        left -= n;
    }
    zip.finish().unwrap().into_inner()
}

/// `count` sales rows cycling through [`REGIONS`]; amount `i + 1`.
pub fn sales_rows(count: usize) -> Vec<DataRow> {
    (0..count)
        .map(|i| {
            DataRow::new()
                .with("REGION", REGIONS[i % REGIONS.len()])
                .with("REP", format!("rep {}", i))
                .with("AMOUNT", (i + 1) as f64)
                .with("DAY", format!("2024-01-{:02}", i % 28 + 1))
        })
        .collect()
}

pub fn sales_source(count: usize) -> MemoryDataSource {
    MemoryDataSource::new().with_table("SALES", sales_rows(count))
}

pub fn sales_fields() -> Vec<FieldAttribute> {
    vec![
        FieldAttribute::new("REGION", "Region").with_format_type(FormatType::Text),
        FieldAttribute::new("REP", "Rep"),
        FieldAttribute::new("AMOUNT", "Amount")
            .with_format_type(FormatType::Number)
            .with_format("#,##0.00"),
        FieldAttribute::new("DAY", "Day")
            .with_format_type(FormatType::Date)
            .with_format("dd.MM.yyyy")
            .with_column_width(14.0),
    ]
}

pub fn sales_report(template_id: &str, sheet: &str) -> ReportDefinition {
    ReportDefinition::new("sales", "Sales", template_id)
        .with_mapping(QueryMapping::new("SELECT * FROM ANY_REPORT.SALES", sheet, sales_fields()).unwrap())
}

pub fn generator(templates: &[(&str, Vec<u8>)], config: &EngineConfig) -> ReportGenerator {
    let repo = Arc::new(MemoryTemplateRepository::new());
    for (id, bytes) in templates {
        repo.insert(*id, bytes.clone()).unwrap();
    }
    ReportGenerator::new(TemplateService::new(repo, config).unwrap())
}

pub fn window(rows: usize) -> EngineConfig {
    EngineConfig {
        row_window: rows,
        ..EngineConfig::default()
    }
}

pub fn sheet_names(bytes: &[u8]) -> Vec<String> {
    let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes.to_vec())).unwrap();
    workbook.sheet_names().to_vec()
}

pub fn read_sheet(bytes: &[u8], name: &str) -> Range<Data> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes.to_vec())).unwrap();
    workbook.worksheet_range(name).unwrap()
}

pub fn number(range: &Range<Data>, row: u32, col: u32) -> f64 {
    match range.get_value((row, col)) {
        Some(Data::Float(f)) => *f,
        Some(Data::Int(i)) => *i as f64,
        Some(Data::DateTime(dt)) => dt.as_f64(),
        other => panic!("no number at ({}, {}): {:?}", row, col, other),
    }
}

pub fn text(range: &Range<Data>, row: u32, col: u32) -> String {
    match range.get_value((row, col)) {
        Some(Data::String(s)) => s.clone(),
        other => panic!("no text at ({}, {}): {:?}", row, col, other),
    }
}

/// Every entry of a package as text, keyed by name.
pub fn unzip(bytes: &[u8]) -> HashMap<String, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut parts = HashMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        parts.insert(entry.name().to_string(), String::from_utf8_lossy(&content).into_owned());
    }
    parts
}

// ============================================================================
// PIVOT TEMPLATE
// ============================================================================

const NS: &str = r#"xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;
const PKG: &str = r#"xmlns="http://schemas.openxmlformats.org/package/2006/relationships""#;
const REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const CT: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml";

/// `Data` (header Region/Amount only) feeds a pivot on `Pivot` at A1:B2
/// summing Amount by Region. `Pivot!D1` reads one data cell, `Pivot!E1`
/// totals the whole column. No `calcPr` in the workbook part.
pub fn pivot_template() -> Vec<u8> {
    let content_types = format!(
        concat!(
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
            r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
            r#"<Default Extension="xml" ContentType="application/xml"/>"#,
            r#"<Override PartName="/xl/workbook.xml" ContentType="{ct}.sheet.main+xml"/>"#,
            r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="{ct}.worksheet+xml"/>"#,
            r#"<Override PartName="/xl/worksheets/sheet2.xml" ContentType="{ct}.worksheet+xml"/>"#,
            r#"<Override PartName="/xl/pivotTables/pivotTable1.xml" ContentType="{ct}.pivotTable+xml"/>"#,
            r#"<Override PartName="/xl/pivotCache/pivotCacheDefinition1.xml" ContentType="{ct}.pivotCacheDefinition+xml"/>"#,
            "</Types>"
        ),
        ct = CT
    );
    let root_rels = format!(
        r#"<Relationships {}><Relationship Id="rId1" Type="{}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
        PKG, REL
    );
    let workbook = format!(
        r#"<workbook {}><sheets><sheet name="Data" sheetId="1" r:id="rId1"/><sheet name="Pivot" sheetId="2" r:id="rId2"/></sheets><pivotCaches><pivotCache cacheId="3" r:id="rId3"/></pivotCaches></workbook>"#,
        NS
    );
    let workbook_rels = format!(
        concat!(
            r#"<Relationships {pkg}>"#,
            r#"<Relationship Id="rId1" Type="{rel}/worksheet" Target="worksheets/sheet1.xml"/>"#,
            r#"<Relationship Id="rId2" Type="{rel}/worksheet" Target="worksheets/sheet2.xml"/>"#,
            r#"<Relationship Id="rId3" Type="{rel}/pivotCacheDefinition" Target="pivotCache/pivotCacheDefinition1.xml"/>"#,
            "</Relationships>"
        ),
        pkg = PKG,
        rel = REL
    );
    let data = format!(
        r#"<worksheet {}><dimension ref="A1:B1"/><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Region</t></is></c><c r="B1" t="inlineStr"><is><t>Amount</t></is></c></row></sheetData></worksheet>"#,
        NS
    );
    let pivot_sheet = format!(
        r#"<worksheet {}><dimension ref="A1:E2"/><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Row Labels</t></is></c><c r="B1" t="inlineStr"><is><t>Sum of Amount</t></is></c><c r="D1"><f>Data!B5</f><v>0</v></c><c r="E1"><f>SUM(Data!B:B)</f><v>0</v></c></row><row r="2"><c r="A2" t="inlineStr"><is><t>Grand Total</t></is></c></row></sheetData></worksheet>"#,
        NS
    );
    let sheet_rels = format!(
        r#"<Relationships {}><Relationship Id="rId1" Type="{}/pivotTable" Target="../pivotTables/pivotTable1.xml"/></Relationships>"#,
        PKG, REL
    );
    let table = format!(
        r#"<pivotTableDefinition {}  name="ByRegion" cacheId="3"><location ref="A1:B2" firstHeaderRow="1" firstDataRow="1" firstDataCol="1"/><pivotFields count="2"><pivotField axis="axisRow" showAll="0"/><pivotField dataField="1" showAll="0"/></pivotFields><rowFields count="1"><field x="0"/></rowFields><dataFields count="1"><dataField name="Sum of Amount" fld="1"/></dataFields></pivotTableDefinition>"#,
        NS
    );
    let table_rels = format!(
        r#"<Relationships {}><Relationship Id="rId1" Type="{}/pivotCacheDefinition" Target="../pivotCache/pivotCacheDefinition1.xml"/></Relationships>"#,
        PKG, REL
    );
    let cache = format!(
        r#"<pivotCacheDefinition {} recordCount="0"><cacheSource type="worksheet"><worksheetSource ref="A1:B1" sheet="Data"/></cacheSource><cacheFields count="2"><cacheField name="Region"/><cacheField name="Amount"/></cacheFields></pivotCacheDefinition>"#,
        NS
    );

    let parts: Vec<(&str, String)> = vec![
        ("[Content_Types].xml", content_types),
        ("_rels/.rels", root_rels),
        ("xl/workbook.xml", workbook),
        ("xl/_rels/workbook.xml.rels", workbook_rels),
        ("xl/worksheets/sheet1.xml", data),
        ("xl/worksheets/sheet2.xml", pivot_sheet),
        ("xl/worksheets/_rels/sheet2.xml.rels", sheet_rels),
        ("xl/pivotTables/pivotTable1.xml", table),
        ("xl/pivotTables/_rels/pivotTable1.xml.rels", table_rels),
        ("xl/pivotCache/pivotCacheDefinition1.xml", cache),
    ];
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in parts {
        zip.start_file(name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn region_rows(count: usize) -> MemoryDataSource {
    let rows = (0..count)
        .map(|i| {
            DataRow::new()
                .with("REGION", REGIONS[i % REGIONS.len()])
                .with("AMOUNT", 1i64 + (i % 3) as i64)
        })
        .collect();
    MemoryDataSource::new().with_table("REGIONS", rows)
}

pub fn region_report() -> ReportDefinition {
    let fields = vec![
        FieldAttribute::new("REGION", "Region"),
        FieldAttribute::new("AMOUNT", "Amount").with_format_type(FormatType::Integer),
    ];
    ReportDefinition::new("regions", "Regions", "pivot")
        .with_mapping(QueryMapping::new("SELECT * FROM ANY_REPORT.REGIONS", "Data", fields).unwrap())
}
