mod common;

use common::*;
use persistence::{DocumentFactory, TemplateSource, XlsxDocumentFactory};
use report::{EngineConfig, QueryMapping, ReportDefinition, TemplateService, MemoryTemplateRepository};
use std::io::Cursor;
use std::sync::Arc;

fn run(
    generator: &report::ReportGenerator,
    definition: &ReportDefinition,
    source: &report::MemoryDataSource,
) -> (report::GenerationSummary, Vec<u8>) {
    let mut out = Cursor::new(Vec::new());
    let summary = generator.stream(definition, source, &mut out).unwrap();
    (summary, out.into_inner())
}

#[test]
fn streams_250_rows_through_a_window_of_100() {
    let generator = generator(&[("sales", sales_template())], &window(100));
    let (summary, bytes) = run(&generator, &sales_report("sales", "Data"), &sales_source(250));

    let mapping = &summary.mappings[0];
    assert!(!mapping.skipped);
    assert!(!mapping.header_written);
    assert_eq!(mapping.rows_written, 250);
    assert_eq!(mapping.stats.rows_flushed, 250);
    assert_eq!(mapping.stats.peak_resident_rows, 100);
    // 150 single-row evictions while writing plus the final flush.
    assert_eq!(mapping.stats.flush_count, 151);

    let data = read_sheet(&bytes, "Data");
    assert_eq!(data.height(), 251);
    assert_eq!(text(&data, 0, 0), "Region");
    assert_eq!(text(&data, 1, 0), "North");
    assert_eq!(text(&data, 1, 1), "rep 0");
    assert_eq!(number(&data, 1, 2), 1.0);
    assert_eq!(number(&data, 1, 3), 45292.0);
    assert_eq!(text(&data, 250, 0), REGIONS[249 % 3]);
    assert_eq!(number(&data, 250, 2), 250.0);

    let summary_sheet = read_sheet(&bytes, "Summary");
    assert_eq!(number(&summary_sheet, 0, 1), 31375.0);
    assert_eq!(summary.formulas.evaluated, 1);
    assert_eq!(summary.formulas.unavailable, 0);
}

#[test]
fn streamed_cells_carry_formats_and_widths() {
    let generator = generator(&[("sales", sales_template())], &window(16));
    let (_, bytes) = run(&generator, &sales_report("sales", "Data"), &sales_source(20));

    let parts = unzip(&bytes);
    let sheet = &parts["xl/worksheets/sheet1.xml"];
    assert!(sheet.contains("<dimension ref=\"A1:D21\"/>"));
    assert!(sheet.contains("t=\"inlineStr\"><is><t>North</t></is>"));
    assert!(sheet.contains("<c r=\"C2\" s=\""));
    assert!(sheet.contains("width=\"14\""));
    assert!(sheet.contains("customWidth=\"1\""));
    assert!(parts["xl/styles.xml"].contains("formatCode=\"dd.mm.yyyy\""));
}

#[test]
fn shared_strings_policy_moves_text_into_the_table() {
    let config = EngineConfig {
        use_shared_strings: true,
        ..window(8)
    };
    let generator = generator(&[("sales", sales_template())], &config);
    let (_, bytes) = run(&generator, &sales_report("sales", "Data"), &sales_source(30));

    let parts = unzip(&bytes);
    assert!(!parts["xl/worksheets/sheet1.xml"].contains("inlineStr"));
    assert!(parts["xl/sharedStrings.xml"].contains("<t>rep 29</t>"));
    assert_eq!(text(&read_sheet(&bytes, "Data"), 30, 1), "rep 29");
}

#[test]
fn mappings_to_missing_sheets_are_skipped() {
    let generator = generator(&[("sales", sales_template())], &window(10));
    let definition = sales_report("sales", "Data").with_mapping(
        QueryMapping::new("SELECT * FROM ANY_REPORT.SALES", "Nowhere", sales_fields()).unwrap(),
    );
    let (summary, bytes) = run(&generator, &definition, &sales_source(5));

    assert!(!summary.mappings[0].skipped);
    assert!(summary.mappings[1].skipped);
    assert_eq!(summary.mappings[1].rows_written, 0);
    assert_eq!(sheet_names(&bytes), vec!["Data", "Summary"]);
    assert_eq!(read_sheet(&bytes, "Data").height(), 6);
}

#[test]
fn empty_target_sheets_get_a_header_row() {
    let generator = generator(&[("blank", blank_sheet_template())], &window(10));
    let (summary, bytes) = run(&generator, &sales_report("blank", "export"), &sales_source(12));

    assert!(summary.mappings[0].header_written);
    let export = read_sheet(&bytes, "Export");
    assert_eq!(export.height(), 13);
    assert_eq!(text(&export, 0, 0), "Region");
    assert_eq!(text(&export, 0, 3), "Day");
    assert_eq!(number(&export, 12, 2), 12.0);

    // Header cells stay unformatted; data cells carry the column formats.
    let parts = unzip(&bytes);
    let sheet = &parts["xl/worksheets/sheet1.xml"];
    assert!(sheet.contains("<c r=\"C1\" t=\"inlineStr\"><is><t>Amount</t></is></c>"));
    assert!(sheet.contains("<c r=\"D1\" t=\"inlineStr\"><is><t>Day</t></is></c>"));
    assert!(sheet.contains("<c r=\"C2\" s=\""));
}

#[test]
fn inflation_bombs_yield_an_empty_document() {
    let template = bomb(&sales_template(), 16 << 20);
    let generator = generator(&[("bomb", template)], &EngineConfig::default());
    let (summary, bytes) = run(&generator, &sales_report("bomb", "Data"), &sales_source(10));

    assert!(summary.mappings[0].skipped);
    assert_eq!(sheet_names(&bytes), vec!["Sheet1"]);
}

#[test]
fn missing_templates_and_bad_queries_fail() {
    let generator = generator(&[], &EngineConfig::default());
    let mut out = Cursor::new(Vec::new());
    let err = generator
        .stream(&sales_report("absent", "Data"), &sales_source(1), &mut out)
        .unwrap_err();
    assert!(matches!(err, report::ReportError::Template(_)));

    assert!(QueryMapping::new("SELECT * FROM ANY_REPORT.SALES WHERE 1 = 1", "Data", sales_fields()).is_err());
}

#[test]
fn concurrent_generations_stay_independent() {
    let generator = generator(
        &[("sales", sales_template()), ("blank", blank_sheet_template())],
        &window(10),
    );
    let first = (sales_report("sales", "Data"), sales_source(120));
    let second = (sales_report("blank", "Export"), sales_source(333));

    let (a, b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| run(&generator, &first.0, &first.1));
        let b = scope.spawn(|| run(&generator, &second.0, &second.1));
        (a.join().unwrap(), b.join().unwrap())
    });

    assert_eq!(a.0.mappings[0].rows_written, 120);
    assert_eq!(read_sheet(&a.1, "Data").height(), 121);
    assert_eq!(number(&read_sheet(&a.1, "Summary"), 0, 1), 7260.0);

    assert_eq!(b.0.mappings[0].rows_written, 333);
    let export = read_sheet(&b.1, "Export");
    assert_eq!(export.height(), 334);
    assert_eq!(number(&export, 333, 2), 333.0);
}

#[test]
fn guard_holds_under_contention() {
    let bomb = Arc::<[u8]>::from(bomb(&sales_template(), 4 << 20));
    let repo = Arc::new(MemoryTemplateRepository::new());
    repo.insert("bomb", Arc::clone(&bomb)).unwrap();
    let service = TemplateService::new(repo, &EngineConfig::default()).unwrap();

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for i in 0..16 {
            let service = &service;
            let bomb = Arc::clone(&bomb);
            handles.push(scope.spawn(move || {
                if i % 2 == 0 {
                    // Gated: must always be rejected.
                    service.find_template_by_id("bomb").unwrap().sheet_count() == 0
                } else {
                    // Ungated in parallel: must always parse.
                    let source = TemplateSource::from_bytes(bomb);
                    XlsxDocumentFactory.create(Some(source)).unwrap().sheet_count() == 2
                }
            }));
        }
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    });
}
