//! FILENAME: persistence/src/evaluation.rs
//! PURPOSE: Recomputes cached formula results across a workbook.
//! CONTEXT: Resident cells come from the parsed sheets; rows that a
//! streamed sheet already flushed are only visible through its digest.

use crate::sheet::Sheet;
use engine::{Cell, CellCoord, CellRange, CellValue, EvalResult, Evaluator, SheetDigest, WorkbookView};
use log::debug;
use serde::Serialize;

/// Counts from one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    /// Formulas left without a cached value; readers recalculate them.
    pub unavailable: usize,
}

struct BookView<'a> {
    sheets: &'a [Sheet],
    digests: &'a [Option<&'a SheetDigest>],
}

impl WorkbookView for BookView<'_> {
    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name().eq_ignore_ascii_case(name))
    }

    fn cell(&self, sheet: usize, row: u32, col: u32) -> Option<&Cell> {
        self.sheets.get(sheet)?.cell(row, col)
    }

    fn cells_in(&self, sheet: usize, range: CellRange) -> Vec<(CellCoord, &Cell)> {
        let Some(sheet) = self.sheets.get(sheet) else {
            return Vec::new();
        };
        sheet
            .rows
            .range(range.first.0..=range.last.0)
            .flat_map(|(row, cells)| {
                cells
                    .cells
                    .range(range.first.1..=range.last.1)
                    .map(move |(col, cell)| ((*row, *col), cell))
            })
            .collect()
    }

    fn digest(&self, sheet: usize) -> Option<&SheetDigest> {
        self.digests.get(sheet).copied().flatten()
    }
}

/// Evaluates every formula cell of `sheets` and stores the results as the
/// cells' cached values. `digests[i]` summarises the flushed rows of sheet `i`.
pub(crate) fn evaluate_sheets(sheets: &mut [Sheet], digests: &[Option<&SheetDigest>]) -> EvaluationSummary {
    let results: Vec<(usize, u32, u32, EvalResult)> = {
        let view = BookView {
            sheets: &*sheets,
            digests,
        };
        let evaluator = Evaluator::new(&view);
        let mut results = Vec::new();
        for (index, sheet) in sheets.iter().enumerate() {
            for row in sheet.rows() {
                for (col, cell) in row.cells() {
                    if cell.formula.is_some() {
                        let result = evaluator.evaluate_cell(index, row.index(), col);
                        results.push((index, row.index(), col, result));
                    }
                }
            }
        }
        results
    };

    let mut summary = EvaluationSummary::default();
    for (index, row, col, result) in results {
        let cell = sheets
            .get_mut(index)
            .and_then(|s| s.rows.get_mut(&row))
            .and_then(|r| r.cell_mut(col));
        if let Some(cell) = cell {
            summary.evaluated += 1;
            cell.value = match result.to_cell_value() {
                Some(value) => value,
                None => {
                    summary.unavailable += 1;
                    CellValue::Empty
                }
            };
        }
    }
    debug!(
        "evaluated {} formulas, {} left to the reader",
        summary.evaluated, summary.unavailable
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::Formula;

    fn formula(text: &str) -> Cell {
        Cell::new_formula(text)
    }

    #[test]
    fn evaluates_across_sheets_and_marks_unknown_functions() {
        let mut data = Sheet::new("Data");
        data.set_cell(0, 0, Cell::new_number(2.0));
        data.set_cell(1, 0, Cell::new_number(3.0));
        let mut report = Sheet::new("Report");
        report.set_cell(0, 0, formula("SUM(Data!A1:A2)"));
        report.set_cell(0, 1, formula("A1*2"));
        report.set_cell(0, 2, formula("VLOOKUP(1,Data!A:A,1,FALSE)"));

        let mut sheets = vec![data, report];
        let summary = evaluate_sheets(&mut sheets, &[None, None]);
        assert_eq!(summary, EvaluationSummary { evaluated: 3, unavailable: 1 });
        assert_eq!(sheets[1].cell(0, 0).unwrap().value, CellValue::Number(5.0));
        assert_eq!(sheets[1].cell(0, 1).unwrap().value, CellValue::Number(10.0));
        assert_eq!(sheets[1].cell(0, 2).unwrap().value, CellValue::Empty);
    }

    #[test]
    fn flushed_rows_answer_whole_column_aggregates() {
        let mut digest = SheetDigest::new();
        for row in 1..=4u32 {
            let value = CellValue::Number(row as f64);
            digest.record_row(row, std::iter::once((0u32, &value)));
        }
        let mut data = Sheet::new("Data");
        data.set_cell(0, 0, Cell::new_text("Amount"));
        data.set_cell(0, 1, formula("SUM(A:A)"));
        data.set_cell(0, 2, formula("SUM(A2:A3)"));
        let mut follower = formula("");
        follower.formula = Some(Formula {
            text: String::new(),
            attributes: vec![("t".into(), "shared".into()), ("si".into(), "0".into())],
        });
        data.set_cell(0, 3, follower);

        let mut sheets = vec![data];
        let summary = evaluate_sheets(&mut sheets, &[Some(&digest)]);
        assert_eq!(sheets[0].cell(0, 1).unwrap().value, CellValue::Number(10.0));
        assert_eq!(sheets[0].cell(0, 2).unwrap().value, CellValue::Empty);
        assert_eq!(summary.unavailable, 2);
    }

    #[test]
    fn long_chains_below_each_formula_are_evaluated() {
        let n = 12_000u32;
        let mut sheet = Sheet::new("Chain");
        for row in 0..n - 1 {
            sheet.set_cell(row, 0, formula(&format!("A{}+1", row + 2)));
        }
        sheet.set_cell(n - 1, 0, Cell::new_number(0.0));

        let mut sheets = vec![sheet];
        let summary = evaluate_sheets(&mut sheets, &[None]);
        assert_eq!(summary, EvaluationSummary { evaluated: n as usize - 1, unavailable: 0 });
        assert_eq!(sheets[0].cell(0, 0).unwrap().value, CellValue::Number((n - 1) as f64));
        assert_eq!(sheets[0].cell(n - 2, 0).unwrap().value, CellValue::Number(1.0));
    }
}
