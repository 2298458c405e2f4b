//! FILENAME: persistence/src/cell_xml.rs
//! PURPOSE: Serializes rows and cells to SpreadsheetML `<row>`/`<c>` markup.
//! CONTEXT: Used for template rows and for rows flushed by the streaming
//! sheet. Element and attribute names must match the schema exactly.

use crate::shared_strings::SharedStrings;
use crate::sheet::Row;
use crate::xml::{escape_attr, escape_text, needs_preserve};
use engine::{coord_to_a1, Cell, CellError, CellType, CellValue};
use std::io::{self, Write};

/// Where new text values go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPolicy {
    /// Into the workbook-wide table, referenced by index.
    Shared,
    /// Self-contained `inlineStr` cells.
    Inline,
}

/// Formats a number the way readers parse `xsd:double`.
pub(crate) fn format_number(n: f64) -> String {
    let magnitude = n.abs();
    if magnitude != 0.0 && !(1e-5..1e16).contains(&magnitude) {
        format!("{:e}", n)
    } else {
        format!("{}", n)
    }
}

/// Writes one row. `style_for` looks up the Style Manager entry for a
/// column; an entry overrides the cell's own style, no entry leaves it.
pub(crate) fn write_row<W, F>(
    out: &mut W,
    row: &Row,
    strings: &mut SharedStrings,
    policy: StringPolicy,
    style_for: F,
) -> io::Result<()>
where
    W: Write + ?Sized,
    F: Fn(u32) -> Option<u32>,
{
    write!(out, "<row r=\"{}\"", row.index() + 1)?;
    for (key, value) in &row.attributes {
        write!(out, " {}=\"{}\"", key, escape_attr(value))?;
    }
    if row.is_empty() {
        return out.write_all(b"/>");
    }
    out.write_all(b">")?;
    for (col, cell) in row.cells() {
        let style = style_for(col).or(cell.style);
        write_cell(out, row.index(), col, cell, style, strings, policy)?;
    }
    out.write_all(b"</row>")
}

pub(crate) fn write_cell<W: Write + ?Sized>(
    out: &mut W,
    row: u32,
    col: u32,
    cell: &Cell,
    style: Option<u32>,
    strings: &mut SharedStrings,
    policy: StringPolicy,
) -> io::Result<()> {
    let reference = coord_to_a1((row, col));
    let style = style.filter(|s| *s != 0);
    let open = |out: &mut W, kind: Option<&str>| -> io::Result<()> {
        write!(out, "<c r=\"{}\"", reference)?;
        if let Some(s) = style {
            write!(out, " s=\"{}\"", s)?;
        }
        if let Some(t) = kind {
            write!(out, " t=\"{}\"", t)?;
        }
        Ok(())
    };

    match cell.cell_type() {
        CellType::Blank => {
            open(out, None)?;
            out.write_all(b"/>")
        }
        CellType::Formula => {
            let kind = match &cell.value {
                CellValue::Text(_) => Some("str"),
                CellValue::Boolean(_) => Some("b"),
                CellValue::Error(_) => Some("e"),
                CellValue::Number(_) | CellValue::Empty => None,
            };
            open(out, kind)?;
            out.write_all(b">")?;
            if let Some(formula) = &cell.formula {
                out.write_all(b"<f")?;
                for (key, value) in &formula.attributes {
                    write!(out, " {}=\"{}\"", key, escape_attr(value))?;
                }
                if formula.text.is_empty() {
                    out.write_all(b"/>")?;
                } else {
                    write!(out, ">{}</f>", escape_text(&formula.text))?;
                }
            }
            match &cell.value {
                CellValue::Number(n) if n.is_finite() => write!(out, "<v>{}</v>", format_number(*n))?,
                CellValue::Number(_) | CellValue::Empty => {}
                CellValue::Text(s) => write!(out, "<v>{}</v>", escape_text(s))?,
                CellValue::Boolean(b) => write!(out, "<v>{}</v>", u8::from(*b))?,
                CellValue::Error(e) => write!(out, "<v>{}</v>", e.as_str())?,
            }
            out.write_all(b"</c>")
        }
        CellType::String => {
            let text = match &cell.value {
                CellValue::Text(s) => s.as_str(),
                _ => "",
            };
            match policy {
                StringPolicy::Shared => {
                    let index = strings.intern(text);
                    open(out, Some("s"))?;
                    write!(out, "><v>{}</v></c>", index)
                }
                StringPolicy::Inline => {
                    open(out, Some("inlineStr"))?;
                    if needs_preserve(text) {
                        write!(out, "><is><t xml:space=\"preserve\">{}</t></is></c>", escape_text(text))
                    } else {
                        write!(out, "><is><t>{}</t></is></c>", escape_text(text))
                    }
                }
            }
        }
        CellType::Numeric => match cell.value {
            CellValue::Number(n) if n.is_finite() => {
                open(out, None)?;
                write!(out, "><v>{}</v></c>", format_number(n))
            }
            _ => {
                open(out, Some("e"))?;
                write!(out, "><v>{}</v></c>", CellError::Num.as_str())
            }
        },
        CellType::Boolean => {
            let flag = matches!(cell.value, CellValue::Boolean(true));
            open(out, Some("b"))?;
            write!(out, "><v>{}</v></c>", u8::from(flag))
        }
        CellType::Error => {
            let code = match &cell.value {
                CellValue::Error(e) => e.as_str(),
                _ => CellError::Value.as_str(),
            };
            open(out, Some("e"))?;
            write!(out, "><v>{}</v></c>", code)
        }
    }
}
