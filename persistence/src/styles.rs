//! FILENAME: persistence/src/styles.rs
//! PURPOSE: Edits to the package style sheet (`xl/styles.xml`).
//! CONTEXT: Only number formats and cell formats (`cellXfs`) are modelled.
//! Everything else in the part (fonts, fills, borders, dxfs, extensions) is
//! copied through untouched.

use crate::xml::{
    attributes, escape_attr, find_element, get_attribute, insertion_point, local_name, open_tag,
    set_attribute, write_declaration, Span,
};
use crate::PersistenceError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{self, Write};

/// First id available to custom number formats.
pub const FIRST_CUSTOM_NUM_FMT: u32 = 164;

const BUILTIN_NUM_FMTS: &[(u32, &str)] = &[
    (0, "General"),
    (1, "0"),
    (2, "0.00"),
    (3, "#,##0"),
    (4, "#,##0.00"),
    (9, "0%"),
    (10, "0.00%"),
    (11, "0.00E+00"),
    (12, "# ?/?"),
    (13, "# ??/??"),
    (14, "mm-dd-yy"),
    (15, "d-mmm-yy"),
    (16, "d-mmm"),
    (17, "mmm-yy"),
    (18, "h:mm AM/PM"),
    (19, "h:mm:ss AM/PM"),
    (20, "h:mm"),
    (21, "h:mm:ss"),
    (22, "m/d/yy h:mm"),
    (45, "mm:ss"),
    (46, "[h]:mm:ss"),
    (47, "mmss.0"),
    (48, "##0.0E+0"),
    (49, "@"),
];

const MINIMAL_STYLESHEET: &str = concat!(
    "<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
    "<fonts count=\"1\"><font><sz val=\"11\"/><name val=\"Calibri\"/><family val=\"2\"/></font></fonts>",
    "<fills count=\"2\"><fill><patternFill patternType=\"none\"/></fill><fill><patternFill patternType=\"gray125\"/></fill></fills>",
    "<borders count=\"1\"><border><left/><right/><top/><bottom/><diagonal/></border></borders>",
    "<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>",
    "<cellXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/></cellXfs>",
    "<cellStyles count=\"1\"><cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></cellStyles>",
    "</styleSheet>"
);

/// One `<xf>` of `cellXfs`: its attributes plus any child markup
/// (`<alignment>`, `<protection>`) kept as raw text.
#[derive(Debug, Clone, PartialEq)]
struct CellFormat {
    attrs: Vec<(String, String)>,
    inner: String,
}

impl CellFormat {
    fn write(&self, out: &mut String) {
        out.push_str(&open_tag("xf", &self.attrs));
        if self.inner.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            out.push_str(&self.inner);
            out.push_str("</xf>");
        }
    }
}

#[derive(Debug, Clone)]
pub struct StyleSheet {
    raw: String,
    num_fmts: Vec<(u32, String)>,
    cell_xfs: Vec<CellFormat>,
    num_fmts_span: Option<Span>,
    cell_xfs_span: Option<Span>,
    modified: bool,
}

impl Default for StyleSheet {
    fn default() -> Self {
        StyleSheet::parse(MINIMAL_STYLESHEET).unwrap_or(StyleSheet {
            raw: MINIMAL_STYLESHEET.to_string(),
            num_fmts: Vec::new(),
            cell_xfs: Vec::new(),
            num_fmts_span: None,
            cell_xfs_span: None,
            modified: true,
        })
    }
}

impl StyleSheet {
    pub(crate) fn parse(xml: &str) -> Result<Self, PersistenceError> {
        let mut sheet = StyleSheet {
            raw: xml.to_string(),
            num_fmts: Vec::new(),
            cell_xfs: Vec::new(),
            num_fmts_span: None,
            cell_xfs_span: None,
            modified: false,
        };

        if let Some((span, _, _)) = find_element(xml, "numFmts")? {
            sheet.num_fmts_span = Some(span);
            let mut reader = Reader::from_str(&xml[span.start..span.end]);
            loop {
                match reader.read_event()? {
                    Event::Start(e) | Event::Empty(e) if local_name(&e) == "numFmt" => {
                        let attrs = attributes(&e)?;
                        let id = get_attribute(&attrs, "numFmtId").and_then(|v| v.parse().ok());
                        let code = get_attribute(&attrs, "formatCode");
                        if let (Some(id), Some(code)) = (id, code) {
                            sheet.num_fmts.push((id, code.to_string()));
                        }
                    }
                    Event::Eof => break,
                    _ => {}
                }
            }
        }

        if let Some((span, _, is_empty)) = find_element(xml, "cellXfs")? {
            sheet.cell_xfs_span = Some(span);
            if !is_empty {
                sheet.cell_xfs = parse_cell_xfs(&xml[span.start..span.end])?;
            }
        }
        Ok(sheet)
    }

    /// Number of cell formats; valid style ids are `0..len`.
    pub fn cell_format_count(&self) -> usize {
        self.cell_xfs.len()
    }

    /// Number format id used by a cell format.
    pub fn num_fmt_of(&self, xf: u32) -> Option<u32> {
        self.cell_xfs
            .get(xf as usize)
            .and_then(|f| get_attribute(&f.attrs, "numFmtId"))
            .and_then(|v| v.parse().ok())
    }

    /// Format code for a number format id, built-in or custom.
    pub fn num_fmt_code(&self, id: u32) -> Option<&str> {
        self.num_fmts
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, c)| c.as_str())
            .or_else(|| {
                BUILTIN_NUM_FMTS
                    .iter()
                    .find(|(i, _)| *i == id)
                    .map(|(_, c)| *c)
            })
    }

    /// Id for a format code: built-in, already declared, or newly added.
    pub fn number_format_id(&mut self, code: &str) -> u32 {
        if let Some((id, _)) = BUILTIN_NUM_FMTS.iter().find(|(_, c)| *c == code) {
            return *id;
        }
        if let Some((id, _)) = self.num_fmts.iter().find(|(_, c)| c == code) {
            return *id;
        }
        let id = self
            .num_fmts
            .iter()
            .map(|(id, _)| *id + 1)
            .max()
            .unwrap_or(FIRST_CUSTOM_NUM_FMT)
            .max(FIRST_CUSTOM_NUM_FMT);
        self.num_fmts.push((id, code.to_string()));
        self.modified = true;
        id
    }

    /// A cell format equal to `base` (or the default format) but with
    /// `num_fmt_id`. Identical formats are shared.
    pub fn derive_cell_format(&mut self, base: Option<u32>, num_fmt_id: u32) -> u32 {
        let mut derived = base
            .and_then(|b| self.cell_xfs.get(b as usize))
            .or_else(|| self.cell_xfs.first())
            .cloned()
            .unwrap_or(CellFormat {
                attrs: vec![
                    ("numFmtId".to_string(), "0".to_string()),
                    ("fontId".to_string(), "0".to_string()),
                    ("fillId".to_string(), "0".to_string()),
                    ("borderId".to_string(), "0".to_string()),
                    ("xfId".to_string(), "0".to_string()),
                ],
                inner: String::new(),
            });
        set_attribute(&mut derived.attrs, "numFmtId", num_fmt_id.to_string());
        set_attribute(&mut derived.attrs, "applyNumberFormat", "1");

        if let Some(existing) = self.cell_xfs.iter().position(|f| *f == derived) {
            return existing as u32;
        }
        self.cell_xfs.push(derived);
        self.modified = true;
        (self.cell_xfs.len() - 1) as u32
    }

    pub(crate) fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), PersistenceError> {
        if !self.modified {
            out.write_all(self.raw.as_bytes())?;
            return Ok(());
        }
        let xml = self.rewrite()?;
        if !xml.starts_with("<?xml") {
            write_declaration(out)?;
        }
        out.write_all(xml.as_bytes())?;
        Ok(())
    }

    fn rewrite(&self) -> Result<String, PersistenceError> {
        let mut edits: Vec<(usize, usize, String)> = Vec::new();

        if !self.num_fmts.is_empty() {
            let mut block = format!("<numFmts count=\"{}\">", self.num_fmts.len());
            for (id, code) in &self.num_fmts {
                block.push_str(&format!(
                    "<numFmt numFmtId=\"{}\" formatCode=\"{}\"/>",
                    id,
                    escape_attr(code)
                ));
            }
            block.push_str("</numFmts>");
            let (start, end) = match self.num_fmts_span {
                Some(span) => (span.start, span.end),
                None => {
                    let at = insertion_point(
                        &self.raw,
                        &["fonts", "fills", "borders", "cellStyleXfs", "cellXfs", "cellStyles"],
                        "styleSheet",
                    )?
                    .ok_or_else(|| PersistenceError::InvalidFormat("styles part has no root".into()))?;
                    (at, at)
                }
            };
            edits.push((start, end, block));
        }

        let mut block = format!("<cellXfs count=\"{}\">", self.cell_xfs.len());
        for xf in &self.cell_xfs {
            xf.write(&mut block);
        }
        block.push_str("</cellXfs>");
        let (start, end) = match self.cell_xfs_span {
            Some(span) => (span.start, span.end),
            None => {
                let at = insertion_point(
                    &self.raw,
                    &["cellStyles", "dxfs", "tableStyles", "colors", "extLst"],
                    "styleSheet",
                )?
                .ok_or_else(|| PersistenceError::InvalidFormat("styles part has no root".into()))?;
                (at, at)
            }
        };
        edits.push((start, end, block));

        edits.sort_by(|a, b| b.0.cmp(&a.0));
        let mut xml = self.raw.clone();
        for (start, end, text) in edits {
            xml.replace_range(start..end, &text);
        }
        Ok(xml)
    }
}

fn parse_cell_xfs(fragment: &str) -> Result<Vec<CellFormat>, PersistenceError> {
    let mut formats = Vec::new();
    let mut reader = Reader::from_str(fragment);
    let mut depth = 0usize;
    let mut open: Option<(Vec<(String, String)>, usize)> = None;
    loop {
        let before = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 1 && local_name(&e) == "xf" {
                    open = Some((attributes(&e)?, reader.buffer_position()));
                }
                depth += 1;
            }
            Event::Empty(e) if depth == 1 && local_name(&e) == "xf" => {
                formats.push(CellFormat {
                    attrs: attributes(&e)?,
                    inner: String::new(),
                });
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    if let Some((attrs, start)) = open.take() {
                        formats.push(CellFormat {
                            attrs,
                            inner: fragment[start..before].to_string(),
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(formats)
}
