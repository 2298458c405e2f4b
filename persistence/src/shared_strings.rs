//! FILENAME: persistence/src/shared_strings.rs
//! PURPOSE: The workbook-wide deduplicated string table (`xl/sharedStrings.xml`).
//! CONTEXT: Template entries keep their original `<si>` markup so rich text
//! and phonetic runs survive; entries added during generation are plain.

use crate::xml::{escape_text, local_name, needs_preserve, unescape_hex, write_declaration};
use crate::PersistenceError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{self, Write};

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    /// Inner markup of the template's `<si>`, copied verbatim on write.
    raw: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SharedStrings {
    entries: Vec<Entry>,
    index: HashMap<String, u32>,
    references: u64,
}

impl SharedStrings {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn parse(xml: &str) -> Result<Self, PersistenceError> {
        let mut table = SharedStrings::new();
        let mut reader = Reader::from_str(xml);
        let mut declared_count: Option<u64> = None;

        let mut in_si = false;
        let mut si_start = 0usize;
        let mut text = String::new();
        let mut in_t = false;
        let mut phonetic_depth = 0usize;

        loop {
            match reader.read_event()? {
                Event::Start(e) => match local_name(&e).as_str() {
                    "sst" => {
                        declared_count = crate::xml::attribute(&e, "count")?
                            .and_then(|c| c.parse().ok());
                    }
                    "si" => {
                        in_si = true;
                        si_start = reader.buffer_position();
                        text.clear();
                    }
                    "rPh" if in_si => phonetic_depth += 1,
                    "t" if in_si && phonetic_depth == 0 => in_t = true,
                    _ => {}
                },
                Event::Empty(e) => {
                    if local_name(&e) == "si" {
                        table.push_template(String::new(), String::new());
                    }
                }
                Event::Text(t) if in_t => {
                    text.push_str(&t.unescape()?);
                }
                Event::CData(t) if in_t => {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"t" => in_t = false,
                    b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                    b"si" if in_si => {
                        in_si = false;
                        let end_tag = e.name().as_ref().len() + 3;
                        let si_end = reader.buffer_position().saturating_sub(end_tag);
                        let raw = xml.get(si_start..si_end).unwrap_or_default().to_string();
                        table.push_template(unescape_hex(&text), raw);
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        table.references = declared_count
            .unwrap_or(0)
            .max(table.entries.len() as u64);
        Ok(table)
    }

    fn push_template(&mut self, text: String, raw: String) {
        let id = self.entries.len() as u32;
        // First occurrence wins so lookups stay stable for duplicates.
        self.index.entry(text.clone()).or_insert(id);
        self.entries.push(Entry {
            text,
            raw: Some(raw),
        });
    }

    /// Index of `text`, adding it to the table if needed. Every call counts
    /// as one reference.
    pub fn intern(&mut self, text: &str) -> u32 {
        self.references += 1;
        if let Some(id) = self.index.get(text) {
            return *id;
        }
        let id = self.entries.len() as u32;
        self.index.insert(text.to_string(), id);
        self.entries.push(Entry {
            text: text.to_string(),
            raw: None,
        });
        id
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(id as usize).map(|e| e.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn write<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        write_declaration(out)?;
        write!(
            out,
            "<sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" count=\"{}\" uniqueCount=\"{}\">",
            self.references,
            self.entries.len()
        )?;
        for entry in &self.entries {
            match &entry.raw {
                Some(raw) => write!(out, "<si>{}</si>", raw)?,
                None if needs_preserve(&entry.text) => write!(
                    out,
                    "<si><t xml:space=\"preserve\">{}</t></si>",
                    escape_text(&entry.text)
                )?,
                None => write!(out, "<si><t>{}</t></si>", escape_text(&entry.text))?,
            }
        }
        out.write_all(b"</sst>")
    }
}
