//! FILENAME: persistence/src/package.rs
//! PURPOSE: The zip container of a spreadsheet package and its bookkeeping
//! parts (`[Content_Types].xml` and the `.rels` relationship parts).
//! CONTEXT: Every entry is inflated through the guarded reader, so the limits
//! carried by the template source apply to each byte that leaves the archive.

use crate::security::{GuardError, GuardedEntry, InflateLimits};
use crate::xml::{attribute, escape_attr, local_name, write_declaration};
use crate::PersistenceError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use zip::ZipArchive;

pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub(crate) const ROOT_RELS_PART: &str = "_rels/.rels";

pub(crate) const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub(crate) const REL_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub(crate) const REL_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
pub(crate) const REL_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
pub(crate) const REL_CALC_CHAIN: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";
pub(crate) const REL_PIVOT_TABLE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotTable";
pub(crate) const REL_PIVOT_CACHE_DEFINITION: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheDefinition";

pub(crate) const CT_SHARED_STRINGS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml";
pub(crate) const CT_STYLES: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";

// ============================================================================
// PARTS
// ============================================================================

/// One archive entry.
#[derive(Debug, Clone)]
pub(crate) struct Part {
    pub name: String,
    pub data: Vec<u8>,
}

/// All entries of a package, in archive order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Package {
    parts: Vec<Part>,
    index: HashMap<String, usize>,
}

impl Package {
    /// Inflates every entry under `limits`.
    pub(crate) fn read(bytes: &[u8], limits: &InflateLimits) -> Result<Package, PersistenceError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        if archive.len() > limits.max_entries {
            return Err(GuardError::TooManyEntries {
                count: archive.len(),
                limit: limits.max_entries,
            }
            .into());
        }

        let mut package = Package::default();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().trim_start_matches('/').to_string();
            if entry.size() > limits.max_entry_bytes {
                return Err(GuardError::EntryTooLarge {
                    entry: name,
                    limit: limits.max_entry_bytes,
                }
                .into());
            }
            let compressed = entry.compressed_size();
            let capacity = entry.size().min(1 << 20) as usize;
            let mut guarded = GuardedEntry::new(entry, &name, compressed, *limits);
            let mut data = Vec::with_capacity(capacity);
            guarded
                .read_to_end(&mut data)
                .map_err(PersistenceError::from_read)?;
            package.insert(name, data);
        }
        Ok(package)
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        let name = name.into();
        match self.index.get(&name) {
            Some(i) => self.parts[*i].data = data,
            None => {
                self.index.insert(name.clone(), self.parts.len());
                self.parts.push(Part { name, data });
            }
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&[u8]> {
        self.index.get(name).map(|i| self.parts[*i].data.as_slice())
    }

    pub(crate) fn get_str(&self, name: &str) -> Result<Option<&str>, PersistenceError> {
        match self.get(name) {
            Some(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|e| PersistenceError::InvalidFormat(format!("{}: {}", name, e))),
            None => Ok(None),
        }
    }

    pub(crate) fn parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter()
    }
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
pub(crate) fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolves a relationship target against the part that owns it.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Inverse of [`resolve_target`] for parts in the same or a child directory.
pub(crate) fn relative_target(source_part: &str, target_part: &str) -> String {
    match source_part.rsplit_once('/') {
        Some((dir, _)) => match target_part.strip_prefix(&format!("{}/", dir)) {
            Some(relative) => relative.to_string(),
            None => format!("/{}", target_part),
        },
        None => target_part.to_string(),
    }
}

// ============================================================================
// CONTENT TYPES
// ============================================================================

#[derive(Debug, Clone, Default)]
pub(crate) struct ContentTypes {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub(crate) fn parse(xml: &str) -> Result<Self, PersistenceError> {
        let mut types = ContentTypes::default();
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => match local_name(&e).as_str() {
                    "Default" => {
                        if let (Some(ext), Some(ct)) =
                            (attribute(&e, "Extension")?, attribute(&e, "ContentType")?)
                        {
                            types.defaults.push((ext, ct));
                        }
                    }
                    "Override" => {
                        if let (Some(part), Some(ct)) =
                            (attribute(&e, "PartName")?, attribute(&e, "ContentType")?)
                        {
                            types.overrides.push((part.trim_start_matches('/').to_string(), ct));
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(types)
    }

    pub(crate) fn has_override(&self, part: &str) -> bool {
        self.overrides.iter().any(|(p, _)| p == part)
    }

    pub(crate) fn add_override(&mut self, part: &str, content_type: &str) {
        if !self.has_override(part) {
            self.overrides.push((part.to_string(), content_type.to_string()));
        }
    }

    pub(crate) fn remove_override(&mut self, part: &str) {
        self.overrides.retain(|(p, _)| p != part);
    }

    pub(crate) fn write<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        write_declaration(out)?;
        out.write_all(
            b"<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
        )?;
        for (ext, ct) in &self.defaults {
            write!(
                out,
                "<Default Extension=\"{}\" ContentType=\"{}\"/>",
                escape_attr(ext),
                escape_attr(ct)
            )?;
        }
        for (part, ct) in &self.overrides {
            write!(
                out,
                "<Override PartName=\"/{}\" ContentType=\"{}\"/>",
                escape_attr(part),
                escape_attr(ct)
            )?;
        }
        out.write_all(b"</Types>")
    }
}

// ============================================================================
// RELATIONSHIPS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Relationships {
    rels: Vec<Relationship>,
}

impl Relationships {
    pub(crate) fn parse(xml: &str) -> Result<Self, PersistenceError> {
        let mut rels = Vec::new();
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) if local_name(&e) == "Relationship" => {
                    let id = attribute(&e, "Id")?.unwrap_or_default();
                    let rel_type = attribute(&e, "Type")?.unwrap_or_default();
                    let target = attribute(&e, "Target")?.unwrap_or_default();
                    let external = attribute(&e, "TargetMode")?.as_deref() == Some("External");
                    rels.push(Relationship {
                        id,
                        rel_type,
                        target,
                        external,
                    });
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(Relationships { rels })
    }

    /// Reads the relationships owned by `part`; a missing part means none.
    pub(crate) fn for_part(package: &Package, part: &str) -> Result<Self, PersistenceError> {
        match package.get_str(&rels_part_for(part))? {
            Some(xml) => Relationships::parse(xml),
            None => Ok(Relationships::default()),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.iter()
    }

    pub(crate) fn by_id(&self, id: &str) -> Option<&Relationship> {
        self.rels.iter().find(|r| r.id == id)
    }

    pub(crate) fn by_type<'a>(&'a self, rel_type: &'a str) -> impl Iterator<Item = &'a Relationship> {
        self.rels.iter().filter(move |r| r.rel_type == rel_type)
    }

    pub(crate) fn remove_type(&mut self, rel_type: &str) -> bool {
        let before = self.rels.len();
        self.rels.retain(|r| r.rel_type != rel_type);
        before != self.rels.len()
    }

    /// Adds a relationship with a fresh `rIdN` and returns the id.
    pub(crate) fn add(&mut self, rel_type: &str, target: &str) -> String {
        let mut n = self.rels.len() + 1;
        while self.rels.iter().any(|r| r.id == format!("rId{}", n)) {
            n += 1;
        }
        let id = format!("rId{}", n);
        self.rels.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            external: false,
        });
        id
    }

    pub(crate) fn write<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        write_declaration(out)?;
        out.write_all(
            b"<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        )?;
        for rel in &self.rels {
            write!(
                out,
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
                escape_attr(&rel.id),
                escape_attr(&rel.rel_type),
                escape_attr(&rel.target)
            )?;
            if rel.external {
                out.write_all(b" TargetMode=\"External\"")?;
            }
            out.write_all(b"/>")?;
        }
        out.write_all(b"</Relationships>")
    }
}
