//! FILENAME: persistence/src/xml.rs
//! PURPOSE: Small XML helpers shared by the part readers and writers.
//! CONTEXT: Parts are parsed with quick-xml; untouched markup is copied as
//! raw bytes, so these helpers deal in byte offsets as much as in events.

use crate::PersistenceError;
use quick_xml::escape::unescape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{self, Write};

/// Local name of an element as an owned string ("x:row" -> "row").
pub(crate) fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Unescaped attribute value. Parts are always UTF-8.
fn attribute_value(attr: &Attribute<'_>) -> Result<String, PersistenceError> {
    let raw = String::from_utf8_lossy(attr.value.as_ref());
    let value = unescape(&raw).map_err(quick_xml::Error::from)?;
    Ok(value.into_owned())
}

/// All attributes of a start tag, unescaped, keeping prefixes in the keys.
pub(crate) fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, PersistenceError> {
    let mut out = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attribute_value(&attr)?;
        out.push((key, value));
    }
    Ok(out)
}

/// Value of one attribute, matched on its full (prefixed) name.
pub(crate) fn attribute(start: &BytesStart<'_>, name: &str) -> Result<Option<String>, PersistenceError> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attribute_value(&attr)?));
        }
    }
    Ok(None)
}

/// Value of one attribute, matched on its local name (`r:id` matches "id").
pub(crate) fn attribute_local(
    start: &BytesStart<'_>,
    name: &str,
) -> Result<Option<String>, PersistenceError> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            return Ok(Some(attribute_value(&attr)?));
        }
    }
    Ok(None)
}

pub(crate) fn set_attribute(attrs: &mut Vec<(String, String)>, key: &str, value: impl Into<String>) {
    let value = value.into();
    match attrs.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value,
        None => attrs.push((key.to_string(), value)),
    }
}

pub(crate) fn get_attribute<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Renders `<name a="b" ...` without the closing bracket.
pub(crate) fn open_tag(name: &str, attrs: &[(String, String)]) -> String {
    let mut tag = String::with_capacity(16 + attrs.len() * 16);
    tag.push('<');
    tag.push_str(name);
    for (key, value) in attrs {
        tag.push(' ');
        tag.push_str(key);
        tag.push_str("=\"");
        tag.push_str(&escape_attr(value));
        tag.push('"');
    }
    tag
}

// ============================================================================
// ESCAPING
// ============================================================================

fn is_hex_escape_at(bytes: &[u8], i: usize) -> bool {
    bytes.len() >= i + 7
        && bytes[i] == b'_'
        && bytes[i + 1] == b'x'
        && bytes[i + 2..i + 6].iter().all(u8::is_ascii_hexdigit)
        && bytes[i + 6] == b'_'
}

/// Escapes element text. Control characters that XML 1.0 cannot carry are
/// written as `_xHHHH_`, and a literal `_xHHHH_` gets its underscore escaped
/// so readers do not decode it.
pub(crate) fn escape_text(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 8);
    for (i, ch) in text.char_indices() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\t' | '\n' | '\r' => out.push(ch),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {
                out.push_str(&format!("_x{:04X}_", c as u32));
            }
            '_' if is_hex_escape_at(bytes, i) => out.push_str("_x005F_"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes an attribute value.
pub(crate) fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

/// Decodes `_xHHHH_` sequences produced by [`escape_text`].
pub(crate) fn unescape_hex(text: &str) -> String {
    if !text.contains("_x") {
        return text.to_string();
    }
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if is_hex_escape_at(bytes, i) {
            let code = u32::from_str_radix(&text[i + 2..i + 6], 16).ok();
            if let Some(ch) = code.and_then(char::from_u32) {
                out.push(ch);
                i += 7;
                continue;
            }
        }
        // Multi-byte characters are copied whole.
        let ch_len = text[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    out
}

pub(crate) fn needs_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)
}

// ============================================================================
// RAW PART EDITING
// ============================================================================

/// Byte span of an element inside a part, from `<` of the start tag to just
/// past its end (or empty) tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

/// Finds the first element with the given local name at any depth.
pub(crate) fn find_element(xml: &str, name: &str) -> Result<Option<(Span, Vec<(String, String)>, bool)>, PersistenceError> {
    let mut reader = Reader::from_str(xml);
    let mut depth_in_target = 0usize;
    let mut found: Option<(usize, Vec<(String, String)>)> = None;
    loop {
        let before = reader.buffer_position();
        match reader.read_event()? {
            Event::Empty(e) if found.is_none() && local_name(&e) == name => {
                let span = Span {
                    start: before,
                    end: reader.buffer_position(),
                };
                return Ok(Some((span, attributes(&e)?, true)));
            }
            Event::Start(e) => {
                if found.is_none() && local_name(&e) == name {
                    found = Some((before, attributes(&e)?));
                    depth_in_target = 1;
                } else if found.is_some() {
                    depth_in_target += 1;
                }
            }
            Event::End(_) if found.is_some() => {
                depth_in_target -= 1;
                if depth_in_target == 0 {
                    let (start, attrs) = found.take().unwrap_or_default();
                    let span = Span {
                        start,
                        end: reader.buffer_position(),
                    };
                    return Ok(Some((span, attrs, false)));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Byte offset just before the first element named in `names`, or before
/// the closing tag of the root element.
pub(crate) fn insertion_point(xml: &str, names: &[&str], root: &str) -> Result<Option<usize>, PersistenceError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    loop {
        let before = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 1 && names.contains(&local_name(&e).as_str()) {
                    return Ok(Some(before));
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 1 && names.contains(&local_name(&e).as_str()) {
                    return Ok(Some(before));
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && e.local_name().as_ref() == root.as_bytes() {
                    return Ok(Some(before));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Replaces the attributes of the first `name` element (rewriting only its
/// start tag), or inserts `<name .../>` at `fallback` if it is absent.
pub(crate) fn upsert_element_attributes<F>(
    xml: &str,
    name: &str,
    fallback: impl FnOnce(&str) -> Result<Option<usize>, PersistenceError>,
    edit: F,
) -> Result<String, PersistenceError>
where
    F: FnOnce(&mut Vec<(String, String)>),
{
    let mut reader = Reader::from_str(xml);
    loop {
        let before = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(&e) == name => {
                let self_closing = xml.as_bytes()[..reader.buffer_position()].ends_with(b"/>");
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = attributes(&e)?;
                edit(&mut attrs);
                let mut tag = open_tag(&tag_name, &attrs);
                tag.push_str(if self_closing { "/>" } else { ">" });
                let end = reader.buffer_position();
                return Ok(format!("{}{}{}", &xml[..before], tag, &xml[end..]));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    let mut attrs = Vec::new();
    edit(&mut attrs);
    let mut tag = open_tag(name, &attrs);
    tag.push_str("/>");
    match fallback(xml)? {
        Some(at) => Ok(format!("{}{}{}", &xml[..at], tag, &xml[at..])),
        None => Err(PersistenceError::InvalidFormat(format!(
            "cannot place <{}> in part",
            name
        ))),
    }
}

/// Writes an XML declaration.
pub(crate) fn write_declaration<W: Write + ?Sized>(out: &mut W) -> io::Result<()> {
    out.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n")
}
