//! FILENAME: report/src/formatting.rs
//! PURPOSE: Turns data source values into cell values and number formats.
//! CONTEXT: Each mapped field carries a format type and an optional format
//! string. The type decides how a value is coerced before it is written; the
//! format string (or the type's default) becomes the column's number format.
//! Date patterns arrive in `java.text.SimpleDateFormat` notation and are
//! translated to spreadsheet format codes.

use crate::data_source::FieldValue;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use engine::CellValue;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;
/// 1899-12-30 counted from 0001-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 693_594;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FormatType {
    #[default]
    General,
    Text,
    Integer,
    Number,
    Currency,
    Percent,
    Date,
    DateTime,
    Time,
    Boolean,
}

impl FormatType {
    /// Number format used when a field names none.
    pub fn default_format(self) -> Option<&'static str> {
        match self {
            FormatType::General | FormatType::Boolean => None,
            FormatType::Text => Some("@"),
            FormatType::Integer => Some("0"),
            FormatType::Number => Some("#,##0.00"),
            FormatType::Currency => Some("$#,##0.00"),
            FormatType::Percent => Some("0.00%"),
            FormatType::Date => Some("yyyy-mm-dd"),
            FormatType::DateTime => Some("yyyy-mm-dd hh:mm:ss"),
            FormatType::Time => Some("hh:mm:ss"),
        }
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, FormatType::Date | FormatType::DateTime | FormatType::Time)
    }

    /// Number format code for a field of this type with an optional
    /// user-supplied pattern.
    pub fn format_code(self, pattern: Option<&str>) -> Option<String> {
        match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if self.is_temporal() => Some(translate_date_pattern(p)),
            Some(p) => Some(p.to_string()),
            None => self.default_format().map(str::to_string),
        }
    }

    /// Converts `value` to what the cell stores. Values that do not fit the
    /// type are kept as text rather than dropped.
    pub fn coerce(self, value: &FieldValue) -> CellValue {
        if value.is_null() {
            return CellValue::Empty;
        }
        let coerced = match self {
            FormatType::General => Some(natural(value)),
            FormatType::Text => Some(CellValue::Text(display(value))),
            FormatType::Integer => number(value).map(|n| CellValue::Number(n.round())),
            FormatType::Number | FormatType::Currency | FormatType::Percent => {
                number(value).map(CellValue::Number)
            }
            FormatType::Date => date_serial_of(value).map(|s| CellValue::Number(s.floor())),
            FormatType::DateTime => date_serial_of(value).map(CellValue::Number),
            FormatType::Time => time_fraction_of(value).map(CellValue::Number),
            FormatType::Boolean => boolean(value).map(CellValue::Boolean),
        };
        coerced.unwrap_or_else(|| CellValue::Text(display(value)))
    }
}

// ============================================================================
// COERCION
// ============================================================================

fn natural(value: &FieldValue) -> CellValue {
    match value {
        FieldValue::Null => CellValue::Empty,
        FieldValue::Boolean(b) => CellValue::Boolean(*b),
        FieldValue::Integer(i) => CellValue::Number(*i as f64),
        FieldValue::Number(n) => CellValue::Number(*n),
        FieldValue::Date(d) => CellValue::Number(date_serial(*d)),
        FieldValue::DateTime(dt) => CellValue::Number(datetime_serial(*dt)),
        FieldValue::Time(t) => CellValue::Number(time_fraction(*t)),
        FieldValue::Text(s) => CellValue::Text(s.clone()),
    }
}

/// Plain text rendering; dates use ISO 8601.
pub fn display(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Boolean(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        FieldValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        FieldValue::Time(t) => t.format("%H:%M:%S").to_string(),
        FieldValue::Text(s) => s.clone(),
    }
}

fn number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        FieldValue::Date(_) | FieldValue::DateTime(_) => date_serial_of(value),
        FieldValue::Time(_) => time_fraction_of(value),
        other => other.as_f64(),
    }
}

fn boolean(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Boolean(b) => Some(*b),
        FieldValue::Integer(i) => Some(*i != 0),
        FieldValue::Number(n) => Some(*n != 0.0),
        FieldValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn date_serial_of(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Date(d) => Some(date_serial(*d)),
        FieldValue::DateTime(dt) => Some(datetime_serial(*dt)),
        FieldValue::Integer(i) => Some(*i as f64),
        FieldValue::Number(n) => Some(*n),
        FieldValue::Text(s) => parse_datetime(s.trim()).map(datetime_serial),
        _ => None,
    }
}

fn time_fraction_of(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Time(t) => Some(time_fraction(*t)),
        FieldValue::DateTime(dt) => Some(time_fraction(dt.time())),
        FieldValue::Number(n) => Some(n.fract()),
        FieldValue::Text(s) => {
            let s = s.trim();
            NaiveTime::parse_from_str(s, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .ok()
                .map(time_fraction)
                .or_else(|| parse_datetime(s).map(|dt| time_fraction(dt.time())))
        }
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Days since 1899-12-30, the spreadsheet 1900 date system.
pub fn date_serial(date: NaiveDate) -> f64 {
    (date.num_days_from_ce() - EPOCH_DAYS_FROM_CE) as f64
}

pub fn datetime_serial(dt: NaiveDateTime) -> f64 {
    date_serial(dt.date()) + time_fraction(dt.time())
}

pub fn time_fraction(time: NaiveTime) -> f64 {
    let seconds = time.num_seconds_from_midnight() as f64 + f64::from(time.nanosecond()) / 1e9;
    seconds / SECONDS_PER_DAY
}

// ============================================================================
// DATE PATTERNS
// ============================================================================

/// Translates a `SimpleDateFormat` pattern (`dd.MM.yyyy HH:mm`) into a
/// spreadsheet format code (`dd.mm.yyyy hh:mm`). Letters without a
/// spreadsheet equivalent (time zones, week numbers) are dropped.
pub fn translate_date_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            // '' is a literal quote; 'text' is quoted text.
            if chars.get(i + 1) == Some(&'\'') {
                out.push_str("\\'");
                i += 2;
                continue;
            }
            let mut literal = String::new();
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        literal.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                literal.push(chars[i]);
                i += 1;
            }
            if !literal.is_empty() {
                out.push('"');
                out.push_str(&literal.replace('"', "\\\""));
                out.push('"');
            }
            continue;
        }

        if !c.is_ascii_alphabetic() {
            match c {
                '-' | '/' | ':' | '.' | ',' | ' ' | '(' | ')' => out.push(c),
                _ => {
                    out.push('\\');
                    out.push(c);
                }
            }
            i += 1;
            continue;
        }

        let mut run = 1;
        while chars.get(i + run) == Some(&c) {
            run += 1;
        }
        let code = match (c, run) {
            ('y', 2) => "yy".to_string(),
            ('y' | 'u', _) => "yyyy".to_string(),
            ('M' | 'L', 1) => "m".to_string(),
            ('M' | 'L', 2) => "mm".to_string(),
            ('M' | 'L', 3) => "mmm".to_string(),
            ('M' | 'L', _) => "mmmm".to_string(),
            ('d', 1) => "d".to_string(),
            ('d', _) => "dd".to_string(),
            ('E', 1..=3) => "ddd".to_string(),
            ('E', _) => "dddd".to_string(),
            ('H' | 'h' | 'k' | 'K', 1) => "h".to_string(),
            ('H' | 'h' | 'k' | 'K', _) => "hh".to_string(),
            ('m', 1) => "m".to_string(),
            ('m', _) => "mm".to_string(),
            ('s', 1) => "s".to_string(),
            ('s', _) => "ss".to_string(),
            ('S', n) => "0".repeat(n.min(3)),
            ('a', _) => "AM/PM".to_string(),
            _ => String::new(),
        };
        out.push_str(&code);
        i += run;
    }
    out
}
