//! FILENAME: report/src/data_source.rs
//! PURPOSE: Rows coming from whatever backs a report.
//! CONTEXT: A data source answers one validated query with a lazy row
//! sequence. The generator consumes it once, in order, while the rows are
//! written out, so a source never has to hold a full result set.

use crate::error::DataSourceError;
use crate::query::ValidatedQuery;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One field value as delivered by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Number(n) => Some(*n),
            FieldValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Equality used for `WHERE` conditions: numbers compare by value
    /// regardless of variant.
    pub fn matches(&self, other: &FieldValue) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(dt: NaiveDateTime) -> Self {
        FieldValue::DateTime(dt)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Named field values of one result row. Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRow {
    fields: Vec<(String, FieldValue)>,
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<N: Into<String>, V: Into<FieldValue>> FromIterator<(N, V)> for DataRow {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut row = DataRow::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

/// Lazily produced rows of one query.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<DataRow, DataSourceError>> + Send + 'a>;

pub trait DataSource: Send + Sync {
    /// Runs `query` with `parameters` bound to its placeholders in order.
    fn query_for_stream(
        &self,
        query: &ValidatedQuery,
        parameters: &[FieldValue],
    ) -> Result<RowStream<'_>, DataSourceError>;
}

/// Tables held in memory, keyed by upper-cased table name.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataSource {
    tables: HashMap<String, Arc<Vec<DataRow>>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, rows: Vec<DataRow>) -> Self {
        self.insert_table(name, rows);
        self
    }

    pub fn insert_table(&mut self, name: &str, rows: Vec<DataRow>) {
        self.tables.insert(name.to_ascii_uppercase(), Arc::new(rows));
    }
}

impl DataSource for MemoryDataSource {
    fn query_for_stream(
        &self,
        query: &ValidatedQuery,
        parameters: &[FieldValue],
    ) -> Result<RowStream<'_>, DataSourceError> {
        let rows = self
            .tables
            .get(&query.table().to_ascii_uppercase())
            .ok_or_else(|| DataSourceError::UnknownTable(query.table().to_string()))?;
        let conditions: Vec<(String, FieldValue)> = query
            .condition_columns()
            .iter()
            .cloned()
            .zip(parameters.iter().cloned())
            .collect();
        let rows = Arc::clone(rows);
        let mut next = 0;
        Ok(Box::new(std::iter::from_fn(move || {
            while let Some(row) = rows.get(next) {
                next += 1;
                let keep = conditions
                    .iter()
                    .all(|(column, value)| row.get(column).map_or(false, |v| v.matches(value)));
                if keep {
                    return Some(Ok(row.clone()));
                }
            }
            None
        })))
    }
}
