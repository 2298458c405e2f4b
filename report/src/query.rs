//! FILENAME: report/src/query.rs
//! PURPOSE: The one query shape a report may run.
//! CONTEXT: Queries come from report metadata, so they are checked against
//! a fixed grammar when a mapping is built and never reach a data source
//! unchecked:
//!
//! `SELECT * FROM ANY_REPORT.<TABLE>[ WHERE <COL> = ?[ AND <COL> = ?]*]`
//!
//! Keywords are upper case and separated by single spaces.

use crate::error::QueryError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^SELECT \* FROM ANY_REPORT\.([A-Za-z_][A-Za-z0-9_]*)((?: WHERE [A-Za-z_][A-Za-z0-9_]* = \?)(?: AND [A-Za-z_][A-Za-z0-9_]* = \?)*)?$",
    )
    .unwrap()
});

static CONDITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:WHERE|AND) ([A-Za-z_][A-Za-z0-9_]*) = \?").unwrap());

/// A query that matched the grammar, with its parts pulled out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ValidatedQuery {
    text: String,
    table: String,
    /// Column of each `?`, in order.
    columns: Vec<String>,
}

impl ValidatedQuery {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let text = text.trim();
        let captures = QUERY
            .captures(text)
            .ok_or_else(|| QueryError::Malformed(text.to_string()))?;
        let table = captures[1].to_string();
        let columns = captures
            .get(2)
            .map(|conditions| {
                CONDITION
                    .captures_iter(conditions.as_str())
                    .map(|c| c[1].to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ValidatedQuery {
            text: text.to_string(),
            table,
            columns,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn condition_columns(&self) -> &[String] {
        &self.columns
    }

    pub fn placeholder_count(&self) -> usize {
        self.columns.len()
    }
}

impl TryFrom<String> for ValidatedQuery {
    type Error = QueryError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        ValidatedQuery::parse(&text)
    }
}

impl From<ValidatedQuery> for String {
    fn from(query: ValidatedQuery) -> Self {
        query.text
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_grammar() {
        let q = ValidatedQuery::parse("SELECT * FROM ANY_REPORT.SALES").unwrap();
        assert_eq!(q.table(), "SALES");
        assert_eq!(q.placeholder_count(), 0);

        let q = ValidatedQuery::parse("SELECT * FROM ANY_REPORT.SALES WHERE REGION = ? AND YEAR_2 = ?").unwrap();
        assert_eq!(q.condition_columns(), ["REGION".to_string(), "YEAR_2".to_string()]);
        assert_eq!(q.to_string(), "SELECT * FROM ANY_REPORT.SALES WHERE REGION = ? AND YEAR_2 = ?");
    }

    #[test]
    fn rejects_everything_else() {
        for text in [
            "",
            "select * from ANY_REPORT.SALES",
            "SELECT * FROM OTHER.SALES",
            "SELECT A FROM ANY_REPORT.SALES",
            "SELECT * FROM ANY_REPORT.SALES WHERE REGION = 'N'",
            "SELECT * FROM ANY_REPORT.SALES AND REGION = ?",
            "SELECT * FROM ANY_REPORT.SALES WHERE REGION = ? OR YEAR = ?",
            "SELECT * FROM ANY_REPORT.SALES; DROP TABLE SALES",
            "SELECT *  FROM ANY_REPORT.SALES",
            "SELECT * FROM ANY_REPORT.SALES WHERE 1REGION = ?",
        ] {
            assert!(
                matches!(ValidatedQuery::parse(text), Err(QueryError::Malformed(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn deserializes_through_validation() {
        let q: ValidatedQuery = serde_json::from_str(r#""SELECT * FROM ANY_REPORT.T WHERE A = ?""#).unwrap();
        assert_eq!(q.table(), "T");
        assert!(serde_json::from_str::<ValidatedQuery>(r#""DELETE FROM T""#).is_err());
        assert_eq!(serde_json::to_string(&q).unwrap(), r#""SELECT * FROM ANY_REPORT.T WHERE A = ?""#);
    }
}
