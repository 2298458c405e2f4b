//! FILENAME: report/src/error.rs

use persistence::PersistenceError;
use thiserror::Error;

/// A query mapping rejected before it reaches a data source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query does not match 'SELECT * FROM ANY_REPORT.<TABLE>[ WHERE <COL> = ?[ AND <COL> = ?]*]': {0}")]
    Malformed(String),

    #[error("query has {placeholders} placeholders but {bound} parameters were bound")]
    ParameterCount { placeholders: usize, bound: usize },

    #[error("mapping has {fields} fields but a worksheet holds at most {limit} columns")]
    TooManyFields { fields: usize, limit: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Parse(String),

    #[error("invalid streaming setup: {0}")]
    Streaming(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("data source failed: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),

    #[error("template '{id}' could not be downloaded: {source}")]
    Download {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// The repository's store was poisoned by a panicking writer.
    #[error("template store unavailable while accessing '{0}'")]
    StoreUnavailable(String),
}

/// Everything that can abort one generation.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("document error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("style error: {0}")]
    Style(#[from] engine::StyleError),
}
