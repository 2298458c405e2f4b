//! FILENAME: report/src/lib.rs
//! Report Module
//!
//! Fills spreadsheet templates with rows pulled from a data source. A
//! [`ReportDefinition`] names a template and a set of query mappings; the
//! [`ReportGenerator`] loads the template through the [`TemplateService`],
//! streams every mapping's rows into its target sheet, refreshes pivot
//! tables, evaluates formulas and writes the finished package.

pub mod config;
pub mod data_source;
pub mod definition;
pub mod error;
pub mod formatting;
pub mod generator;
pub mod query;
pub mod template;

pub use config::EngineConfig;
pub use data_source::{DataRow, DataSource, FieldValue, MemoryDataSource, RowStream};
pub use definition::{FieldAttribute, QueryMapping, ReportDefinition};
pub use error::{ConfigError, DataSourceError, QueryError, ReportError, TemplateError};
pub use formatting::FormatType;
pub use generator::{GenerationSummary, MappingSummary, ReportGenerator};
pub use query::ValidatedQuery;
pub use template::{DirectoryTemplateRepository, MemoryTemplateRepository, TemplateRepository, TemplateService};
