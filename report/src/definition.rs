//! FILENAME: report/src/definition.rs
//! PURPOSE: Report metadata: which template, which queries, which sheets.

use crate::data_source::FieldValue;
use crate::error::QueryError;
use crate::formatting::FormatType;
use crate::query::ValidatedQuery;
use engine::{CellValue, MAX_COL};
use serde::{Deserialize, Serialize};

/// How one source field is shown in its column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAttribute {
    pub field_name: String,
    /// Header text when the target sheet has no template rows.
    pub display_name: String,
    /// Number format, or a date pattern for temporal types.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub format_type: FormatType,
    /// Column width in characters.
    #[serde(default)]
    pub column_width: Option<f64>,
}

impl FieldAttribute {
    pub fn new(field_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        FieldAttribute {
            field_name: field_name.into(),
            display_name: display_name.into(),
            format: None,
            format_type: FormatType::General,
            column_width: None,
        }
    }

    pub fn with_format_type(mut self, format_type: FormatType) -> Self {
        self.format_type = format_type;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_column_width(mut self, width: f64) -> Self {
        self.column_width = Some(width);
        self
    }

    pub fn number_format(&self) -> Option<String> {
        self.format_type.format_code(self.format.as_deref())
    }

    pub fn to_cell_value(&self, value: &FieldValue) -> CellValue {
        self.format_type.coerce(value)
    }
}

/// One query and where its rows go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawQueryMapping")]
pub struct QueryMapping {
    query: ValidatedQuery,
    sheet_name: String,
    fields: Vec<FieldAttribute>,
    parameters: Vec<FieldValue>,
}

#[derive(Deserialize)]
struct RawQueryMapping {
    query: String,
    sheet_name: String,
    fields: Vec<FieldAttribute>,
    #[serde(default)]
    parameters: Vec<FieldValue>,
}

impl TryFrom<RawQueryMapping> for QueryMapping {
    type Error = QueryError;

    fn try_from(raw: RawQueryMapping) -> Result<Self, Self::Error> {
        QueryMapping::new(&raw.query, raw.sheet_name, raw.fields)?.with_parameters(raw.parameters)
    }
}

impl QueryMapping {
    /// Validates `query` against the report grammar. Each field takes one
    /// column, so a mapping cannot have more fields than a sheet has columns.
    pub fn new(
        query: &str,
        sheet_name: impl Into<String>,
        fields: Vec<FieldAttribute>,
    ) -> Result<Self, QueryError> {
        let limit = MAX_COL as usize + 1;
        if fields.len() > limit {
            return Err(QueryError::TooManyFields {
                fields: fields.len(),
                limit,
            });
        }
        Ok(QueryMapping {
            query: ValidatedQuery::parse(query)?,
            sheet_name: sheet_name.into(),
            fields,
            parameters: Vec::new(),
        })
    }

    /// Binds one value per `?` placeholder, in order.
    pub fn with_parameters(mut self, parameters: Vec<FieldValue>) -> Result<Self, QueryError> {
        if parameters.len() != self.query.placeholder_count() {
            return Err(QueryError::ParameterCount {
                placeholders: self.query.placeholder_count(),
                bound: parameters.len(),
            });
        }
        self.parameters = parameters;
        Ok(self)
    }

    pub fn query(&self) -> &ValidatedQuery {
        &self.query
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn fields(&self) -> &[FieldAttribute] {
        &self.fields
    }

    pub fn parameters(&self) -> &[FieldValue] {
        &self.parameters
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub id: String,
    pub name: String,
    pub template_id: String,
    #[serde(default)]
    pub mappings: Vec<QueryMapping>,
}

impl ReportDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, template_id: impl Into<String>) -> Self {
        ReportDefinition {
            id: id.into(),
            name: name.into(),
            template_id: template_id.into(),
            mappings: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, mapping: QueryMapping) -> Self {
        self.mappings.push(mapping);
        self
    }
}
