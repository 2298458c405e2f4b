//! FILENAME: report/src/config.rs
//! PURPOSE: Engine settings shared by every generation.

use crate::error::ConfigError;
use persistence::{
    ArchiveLimits, StreamingConfig, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_ENTRY_BYTES,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Smallest accepted compressed:inflated ratio of a template entry.
    pub min_inflate_ratio: f64,
    /// Rows kept in memory per sheet while streaming.
    pub row_window: usize,
    /// Put new strings into the workbook string table instead of inline.
    pub use_shared_strings: bool,
    pub max_entry_bytes: u64,
    pub max_entries: usize,
    pub style_max_columns: usize,
    pub style_max_keys: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_inflate_ratio: 0.01,
            row_window: 100,
            use_shared_strings: false,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            style_max_columns: engine::style::DEFAULT_MAX_COLUMNS,
            style_max_keys: engine::style::DEFAULT_MAX_KEYS,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reports the first setting that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_inflate_ratio.is_finite() && self.min_inflate_ratio > 0.0) {
            return Err(not_positive("min_inflate_ratio", self.min_inflate_ratio));
        }
        let counts = [
            ("row_window", self.row_window as u64),
            ("max_entry_bytes", self.max_entry_bytes),
            ("max_entries", self.max_entries as u64),
            ("style_max_columns", self.style_max_columns as u64),
            ("style_max_keys", self.style_max_keys as u64),
        ];
        match counts.iter().find(|(_, value)| *value == 0) {
            Some((field, value)) => Err(not_positive(*field, *value)),
            None => Ok(()),
        }
    }

    pub fn streaming(&self) -> StreamingConfig {
        StreamingConfig::new(self.row_window)
            .with_shared_strings(self.use_shared_strings)
            .with_style_bounds(self.style_max_columns, self.style_max_keys)
    }

    pub fn archive_limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_entries: self.max_entries,
            max_entry_bytes: self.max_entry_bytes,
        }
    }
}

fn not_positive(field: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::NotPositive {
        field,
        value: value.to_string(),
    }
}
