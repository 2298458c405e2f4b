//! FILENAME: persistence/src/error.rs

use crate::security::GuardError;
use engine::StyleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Archive rejected: {0}")]
    Guard(#[from] GuardError),

    #[error("Style error: {0}")]
    Style(#[from] StyleError),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Row {row} of sheet '{sheet}' is at or below the last flushed row {last_flushed}")]
    RowAlreadyFlushed {
        sheet: String,
        row: u32,
        last_flushed: u32,
    },

    #[error("Row {0} is past the last row a worksheet can hold")]
    RowOutOfRange(u32),

    #[error("Row window must be greater than zero")]
    InvalidWindow,

    #[error("Expected {expected} document, the wrapped factory produced {found}")]
    UnexpectedDocumentKind {
        expected: &'static str,
        found: &'static str,
    },
}

impl PersistenceError {
    /// Unwraps guard rejections that travelled through `std::io::Read`.
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        match err.get_ref().and_then(|inner| inner.downcast_ref::<GuardError>()) {
            Some(guard) => PersistenceError::Guard(guard.clone()),
            None => PersistenceError::Io(err),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for PersistenceError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        PersistenceError::Xml(quick_xml::Error::InvalidAttr(err))
    }
}
