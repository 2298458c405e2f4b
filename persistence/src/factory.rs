//! FILENAME: persistence/src/factory.rs
//! PURPOSE: Turns template bytes into documents.
//! CONTEXT: Factories compose. A policy such as the security gate is applied
//! with `with_transformation`, a second factory is tried with
//! `with_fallback`, and `as_streamed` wraps the parsed workbook so rows can
//! be written through a bounded window. Unreadable templates never fail a
//! request: the base factory logs the reason and hands out an empty document.

use crate::evaluation::EvaluationSummary;
use crate::security::{StreamPolicy, TemplateSource};
use crate::streaming::{StreamingConfig, StreamingWorkbook};
use crate::xlsx_reader::load_xlsx;
use crate::{PersistenceError, Workbook};
use log::{debug, warn};
use std::io::{Seek, Write};

/// A parsed template, either fully in memory or wrapped for streaming.
#[derive(Debug)]
pub enum Document {
    Workbook(Workbook),
    Streaming(StreamingWorkbook),
}

impl Document {
    pub fn empty() -> Self {
        Document::Workbook(Workbook::empty())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Document::Workbook(_) => "in-memory",
            Document::Streaming(_) => "streaming",
        }
    }

    /// The parsed template behind either form.
    pub fn workbook(&self) -> &Workbook {
        match self {
            Document::Workbook(book) => book,
            Document::Streaming(stream) => stream.template(),
        }
    }

    pub fn sheet_count(&self) -> usize {
        self.workbook().sheet_count()
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.workbook().sheet_index(name)
    }

    pub fn as_streaming_mut(&mut self) -> Option<&mut StreamingWorkbook> {
        match self {
            Document::Streaming(stream) => Some(stream),
            Document::Workbook(_) => None,
        }
    }

    /// The streaming form, wrapping an in-memory workbook with `config`.
    pub fn into_streaming(self, config: StreamingConfig) -> Result<StreamingWorkbook, PersistenceError> {
        match self {
            Document::Streaming(stream) => Ok(stream),
            Document::Workbook(book) => StreamingWorkbook::new(book, config),
        }
    }

    pub fn refresh_pivots(&mut self) -> Result<usize, PersistenceError> {
        match self {
            Document::Workbook(book) => Ok(book.refresh_pivots()),
            Document::Streaming(stream) => stream.refresh_pivots(),
        }
    }

    pub fn evaluate_formulas(&mut self) -> Result<EvaluationSummary, PersistenceError> {
        match self {
            Document::Workbook(book) => Ok(book.evaluate_formulas()),
            Document::Streaming(stream) => stream.evaluate_formulas(),
        }
    }

    pub fn write<W: Write + Seek>(&mut self, out: W) -> Result<W, PersistenceError> {
        match self {
            Document::Workbook(book) => book.write(out),
            Document::Streaming(stream) => stream.write(out),
        }
    }
}

// ============================================================================
// FACTORIES
// ============================================================================

/// Produces a document from an optional template source.
pub trait DocumentFactory: Send + Sync {
    fn create(&self, source: Option<TemplateSource>) -> Result<Document, PersistenceError>;
}

impl<F> DocumentFactory for F
where
    F: Fn(Option<TemplateSource>) -> Result<Document, PersistenceError> + Send + Sync,
{
    fn create(&self, source: Option<TemplateSource>) -> Result<Document, PersistenceError> {
        self(source)
    }
}

/// Combinators available on every factory.
pub trait DocumentFactoryExt: DocumentFactory + Sized {
    /// Applies `policy` to the source before this factory sees it.
    fn with_transformation<P: StreamPolicy>(self, policy: P) -> WithTransformation<Self, P> {
        WithTransformation { inner: self, policy }
    }

    /// Hands the same template to `fallback` whenever this factory fails.
    fn with_fallback<G: DocumentFactory>(self, fallback: G) -> WithFallback<Self, G> {
        WithFallback {
            primary: self,
            fallback,
        }
    }

    /// Wraps produced workbooks for streaming. The window is checked here,
    /// not on first use.
    fn as_streamed(self, config: StreamingConfig) -> Result<Streamed<Self>, PersistenceError> {
        config.validate()?;
        Ok(Streamed { inner: self, config })
    }
}

impl<T: DocumentFactory> DocumentFactoryExt for T {}

/// Parses zipped SpreadsheetML packages. A missing or unreadable template
/// yields an empty in-memory document.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxDocumentFactory;

impl DocumentFactory for XlsxDocumentFactory {
    fn create(&self, source: Option<TemplateSource>) -> Result<Document, PersistenceError> {
        let Some(source) = source else {
            debug!("no template source, starting from an empty document");
            return Ok(Document::empty());
        };
        match load_xlsx(source) {
            Ok(book) => Ok(Document::Workbook(book)),
            Err(e) => {
                warn!("template could not be parsed, using an empty document: {}", e);
                Ok(Document::empty())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct WithTransformation<F, P> {
    inner: F,
    policy: P,
}

impl<F: DocumentFactory, P: StreamPolicy> DocumentFactory for WithTransformation<F, P> {
    fn create(&self, source: Option<TemplateSource>) -> Result<Document, PersistenceError> {
        self.inner.create(source.map(|s| self.policy.apply(s)))
    }
}

#[derive(Debug, Clone)]
pub struct WithFallback<F, G> {
    primary: F,
    fallback: G,
}

impl<F: DocumentFactory, G: DocumentFactory> DocumentFactory for WithFallback<F, G> {
    fn create(&self, source: Option<TemplateSource>) -> Result<Document, PersistenceError> {
        // Buffered so the fallback can see the same bytes.
        let source = match source.map(TemplateSource::buffered).transpose() {
            Ok(source) => source,
            Err(e) => {
                warn!("template source could not be read: {}", e);
                None
            }
        };
        let retry = source.as_ref().and_then(TemplateSource::try_clone);
        match self.primary.create(source) {
            Ok(document) => Ok(document),
            Err(e) => {
                warn!("document factory failed, trying fallback: {}", e);
                self.fallback.create(retry)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Streamed<F> {
    inner: F,
    config: StreamingConfig,
}

impl<F> Streamed<F> {
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }
}

impl<F: DocumentFactory> DocumentFactory for Streamed<F> {
    fn create(&self, source: Option<TemplateSource>) -> Result<Document, PersistenceError> {
        match self.inner.create(source)? {
            Document::Workbook(book) => Ok(Document::Streaming(StreamingWorkbook::new(book, self.config)?)),
            other => Err(PersistenceError::UnexpectedDocumentKind {
                expected: "in-memory",
                found: other.kind(),
            }),
        }
    }
}
