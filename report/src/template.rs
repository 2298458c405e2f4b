//! FILENAME: report/src/template.rs
//! PURPOSE: Loads templates by id and parses them behind the security gate.
//! CONTEXT: Fetching is the repository's job and its failures reach the
//! caller. Parsing goes through a factory chain (gate, archive limits,
//! parser, streaming wrapper) that absorbs unreadable templates into an
//! empty document.

use crate::config::EngineConfig;
use crate::error::{ConfigError, ReportError, TemplateError};
use log::{debug, info};
use persistence::{
    ArchiveLimits, Chain, Document, DocumentFactory, DocumentFactoryExt, SecurityGate, StreamPolicy,
    Streamed, StreamingConfig, TemplateSource, WithTransformation, XlsxDocumentFactory,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Where template bytes come from.
pub trait TemplateRepository: Send + Sync {
    fn find_template_by_id(&self, id: &str) -> Result<TemplateSource, TemplateError>;
}

/// Templates held in memory.
#[derive(Debug, Default)]
pub struct MemoryTemplateRepository {
    templates: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Result<(), TemplateError> {
        let id = id.into();
        let mut templates = self
            .templates
            .write()
            .map_err(|_| TemplateError::StoreUnavailable(id.clone()))?;
        templates.insert(id, bytes.into());
        Ok(())
    }
}

impl TemplateRepository for MemoryTemplateRepository {
    fn find_template_by_id(&self, id: &str) -> Result<TemplateSource, TemplateError> {
        let templates = self
            .templates
            .read()
            .map_err(|_| TemplateError::StoreUnavailable(id.to_string()))?;
        templates
            .get(id)
            .map(|bytes| TemplateSource::from_bytes(Arc::clone(bytes)))
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }
}

/// Templates stored as `<root>/<id>.xlsx`.
#[derive(Debug, Clone)]
pub struct DirectoryTemplateRepository {
    root: PathBuf,
}

impl DirectoryTemplateRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryTemplateRepository { root: root.into() }
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let plain = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        plain.then(|| self.root.join(format!("{}.xlsx", id)))
    }
}

impl TemplateRepository for DirectoryTemplateRepository {
    fn find_template_by_id(&self, id: &str) -> Result<TemplateSource, TemplateError> {
        let path = self
            .path_for(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;
        match File::open(&path) {
            Ok(file) => Ok(TemplateSource::from_reader(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TemplateError::NotFound(id.to_string())),
            Err(e) => Err(TemplateError::Download {
                id: id.to_string(),
                source: e,
            }),
        }
    }
}

type TemplateFactory = Streamed<WithTransformation<XlsxDocumentFactory, Chain<SecurityGate, ArchiveLimits>>>;

/// Fetches a template and parses it into a streaming document.
pub struct TemplateService {
    repository: Arc<dyn TemplateRepository>,
    factory: TemplateFactory,
}

impl TemplateService {
    /// Settings are validated here, never on first use.
    pub fn new(repository: Arc<dyn TemplateRepository>, config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let gate = SecurityGate::new(config.min_inflate_ratio).then(config.archive_limits());
        let factory = XlsxDocumentFactory
            .with_transformation(gate)
            .as_streamed(config.streaming())
            .map_err(|e| ConfigError::Streaming(e.to_string()))?;
        debug!(
            "template service ready: ratio {}, window {}",
            config.min_inflate_ratio, config.row_window
        );
        Ok(TemplateService { repository, factory })
    }

    pub fn streaming_config(&self) -> &StreamingConfig {
        self.factory.config()
    }

    pub fn find_template_by_id(&self, id: &str) -> Result<Document, ReportError> {
        let source = self.repository.find_template_by_id(id)?;
        let document = self.factory.create(Some(source))?;
        info!("template '{}' loaded with {} sheets", id, document.sheet_count());
        Ok(document)
    }
}
