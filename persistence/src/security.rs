//! FILENAME: persistence/src/security.rs
//! PURPOSE: Decompression limits for untrusted template archives.
//! CONTEXT: A template is a zip archive and may be crafted so that a few
//! kilobytes inflate to gigabytes. The limits travel with the template
//! source itself, so every decompression is checked against the limits of
//! the call that opened it; concurrent generations never share them.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;

/// Inflated bytes an entry may produce before the ratio check starts.
pub const GRACE_ENTRY_SIZE: u64 = 100 * 1024;
/// Default per-entry cap on inflated bytes.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 0xFFFF_FFFF;
/// Default cap on archive entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("entry '{entry}' inflates too far: compressed/inflated ratio {ratio:.5} is below the minimum {min_ratio}")]
    RatioBelowMinimum {
        entry: String,
        ratio: f64,
        min_ratio: f64,
    },

    #[error("entry '{entry}' exceeds {limit} inflated bytes")]
    EntryTooLarge { entry: String, limit: u64 },

    #[error("archive has {count} entries, the limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },
}

/// Limits applied while a template archive is decompressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InflateLimits {
    /// Smallest accepted compressed:inflated ratio; `None` disables the check.
    pub min_inflate_ratio: Option<f64>,
    pub max_entry_bytes: u64,
    pub max_entries: usize,
}

impl Default for InflateLimits {
    fn default() -> Self {
        InflateLimits {
            min_inflate_ratio: None,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

// ============================================================================
// TEMPLATE SOURCE
// ============================================================================

enum SourceData {
    Reader(Box<dyn Read + Send>),
    Buffered(Arc<[u8]>),
}

/// Raw template bytes plus the limits to decompress them with.
pub struct TemplateSource {
    data: SourceData,
    limits: InflateLimits,
}

impl TemplateSource {
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        TemplateSource {
            data: SourceData::Reader(Box::new(reader)),
            limits: InflateLimits::default(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        TemplateSource {
            data: SourceData::Buffered(bytes.into()),
            limits: InflateLimits::default(),
        }
    }

    pub fn limits(&self) -> &InflateLimits {
        &self.limits
    }

    pub fn map_limits<F: FnOnce(&mut InflateLimits)>(mut self, f: F) -> Self {
        f(&mut self.limits);
        self
    }

    /// Reads a streaming source into memory so it can be replayed.
    pub fn buffered(self) -> io::Result<Self> {
        match self.data {
            SourceData::Buffered(_) => Ok(self),
            SourceData::Reader(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(TemplateSource {
                    data: SourceData::Buffered(bytes.into()),
                    limits: self.limits,
                })
            }
        }
    }

    /// Cheap copy of a buffered source; streaming sources cannot be copied.
    pub fn try_clone(&self) -> Option<Self> {
        match &self.data {
            SourceData::Buffered(bytes) => Some(TemplateSource {
                data: SourceData::Buffered(Arc::clone(bytes)),
                limits: self.limits,
            }),
            SourceData::Reader(_) => None,
        }
    }

    pub(crate) fn into_parts(self) -> io::Result<(Arc<[u8]>, InflateLimits)> {
        let limits = self.limits;
        match self.buffered()?.data {
            SourceData::Buffered(bytes) => Ok((bytes, limits)),
            SourceData::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "template source could not be buffered",
            )),
        }
    }
}

impl fmt::Debug for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match &self.data {
            SourceData::Reader(_) => "reader".to_string(),
            SourceData::Buffered(bytes) => format!("{} bytes", bytes.len()),
        };
        f.debug_struct("TemplateSource")
            .field("data", &data)
            .field("limits", &self.limits)
            .finish()
    }
}

// ============================================================================
// STREAM POLICIES
// ============================================================================

/// A transformation applied to a template source before it is parsed.
pub trait StreamPolicy: Send + Sync {
    fn apply(&self, source: TemplateSource) -> TemplateSource;

    /// Applies `self`, then `next`.
    fn then<P: StreamPolicy>(self, next: P) -> Chain<Self, P>
    where
        Self: Sized,
    {
        Chain(self, next)
    }
}

impl<F> StreamPolicy for F
where
    F: Fn(TemplateSource) -> TemplateSource + Send + Sync,
{
    fn apply(&self, source: TemplateSource) -> TemplateSource {
        self(source)
    }
}

/// Sequential composition of two policies.
#[derive(Debug, Clone)]
pub struct Chain<A, B>(A, B);

impl<A: StreamPolicy, B: StreamPolicy> StreamPolicy for Chain<A, B> {
    fn apply(&self, source: TemplateSource) -> TemplateSource {
        self.1.apply(self.0.apply(source))
    }
}

/// Rejects archive entries whose compressed:inflated ratio drops below
/// `min_inflate_ratio`. The ratio only applies to sources this gate wrapped.
#[derive(Debug, Clone, Copy)]
pub struct SecurityGate {
    min_inflate_ratio: f64,
}

impl SecurityGate {
    pub fn new(min_inflate_ratio: f64) -> Self {
        SecurityGate { min_inflate_ratio }
    }
}

impl StreamPolicy for SecurityGate {
    fn apply(&self, source: TemplateSource) -> TemplateSource {
        let ratio = self.min_inflate_ratio;
        source.map_limits(|limits| limits.min_inflate_ratio = Some(ratio))
    }
}

/// Caps the number of entries and the inflated size of each entry.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_entry_bytes: u64,
}

impl StreamPolicy for ArchiveLimits {
    fn apply(&self, source: TemplateSource) -> TemplateSource {
        let ArchiveLimits {
            max_entries,
            max_entry_bytes,
        } = *self;
        source.map_limits(|limits| {
            limits.max_entries = max_entries;
            limits.max_entry_bytes = max_entry_bytes;
        })
    }
}

// ============================================================================
// GUARDED ENTRY READER
// ============================================================================

/// Counts inflated bytes of one archive entry and fails the read as soon as
/// a limit is crossed. Header sizes are not trusted.
pub(crate) struct GuardedEntry<R> {
    inner: R,
    entry: String,
    compressed: u64,
    inflated: u64,
    limits: InflateLimits,
}

impl<R: Read> GuardedEntry<R> {
    pub(crate) fn new(inner: R, entry: &str, compressed: u64, limits: InflateLimits) -> Self {
        GuardedEntry {
            inner,
            entry: entry.to_string(),
            compressed,
            inflated: 0,
            limits,
        }
    }

    fn check(&self) -> Result<(), GuardError> {
        if self.inflated > self.limits.max_entry_bytes {
            return Err(GuardError::EntryTooLarge {
                entry: self.entry.clone(),
                limit: self.limits.max_entry_bytes,
            });
        }
        if let Some(min_ratio) = self.limits.min_inflate_ratio {
            if self.inflated > GRACE_ENTRY_SIZE {
                let ratio = self.compressed as f64 / self.inflated as f64;
                if ratio < min_ratio {
                    return Err(GuardError::RatioBelowMinimum {
                        entry: self.entry.clone(),
                        ratio,
                        min_ratio,
                    });
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for GuardedEntry<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.inflated += n as u64;
        self.check()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(n)
    }
}
