//! Format readers and the extension registry that selects them.
//!
//! Every reader turns one file into a list of [`Chunk`]s with contiguous chunk numbers and the
//! owning document's provenance stamped on each chunk. Reading is synchronous and all-or-nothing;
//! async callers run it on a blocking thread.

mod csv;
mod json;
pub mod metadata;
mod office;
pub mod page_tracker;
pub mod pdf;
mod text;

use crate::chunking::{ChunkingError, Splitter};
use crate::types::{Chunk, DataSourceId};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use pdf::EnhancedPdfConfig;

/// Errors raised while resolving a reader or extracting chunks from a file.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// No reader is registered for the file extension.
    #[error("Unsupported file extension: {0:?}")]
    NotSupportedFileExtension(String),
    /// The file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// CSV input was malformed.
    #[error("Malformed CSV: {0}")]
    Csv(#[from] ::csv::Error),
    /// JSON input was malformed or could not be serialized.
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// PDF parsing failed.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    /// DOCX/PPTX container or XML parsing failed.
    #[error("Office document extraction failed: {0}")]
    Office(String),
    /// Page start offsets do not add up to the reconstructed body length.
    #[error("Page accounting mismatch: expected final offset {expected}, computed {actual}")]
    PageAccounting {
        /// Body length plus one.
        expected: usize,
        /// Final cumulative offset actually computed.
        actual: usize,
    },
    /// The blocking reader task panicked or was cancelled.
    #[error("Reader task failed: {0}")]
    Task(String),
    /// The splitter rejected the input.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
}

impl ReaderError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// The closed set of supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderKind {
    /// Portable Document Format, page-aware.
    Pdf,
    /// Plain text and Markdown.
    PlainText,
    /// Word (OOXML) documents.
    Docx,
    /// PowerPoint presentations. Legacy binary `.ppt` files resolve here and are rejected on load.
    Pptx,
    /// Comma-separated values, one chunk per row.
    Csv,
    /// JSON documents.
    Json,
}

impl ReaderKind {
    /// Resolve a reader from a file extension including its leading dot (`".pdf"`).
    ///
    /// Matching is exact and case-sensitive.
    pub fn resolve(extension: &str) -> Result<Self, ReaderError> {
        match extension {
            ".pdf" => Ok(Self::Pdf),
            ".txt" | ".md" => Ok(Self::PlainText),
            ".docx" => Ok(Self::Docx),
            ".pptx" | ".pptm" | ".ppt" => Ok(Self::Pptx),
            ".csv" => Ok(Self::Csv),
            ".json" => Ok(Self::Json),
            other => Err(ReaderError::NotSupportedFileExtension(other.to_string())),
        }
    }

    /// Resolve a reader from the final extension of `path`; files without one resolve with `""`.
    pub fn for_path(path: &Path) -> Result<Self, ReaderError> {
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        Self::resolve(&extension)
    }

    /// Read `path` into stamped chunks.
    pub fn load_chunks(self, ctx: &ReaderContext, path: &Path) -> Result<Vec<Chunk>, ReaderError> {
        tracing::debug!(
            reader = ?self,
            path = %path.display(),
            document_id = %ctx.document_id,
            data_source_id = ctx.data_source_id,
            "Loading chunks"
        );
        let chunks = match self {
            Self::Pdf => pdf::load(ctx, path),
            Self::PlainText => text::load(ctx, path),
            Self::Docx => office::load_docx(ctx, path),
            Self::Pptx => office::load_pptx(ctx, path),
            Self::Csv => csv::load(ctx, path),
            Self::Json => json::load(ctx, path),
        }?;
        tracing::debug!(reader = ?self, chunks = chunks.len(), "Loaded chunks");
        Ok(chunks)
    }
}

/// Everything a reader needs besides the file itself.
#[derive(Clone)]
pub struct ReaderContext {
    /// Splitter used for free-text formats.
    pub splitter: Arc<dyn Splitter>,
    /// Identifier of the document being read.
    pub document_id: String,
    /// Collection owning the document.
    pub data_source_id: DataSourceId,
    /// Optional external PDF-to-Markdown conversion.
    pub enhanced_pdf: EnhancedPdfConfig,
}

impl ReaderContext {
    /// Context with enhanced PDF conversion disabled.
    pub fn new(
        splitter: Arc<dyn Splitter>,
        document_id: impl Into<String>,
        data_source_id: DataSourceId,
    ) -> Self {
        Self {
            splitter,
            document_id: document_id.into(),
            data_source_id,
            enhanced_pdf: EnhancedPdfConfig::default(),
        }
    }

    /// Replace the enhanced PDF settings.
    pub fn with_enhanced_pdf(mut self, enhanced_pdf: EnhancedPdfConfig) -> Self {
        self.enhanced_pdf = enhanced_pdf;
        self
    }
}

/// Base name of `path`, used as the `file_name` metadata value.
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn read_to_string(path: &Path) -> Result<String, ReaderError> {
    std::fs::read_to_string(path).map_err(|source| ReaderError::io(path, source))
}

pub(crate) fn read_bytes(path: &Path) -> Result<Vec<u8>, ReaderError> {
    std::fs::read(path).map_err(|source| ReaderError::io(path, source))
}

/// Split `body` into chunks carrying the context's provenance.
pub(crate) fn split_body(
    ctx: &ReaderContext,
    body: &str,
    file_name: &str,
) -> Result<Vec<Chunk>, ReaderError> {
    let spans = ctx.splitter.split(body)?;
    let mut chunks: Vec<Chunk> = spans
        .into_iter()
        .map(|span| {
            Chunk::new(
                span.text,
                span.start,
                metadata::base_metadata(ctx, file_name),
            )
        })
        .collect();
    metadata::stamp(&mut chunks, ctx, file_name);
    Ok(chunks)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::chunking::SemanticSplitter;

    pub(crate) fn context(chunk_size: usize) -> ReaderContext {
        let splitter = SemanticSplitter::whitespace(chunk_size, 0).expect("splitter");
        ReaderContext::new(Arc::new(splitter), "doc-1", 42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_registered_extension() {
        assert_eq!(ReaderKind::resolve(".pdf").unwrap(), ReaderKind::Pdf);
        assert_eq!(ReaderKind::resolve(".txt").unwrap(), ReaderKind::PlainText);
        assert_eq!(ReaderKind::resolve(".md").unwrap(), ReaderKind::PlainText);
        assert_eq!(ReaderKind::resolve(".docx").unwrap(), ReaderKind::Docx);
        assert_eq!(ReaderKind::resolve(".pptx").unwrap(), ReaderKind::Pptx);
        assert_eq!(ReaderKind::resolve(".pptm").unwrap(), ReaderKind::Pptx);
        assert_eq!(ReaderKind::resolve(".ppt").unwrap(), ReaderKind::Pptx);
        assert_eq!(ReaderKind::resolve(".csv").unwrap(), ReaderKind::Csv);
        assert_eq!(ReaderKind::resolve(".json").unwrap(), ReaderKind::Json);
    }

    #[test]
    fn resolution_is_case_sensitive() {
        let error = ReaderKind::resolve(".PDF").unwrap_err();
        assert!(matches!(error, ReaderError::NotSupportedFileExtension(ext) if ext == ".PDF"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let error = ReaderKind::resolve(".xyz").unwrap_err();
        assert!(matches!(error, ReaderError::NotSupportedFileExtension(ext) if ext == ".xyz"));
    }

    #[test]
    fn path_without_extension_resolves_empty() {
        let error = ReaderKind::for_path(Path::new("/tmp/README")).unwrap_err();
        assert!(matches!(error, ReaderError::NotSupportedFileExtension(ext) if ext.is_empty()));
        assert_eq!(
            ReaderKind::for_path(Path::new("/tmp/report.final.md")).unwrap(),
            ReaderKind::PlainText
        );
    }
}
