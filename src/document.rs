// src/document.rs

use crate::error::PipelineError;
use lopdf::Document;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Jpeg,
    Png,
    Tiff,
}

impl DocumentKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Jpeg => "image/jpeg",
            DocumentKind::Png => "image/png",
            DocumentKind::Tiff => "image/tiff",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Jpeg => "jpg",
            DocumentKind::Png => "png",
            DocumentKind::Tiff => "tif",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "application/pdf" => Some(DocumentKind::Pdf),
            "image/jpeg" | "image/jpg" => Some(DocumentKind::Jpeg),
            "image/png" => Some(DocumentKind::Png),
            "image/tiff" | "image/tif" => Some(DocumentKind::Tiff),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "jpg" | "jpeg" => Some(DocumentKind::Jpeg),
            "png" => Some(DocumentKind::Png),
            "tif" | "tiff" => Some(DocumentKind::Tiff),
            _ => None,
        }
    }

    /// Magic-byte sniffing.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(DocumentKind::Pdf)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(DocumentKind::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(DocumentKind::Png)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(DocumentKind::Tiff)
        } else {
            None
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, DocumentKind::Pdf)
    }
}

/// The file under processing. Immutable once built.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    id: String,
    name: Option<String>,
    bytes: Vec<u8>,
    kind: DocumentKind,
    page_count: usize,
}

impl SourceDocument {
    /// Read a file from disk. The extension is only a fallback type hint.
    pub async fn from_path(
        path: impl AsRef<Path>,
        declared_mime: Option<&str>,
    ) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let ext_hint = path.extension().and_then(|e| e.to_str());
        Self::build(bytes, declared_mime, ext_hint, name)
    }

    pub fn from_bytes(bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<Self, PipelineError> {
        Self::build(bytes, declared_mime, None, None)
    }

    fn build(
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
        ext_hint: Option<&str>,
        name: Option<String>,
    ) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let sniffed = DocumentKind::sniff(&bytes);
        let declared = declared_mime.and_then(DocumentKind::from_mime);
        if let (Some(s), Some(d)) = (sniffed, declared) {
            if s != d {
                warn!(
                    declared = d.mime_type(),
                    sniffed = s.mime_type(),
                    "Declared MIME type disagrees with content, using sniffed type"
                );
            }
        }

        let kind = sniffed
            .or(declared)
            .or_else(|| ext_hint.and_then(DocumentKind::from_extension))
            .ok_or_else(|| {
                PipelineError::UnsupportedFormat(
                    declared_mime.unwrap_or("unknown").to_string(),
                )
            })?;

        let page_count = match kind {
            DocumentKind::Pdf => Document::load_mem(&bytes)
                .map_err(|e| PipelineError::UnreadablePdf(e.to_string()))?
                .get_pages()
                .len(),
            _ => 1,
        };

        let id = document_id(&bytes);
        info!(
            document_id = %id,
            mime = kind.mime_type(),
            pages = page_count,
            bytes = bytes.len(),
            "Source document loaded"
        );

        Ok(Self {
            id,
            name,
            bytes,
            kind,
            page_count,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

/// Short content hash used in progress events, spans, and temp-dir names.
pub fn document_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}
