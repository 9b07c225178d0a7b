// src/acquisition.rs

use crate::config::{Config, ExtractionSection, OcrSection};
use crate::document::SourceDocument;
use crate::error::{OcrError, PipelineError};
use crate::ocr::{OcrOutput, OcrSession, PageSegMode};
use crate::pdf_extract::{PdfContent, extract_text_from_pdf};
use crate::progress::ProgressReporter;
use crate::rasterize::page_images;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Confidence assigned to text read straight from the PDF text layer.
pub const NATIVE_TEXT_CONFIDENCE: f64 = 100.0;

/// Text recovered from a document, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredText {
    pub text: String,
    pub page_count: usize,
    pub used_ocr: bool,
    /// 0-100
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NativeText {
    Text(String),
    /// A PDF whose text layer is below the threshold.
    Insufficient { chars: usize },
    /// Not a PDF; there is no text layer to read.
    NotPdf,
}

/// The text of one page, from the best segmentation mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub text: String,
    pub confidence: f64,
    pub mode: Option<PageSegMode>,
}

impl PageText {
    fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            mode: None,
        }
    }
}

/// OCR result for a whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrText {
    pub text: String,
    pub pages: usize,
    /// Mean over pages that produced text; 0 when none did.
    pub confidence: f64,
}

/// Turns a document into text: the PDF text layer when it is rich enough,
/// otherwise page images through the shared OCR session.
pub struct TextAcquisition {
    extraction: ExtractionSection,
    ocr: OcrSection,
    session: Arc<OcrSession>,
}

impl TextAcquisition {
    pub fn new(cfg: &Config, session: Arc<OcrSession>) -> Self {
        Self {
            extraction: cfg.extraction.clone(),
            ocr: cfg.ocr.clone(),
            session,
        }
    }

    /// Read the text layer. Parsing runs on the blocking pool.
    pub async fn native_text(&self, document: &SourceDocument) -> Result<NativeText, PipelineError> {
        if !document.kind().is_pdf() {
            return Ok(NativeText::NotPdf);
        }
        let bytes = document.bytes().to_vec();
        let min_chars = self.extraction.native_text_min_chars;
        let content = tokio::task::spawn_blocking(move || extract_text_from_pdf(&bytes, min_chars))
            .await
            .unwrap_or_else(|e| PdfContent::Error(format!("text extraction task failed: {e}")));

        match content {
            PdfContent::Text(text) => Ok(NativeText::Text(text)),
            PdfContent::ScannedImage { chars } => Ok(NativeText::Insufficient { chars }),
            PdfContent::Error(msg) => Err(PipelineError::UnreadablePdf(msg)),
        }
    }

    /// Rasterize every page and OCR them in order. Failed pages count as
    /// empty; only a failure to produce page images is an error.
    pub async fn ocr(&self, document: &SourceDocument, progress: Option<&ProgressReporter>) -> Result<OcrText, OcrError> {
        let images = page_images(&self.ocr, document).await?;
        let total = images.pages().len();

        let mut texts = Vec::with_capacity(total);
        let mut confidences = Vec::new();
        for (index, image) in images.pages().iter().enumerate() {
            let page = self.sweep_page(image).await;
            info!(
                page = index + 1,
                chars = page.text.chars().filter(|c| !c.is_whitespace()).count(),
                confidence = page.confidence,
                psm = page.mode.map(|m| m.psm()),
                "Page OCR complete"
            );
            if !page.text.trim().is_empty() {
                confidences.push(page.confidence);
                texts.push(page.text);
            }
            if let Some(p) = progress {
                p.ocr_page(index + 1, total);
            }
        }
        images.cleanup();

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
        Ok(OcrText {
            text: texts.join("\n\n"),
            pages: total,
            confidence,
        })
    }

    /// Try each configured segmentation mode in order on one page image.
    async fn sweep_page(&self, image: &Path) -> PageText {
        let mut results = Vec::new();
        for &psm in &self.ocr.page_seg_modes {
            let mode = PageSegMode::from_psm(psm);
            match self.session.recognize(image, mode).await {
                Ok(output) => {
                    debug!(psm, chars = output.char_count(), confidence = output.confidence, "OCR mode result");
                    let done = output.confidence >= self.ocr.early_stop_confidence
                        && output.char_count() >= self.ocr.early_stop_min_chars;
                    results.push((mode, output));
                    if done {
                        break;
                    }
                }
                Err(e) => warn!(psm, error = %e, "OCR mode failed, skipping"),
            }
        }
        choose_page_result(results, &self.ocr)
    }

    /// Text layer first, OCR below the threshold or for images.
    pub async fn acquire(&self, document: &SourceDocument) -> Result<AcquiredText, PipelineError> {
        match self.native_text(document).await? {
            NativeText::Text(text) => {
                return Ok(AcquiredText {
                    text,
                    page_count: document.page_count(),
                    used_ocr: false,
                    confidence: NATIVE_TEXT_CONFIDENCE,
                });
            }
            NativeText::Insufficient { chars } => {
                info!(chars, "Text layer too thin, falling back to OCR");
            }
            NativeText::NotPdf => {}
        }

        match self.ocr(document, None).await {
            Ok(ocr) => Ok(AcquiredText {
                text: ocr.text,
                page_count: ocr.pages,
                used_ocr: true,
                confidence: ocr.confidence,
            }),
            Err(e) => {
                warn!(error = %e, "OCR unavailable, no text recovered");
                Ok(AcquiredText {
                    text: String::new(),
                    page_count: document.page_count(),
                    used_ocr: true,
                    confidence: 0.0,
                })
            }
        }
    }
}

/// Early-stop winner if any (it is the last result), else the most confident
/// result meeting the minimum length, else the most confident non-empty one.
pub(crate) fn choose_page_result(results: Vec<(PageSegMode, OcrOutput)>, cfg: &OcrSection) -> PageText {
    if let Some((mode, out)) = results.last() {
        if out.confidence >= cfg.early_stop_confidence && out.char_count() >= cfg.early_stop_min_chars {
            return PageText {
                text: out.text.clone(),
                confidence: out.confidence,
                mode: Some(*mode),
            };
        }
    }

    let best = |min_chars: usize| {
        results
            .iter()
            .filter(|(_, out)| out.char_count() >= min_chars.max(1))
            .max_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence))
    };
    match best(cfg.min_text_chars).or_else(|| best(1)) {
        Some((mode, out)) => PageText {
            text: out.text.clone(),
            confidence: out.confidence,
            mode: Some(*mode),
        },
        None => PageText::empty(),
    }
}
