//! OCR engine seam and the shared session that owns the one live engine.

pub(crate) mod session;
mod tesseract;

pub use session::OcrSession;
pub use tesseract::{TesseractEngine, TesseractFactory};

use crate::error::OcrError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Page-segmentation mode, i.e. the layout the engine should assume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageSegMode {
    AutoOsd,
    Auto,
    SingleColumn,
    SingleBlock,
    SparseText,
    /// Any other raw tesseract `--psm` value.
    Other(u8),
}

impl PageSegMode {
    pub fn from_psm(psm: u8) -> Self {
        match psm {
            1 => PageSegMode::AutoOsd,
            3 => PageSegMode::Auto,
            4 => PageSegMode::SingleColumn,
            6 => PageSegMode::SingleBlock,
            11 => PageSegMode::SparseText,
            other => PageSegMode::Other(other),
        }
    }

    pub fn psm(&self) -> u8 {
        match self {
            PageSegMode::AutoOsd => 1,
            PageSegMode::Auto => 3,
            PageSegMode::SingleColumn => 4,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SparseText => 11,
            PageSegMode::Other(psm) => *psm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrWord {
    pub text: String,
    /// 0-100
    pub confidence: f64,
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f64,
}

/// One recognition pass over one image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence, 0-100. Zero when nothing was recognized.
    pub confidence: f64,
    pub words: Vec<OcrWord>,
    pub lines: Vec<OcrLine>,
}

impl OcrOutput {
    pub fn char_count(&self) -> usize {
        self.text.chars().filter(|c| !c.is_whitespace()).count()
    }
}

/// A live OCR engine instance.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &Path, mode: PageSegMode) -> Result<OcrOutput, OcrError>;

    /// Release engine resources. Called once, when the session discards it.
    async fn terminate(&self) {}
}

/// Creates engine instances for an [`OcrSession`].
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn OcrEngine>, OcrError>;
}
