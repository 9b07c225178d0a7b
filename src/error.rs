// src/error.rs

use thiserror::Error;

/// Errors that abort a whole pipeline run. Everything else is absorbed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input is empty")]
    EmptyInput,

    #[error("unsupported input type: {0}")]
    UnsupportedFormat(String),

    #[error("failed to parse PDF: {0}")]
    UnreadablePdf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the OCR engine and the page rasterizer.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine not available: {0}")]
    NotAvailable(String),

    /// Engine state corruption or a rejected parameter set. The session
    /// recreates the engine and retries once on this variant.
    #[error("transient OCR engine fault: {0}")]
    Transient(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("page rasterization failed: {0}")]
    Rasterize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OcrError::Transient(_))
    }
}

/// Errors from the remote extraction service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Missing project / processor / credentials. Detected before any request.
    #[error("remote extraction not configured: {0}")]
    NotConfigured(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("remote API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, RemoteError::NotConfigured(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
