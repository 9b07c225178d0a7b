// src/orchestrator.rs

use crate::acquisition::{NATIVE_TEXT_CONFIDENCE, NativeText, TextAcquisition};
use crate::config::{Config, ExtractionSection};
use crate::document::SourceDocument;
use crate::error::PipelineError;
use crate::heuristics::{InvoiceData, extract_invoice};
use crate::metrics::{ProcessingMetrics, data_extraction_score};
use crate::normalize::normalize;
use crate::ocr::OcrSession;
use crate::progress::{LogSink, ProgressReporter, ProgressSink, Stage};
use crate::remote::RemoteExtractionAdapter;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{Instrument, info, info_span, warn};

/// Tag of a path that produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtractionMethod {
    #[serde(rename = "RemoteAI")]
    RemoteAi,
    NativeText,
    OcrPsmSweep,
}

/// One successful run of a strategy.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub method: ExtractionMethod,
    pub raw_text: String,
    /// 0-100
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub pages: usize,
    /// Set by strategies that produce structured data themselves.
    pub invoice_data: Option<InvoiceData>,
}

impl ExtractionAttempt {
    fn text(method: ExtractionMethod, raw_text: String, confidence: f64, pages: usize) -> Self {
        Self {
            method,
            raw_text,
            confidence,
            elapsed_ms: 0,
            pages,
            invoice_data: None,
        }
    }
}

/// Why a strategy declined or gave up. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Skip {
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not applicable to this document")]
    NotApplicable,
    #[error("service unhealthy")]
    Unhealthy,
    #[error("failed: {0}")]
    Failed(String),
    #[error("insufficient text ({chars} chars)")]
    Insufficient { chars: usize },
}

/// A step in the fallback chain.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Progress stage reported before the attempt.
    fn stage(&self) -> Stage;

    async fn attempt(&self, document: &SourceDocument, progress: &ProgressReporter) -> Result<ExtractionAttempt, Skip>;
}

pub struct RemoteStrategy {
    adapter: Result<Arc<RemoteExtractionAdapter>, String>,
}

impl RemoteStrategy {
    pub fn new(adapter: Arc<RemoteExtractionAdapter>) -> Self {
        Self { adapter: Ok(adapter) }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            adapter: Err(reason.into()),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for RemoteStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::RemoteAi
    }

    fn stage(&self) -> Stage {
        Stage::Remote
    }

    async fn attempt(&self, document: &SourceDocument, _progress: &ProgressReporter) -> Result<ExtractionAttempt, Skip> {
        let adapter = self.adapter.as_ref().map_err(|reason| Skip::NotConfigured(reason.clone()))?;
        if !adapter.is_healthy() {
            return Err(Skip::Unhealthy);
        }
        match adapter.extract(document).await {
            Ok(remote) => Ok(ExtractionAttempt {
                invoice_data: Some(remote.invoice_data),
                ..ExtractionAttempt::text(
                    ExtractionMethod::RemoteAi,
                    remote.text,
                    remote.confidence,
                    document.page_count(),
                )
            }),
            Err(e) if e.is_configuration() => Err(Skip::NotConfigured(e.to_string())),
            Err(e) => {
                warn!(error = %e, "Remote extraction failed, falling back to local path");
                Err(Skip::Failed(e.to_string()))
            }
        }
    }
}

pub struct NativeTextStrategy {
    acquisition: Arc<TextAcquisition>,
}

impl NativeTextStrategy {
    pub fn new(acquisition: Arc<TextAcquisition>) -> Self {
        Self { acquisition }
    }
}

#[async_trait]
impl ExtractionStrategy for NativeTextStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::NativeText
    }

    fn stage(&self) -> Stage {
        Stage::NativeText
    }

    async fn attempt(&self, document: &SourceDocument, _progress: &ProgressReporter) -> Result<ExtractionAttempt, Skip> {
        match self.acquisition.native_text(document).await {
            Ok(NativeText::Text(text)) => Ok(ExtractionAttempt::text(
                ExtractionMethod::NativeText,
                text,
                NATIVE_TEXT_CONFIDENCE,
                document.page_count(),
            )),
            Ok(NativeText::Insufficient { chars }) => Err(Skip::Insufficient { chars }),
            Ok(NativeText::NotPdf) => Err(Skip::NotApplicable),
            Err(e) => Err(Skip::Failed(e.to_string())),
        }
    }
}

pub struct OcrSweepStrategy {
    acquisition: Arc<TextAcquisition>,
}

impl OcrSweepStrategy {
    pub fn new(acquisition: Arc<TextAcquisition>) -> Self {
        Self { acquisition }
    }
}

#[async_trait]
impl ExtractionStrategy for OcrSweepStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::OcrPsmSweep
    }

    fn stage(&self) -> Stage {
        Stage::Ocr
    }

    async fn attempt(&self, document: &SourceDocument, progress: &ProgressReporter) -> Result<ExtractionAttempt, Skip> {
        let ocr = self
            .acquisition
            .ocr(document, Some(progress))
            .await
            .map_err(|e| Skip::Failed(e.to_string()))?;
        Ok(ExtractionAttempt::text(
            ExtractionMethod::OcrPsmSweep,
            ocr.text,
            ocr.confidence,
            ocr.pages,
        ))
    }
}

/// What leaves the pipeline for one document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub extracted_text: String,
    pub invoice_data: InvoiceData,
    pub metrics: ProcessingMetrics,
    pub extraction_methods: Vec<ExtractionMethod>,
}

/// Runs the fallback chain and turns the first usable attempt into an
/// [`ExtractionOutcome`].
pub struct ExtractionOrchestrator {
    extraction: ExtractionSection,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    sink: Arc<dyn ProgressSink>,
}

impl ExtractionOrchestrator {
    /// Remote (when given), then native text, then the OCR sweep.
    pub fn new(
        cfg: &Config,
        remote: Option<Arc<RemoteExtractionAdapter>>,
        session: Arc<OcrSession>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let acquisition = Arc::new(TextAcquisition::new(cfg, session));
        let remote = match remote {
            Some(adapter) => RemoteStrategy::new(adapter),
            None => RemoteStrategy::unavailable("remote extraction not set up"),
        };
        Self::with_strategies(
            cfg.extraction.clone(),
            vec![
                Box::new(remote),
                Box::new(NativeTextStrategy::new(Arc::clone(&acquisition))),
                Box::new(OcrSweepStrategy::new(acquisition)),
            ],
            sink,
        )
    }

    /// Build the remote adapter from `cfg`. Missing remote settings are not
    /// an error; the remote strategy then always skips.
    pub async fn from_config(cfg: &Config, session: Arc<OcrSession>) -> Self {
        if !cfg.remote.is_configured() {
            info!(enabled = cfg.remote.enabled, "Remote extraction disabled, settings incomplete");
            return Self::new(cfg, None, session, Arc::new(LogSink));
        }
        let remote = match RemoteExtractionAdapter::from_config(cfg).await {
            Ok(adapter) => Some(Arc::new(adapter)),
            Err(e) if e.is_configuration() => {
                info!(reason = %e, "Remote extraction disabled");
                None
            }
            Err(e) => {
                warn!(error = %e, "Remote extraction unavailable");
                None
            }
        };
        Self::new(cfg, remote, session, Arc::new(LogSink))
    }

    pub fn with_strategies(
        extraction: ExtractionSection,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            extraction,
            strategies,
            sink,
        }
    }

    pub async fn extract_path(
        &self,
        path: impl AsRef<Path>,
        declared_mime: Option<&str>,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let document = SourceDocument::from_path(path, declared_mime).await?;
        Ok(self.extract(&document).await)
    }

    pub async fn extract_bytes(
        &self,
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let document = SourceDocument::from_bytes(bytes, declared_mime)?;
        Ok(self.extract(&document).await)
    }

    /// Extraction weakness shows up as nulls and low confidence, never as
    /// an error.
    pub async fn extract(&self, document: &SourceDocument) -> ExtractionOutcome {
        let span = info_span!("extract", document_id = %document.id(), name = ?document.name());
        self.run(document).instrument(span).await
    }

    async fn run(&self, document: &SourceDocument) -> ExtractionOutcome {
        let started = Instant::now();
        let progress = ProgressReporter::new(document.id(), Arc::clone(&self.sink));
        progress.stage(Stage::Started, "Extraction started");

        let attempt = self.first_attempt(document, &progress).await;

        let outcome = match attempt {
            Some(attempt) => {
                let method = attempt.method;
                let average_confidence = attempt.confidence;
                let pages = attempt.pages;
                let (text, data) = self.interpret(attempt, &progress);
                let metrics = ProcessingMetrics::compute(&data, average_confidence, pages, elapsed_ms(started));
                ExtractionOutcome {
                    extracted_text: text,
                    invoice_data: data,
                    metrics,
                    extraction_methods: vec![method],
                }
            }
            None => {
                warn!("Every extraction strategy skipped");
                let data = InvoiceData::empty(&self.extraction.default_currency);
                let metrics = ProcessingMetrics::compute(&data, 0.0, 0, elapsed_ms(started));
                ExtractionOutcome {
                    extracted_text: String::new(),
                    invoice_data: data,
                    metrics,
                    extraction_methods: Vec::new(),
                }
            }
        };

        info!(
            methods = ?outcome.extraction_methods,
            confidence = outcome.invoice_data.confidence,
            score = outcome.metrics.data_extraction_score,
            items = outcome.invoice_data.items.len(),
            elapsed_ms = outcome.metrics.processing_time_ms,
            "Extraction finished"
        );
        progress.stage(Stage::Completed, "Extraction completed");
        outcome
    }

    async fn first_attempt(&self, document: &SourceDocument, progress: &ProgressReporter) -> Option<ExtractionAttempt> {
        for strategy in &self.strategies {
            let method = strategy.method();
            progress.stage(strategy.stage(), format!("Trying {method:?}"));
            let started = Instant::now();
            match strategy.attempt(document, progress).await {
                Ok(mut attempt) => {
                    attempt.elapsed_ms = elapsed_ms(started);
                    info!(
                        method = ?method,
                        chars = attempt.raw_text.len(),
                        confidence = attempt.confidence,
                        elapsed_ms = attempt.elapsed_ms,
                        "Strategy succeeded"
                    );
                    return Some(attempt);
                }
                Err(skip) => info!(method = ?method, reason = %skip, "Strategy skipped"),
            }
        }
        None
    }

    /// Normalized text and structured data for an attempt. Text-only
    /// attempts go through field extraction here.
    fn interpret(&self, attempt: ExtractionAttempt, progress: &ProgressReporter) -> (String, InvoiceData) {
        let text = normalize(&attempt.raw_text);
        if let Some(data) = attempt.invoice_data {
            return (text, data);
        }

        progress.stage(Stage::Parsing, "Parsing invoice fields");
        let mut data = extract_invoice(&text, &self.extraction);
        data.confidence = if text.trim().is_empty() {
            0.0
        } else {
            (attempt.confidence + data_extraction_score(&data)) / 2.0
        };
        (text, data)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
