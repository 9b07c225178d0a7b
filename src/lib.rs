//! Invoice extraction pipeline: remote Document AI when configured, else the
//! PDF text layer or an OCR sweep, then pattern-based field extraction.

pub mod acquisition;
pub mod config;
pub mod document;
pub mod error;
pub mod heuristics;
pub mod metrics;
pub mod normalize;
pub mod ocr;
pub mod orchestrator;
pub mod pdf_extract;
pub mod progress;
pub mod rasterize;
pub mod remote;

pub use acquisition::{AcquiredText, TextAcquisition};
pub use config::Config;
pub use document::SourceDocument;
pub use error::{OcrError, PipelineError, RemoteError};
pub use heuristics::{InvoiceData, LineItem};
pub use metrics::ProcessingMetrics;
pub use orchestrator::{ExtractionMethod, ExtractionOrchestrator, ExtractionOutcome};
pub use progress::{ProgressEvent, ProgressSink};
