// src/progress.rs

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Started,
    Remote,
    NativeText,
    Ocr,
    Parsing,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Started => "started",
            Stage::Remote => "remote",
            Stage::NativeText => "native_text",
            Stage::Ocr => "ocr",
            Stage::Parsing => "parsing",
            Stage::Completed => "completed",
        }
    }

    /// Percent reported when the stage begins.
    pub fn percent(&self) -> u8 {
        match self {
            Stage::Started => 0,
            Stage::Remote => 10,
            Stage::NativeText => 30,
            Stage::Ocr => OCR_START,
            Stage::Parsing => 90,
            Stage::Completed => 100,
        }
    }
}

const OCR_START: u8 = 40;
const OCR_END: u8 = 85;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub document_id: String,
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
}

/// Receives progress notifications. Closures work as sinks.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Logs every event at info level.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, event: &ProgressEvent) {
        info!(
            document_id = %event.document_id,
            stage = event.stage.as_str(),
            progress = event.progress,
            "{}", event.message
        );
    }
}

/// Forwards events to a channel. A closed receiver is ignored.
pub struct ChannelSink(pub UnboundedSender<ProgressEvent>);

impl ProgressSink for ChannelSink {
    fn report(&self, event: &ProgressEvent) {
        let _ = self.0.send(event.clone());
    }
}

/// Per-document reporter. Percent never goes backwards: a lower value than
/// one already reported is raised to it.
pub struct ProgressReporter {
    document_id: String,
    sink: Arc<dyn ProgressSink>,
    last: AtomicU8,
}

impl ProgressReporter {
    pub fn new(document_id: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            document_id: document_id.into(),
            sink,
            last: AtomicU8::new(0),
        }
    }

    pub fn stage(&self, stage: Stage, message: impl Into<String>) {
        self.report(stage, stage.percent(), message);
    }

    pub fn report(&self, stage: Stage, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100);
        let progress = self.last.fetch_max(percent, Ordering::SeqCst).max(percent);
        self.sink.report(&ProgressEvent {
            document_id: self.document_id.clone(),
            stage,
            progress,
            message: message.into(),
        });
    }

    /// `page` of `total` finished OCR; spreads pages across the OCR band.
    pub fn ocr_page(&self, page: usize, total: usize) {
        let span = (OCR_END - OCR_START) as usize;
        let percent = OCR_START as usize + span * page.min(total) / total.max(1);
        self.report(Stage::Ocr, percent as u8, format!("OCR page {page}/{total}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting() -> (Arc<Mutex<Vec<ProgressEvent>>>, Arc<dyn ProgressSink>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink: Arc<dyn ProgressSink> = Arc::new(move |e: &ProgressEvent| {
            sink_events.lock().unwrap().push(e.clone());
        });
        (events, sink)
    }

    #[test]
    fn test_regression_is_clamped() {
        let (events, sink) = collecting();
        let reporter = ProgressReporter::new("doc", sink);
        reporter.stage(Stage::NativeText, "native");
        reporter.stage(Stage::Remote, "late remote");
        reporter.report(Stage::Completed, 250, "done");

        let progress: Vec<u8> = events.lock().unwrap().iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![30, 30, 100]);
    }

    #[test]
    fn test_ocr_pages_spread_across_band() {
        let (events, sink) = collecting();
        let reporter = ProgressReporter::new("doc", sink);
        reporter.stage(Stage::Ocr, "ocr");
        for page in 1..=3 {
            reporter.ocr_page(page, 3);
        }
        let progress: Vec<u8> = events.lock().unwrap().iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![40, 55, 70, 85]);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = ProgressReporter::new("abc", Arc::new(ChannelSink(tx)));
        reporter.stage(Stage::Started, "Started");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.document_id, "abc");
        assert_eq!(event.stage, Stage::Started);
        assert_eq!(event.progress, 0);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["documentId"], "abc");
        assert_eq!(json["stage"], "started");
    }
}
