//! Remote extraction through Google Document AI.

mod client;
mod mapping;

pub use client::{DocumentAiClient, HttpDocumentAiClient, ProcessResponse, WireDocument};

use crate::config::{Config, ExtractionSection, RemoteSection};
use crate::document::SourceDocument;
use crate::error::RemoteError;
use crate::heuristics::InvoiceData;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What the remote path produced for one document.
#[derive(Debug, Clone)]
pub struct RemoteExtraction {
    pub text: String,
    pub invoice_data: InvoiceData,
    /// Mean entity confidence, 0-100.
    pub confidence: f64,
}

#[derive(Debug, Default)]
struct HealthState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Consecutive-failure breaker. After `failure_threshold` failures in a row
/// the service is reported unhealthy for `cooldown`, then tried again.
#[derive(Debug)]
pub struct ServiceHealth {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<HealthState>,
}

impl ServiceHealth {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(HealthState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_healthy(&self) -> bool {
        let mut state = self.state();
        match state.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                // Cooldown over: allow one more try, a failure reopens at once.
                state.open_until = None;
                state.consecutive_failures = self.failure_threshold - 1;
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state();
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            warn!(
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Remote service marked unhealthy"
            );
            state.open_until = Some(Instant::now() + self.cooldown);
        }
    }
}

/// Sends a document to the remote processor and maps its answer onto the
/// pipeline's result contract.
pub struct RemoteExtractionAdapter {
    client: Arc<dyn DocumentAiClient>,
    extraction: ExtractionSection,
    health: ServiceHealth,
}

impl RemoteExtractionAdapter {
    pub fn new(client: Arc<dyn DocumentAiClient>, extraction: ExtractionSection, remote: &RemoteSection) -> Self {
        Self {
            client,
            extraction,
            health: ServiceHealth::new(remote.failure_threshold, Duration::from_secs(remote.cooldown_secs)),
        }
    }

    /// Build the HTTP-backed adapter. Fails with
    /// [`RemoteError::NotConfigured`] without any network traffic when
    /// identifiers or credentials are missing.
    pub async fn from_config(cfg: &Config) -> Result<Self, RemoteError> {
        let client = HttpDocumentAiClient::from_config(&cfg.remote).await?;
        Ok(Self::new(Arc::new(client), cfg.extraction.clone(), &cfg.remote))
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub async fn extract(&self, document: &SourceDocument) -> Result<RemoteExtraction, RemoteError> {
        let response = match self.client.process(document.bytes(), document.mime_type()).await {
            Ok(r) => r,
            Err(e) => {
                if !e.is_configuration() {
                    self.health.record_failure();
                }
                return Err(e);
            }
        };
        self.health.record_success();

        let (invoice_data, confidence) = mapping::to_invoice(&response.document, &self.extraction);
        info!(
            entities = response.document.entities.len(),
            items = invoice_data.items.len(),
            confidence,
            "Remote extraction result"
        );
        Ok(RemoteExtraction {
            text: response.document.text,
            invoice_data,
            confidence,
        })
    }
}
