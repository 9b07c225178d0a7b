use crate::error::ConfigError;
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub ocr: OcrSection,
    #[serde(default)]
    pub remote: RemoteSection,
}

/// How to read an ambiguous `NN/NN/YYYY` date where both parts are <= 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    DayFirst,
    MonthFirst,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default = "default_date_order")]
    pub date_order: DateOrder,
    #[serde(default = "default_native_text_min_chars")]
    pub native_text_min_chars: usize,
    #[serde(default = "default_max_line_items")]
    pub max_line_items: usize,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_date_order() -> DateOrder {
    DateOrder::DayFirst
}

fn default_native_text_min_chars() -> usize {
    50
}

fn default_max_line_items() -> usize {
    20
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            date_order: default_date_order(),
            native_text_min_chars: default_native_text_min_chars(),
            max_line_items: default_max_line_items(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrSection {
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Tesseract `--psm` values, swept in this order.
    #[serde(default = "default_page_seg_modes")]
    pub page_seg_modes: Vec<u8>,
    #[serde(default = "default_early_stop_confidence")]
    pub early_stop_confidence: f64,
    #[serde(default = "default_early_stop_min_chars")]
    pub early_stop_min_chars: usize,
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_tesseract_path() -> String {
    "tesseract".to_string()
}

fn default_pdftoppm_path() -> String {
    "pdftoppm".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_dpi() -> u32 {
    300
}

fn default_page_seg_modes() -> Vec<u8> {
    vec![6, 3, 4, 11]
}

fn default_early_stop_confidence() -> f64 {
    85.0
}

fn default_early_stop_min_chars() -> usize {
    100
}

fn default_min_text_chars() -> usize {
    10
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            tesseract_path: default_tesseract_path(),
            pdftoppm_path: default_pdftoppm_path(),
            language: default_language(),
            dpi: default_dpi(),
            page_seg_modes: default_page_seg_modes(),
            early_stop_confidence: default_early_stop_confidence(),
            early_stop_min_chars: default_early_stop_min_chars(),
            min_text_chars: default_min_text_chars(),
            temp_dir: None,
        }
    }
}

impl OcrSection {
    /// Rendering DPI bounded to keep small glyphs legible without blowing up memory.
    pub fn effective_dpi(&self) -> u32 {
        self.dpi.clamp(150, 400)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub processor_id: String,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    /// Bearer token; normally only supplied through the environment.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_location() -> String {
    "us".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            enabled: true,
            project_id: String::new(),
            location: default_location(),
            processor_id: String::new(),
            credentials_path: None,
            access_token: None,
            timeout_secs: default_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl RemoteSection {
    /// Identifiers and some form of credential are present. No network involved.
    pub fn is_configured(&self) -> bool {
        self.enabled
            && !self.project_id.trim().is_empty()
            && !self.processor_id.trim().is_empty()
            && (self.access_token.as_deref().is_some_and(|t| !t.trim().is_empty())
                || self.credentials_path.is_some())
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from `path` if it exists, otherwise start from defaults. Secrets
    /// and identifiers from the environment win over the file.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            info!(path = %path.display(), "Loading config");
            Self::load(path)?
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DOCUMENT_AI_PROJECT_ID") {
            self.remote.project_id = v;
        }
        if let Some(v) = lookup("DOCUMENT_AI_PROCESSOR_ID") {
            self.remote.processor_id = v;
        }
        if let Some(v) = lookup("DOCUMENT_AI_LOCATION") {
            self.remote.location = v;
        }
        if let Some(v) = lookup("DOCUMENT_AI_ACCESS_TOKEN") {
            self.remote.access_token = Some(v);
        }
        if self.remote.credentials_path.is_none() {
            if let Some(v) = lookup("GOOGLE_APPLICATION_CREDENTIALS") {
                self.remote.credentials_path = Some(PathBuf::from(v));
            }
        }
    }
}
