// src/remote/client.rs

use crate::config::RemoteSection;
use crate::error::RemoteError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use yup_oauth2::ServiceAccountAuthenticator;
use yup_oauth2::authenticator::DefaultAuthenticator;

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    raw_document: RawDocument<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument<'a> {
    content: String,
    mime_type: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub document: WireDocument,
}

/// The subset of a processed Document AI document this crate reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDocument {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub pages: Vec<WirePage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub mention_text: Option<String>,
    /// 0-1
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub text_anchor: Option<TextAnchor>,
    #[serde(default)]
    pub normalized_value: Option<NormalizedValue>,
    #[serde(default)]
    pub properties: Vec<Entity>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NormalizedValue {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnchor {
    #[serde(default)]
    pub text_segments: Vec<TextSegment>,
}

/// Offsets into `WireDocument::text`. The REST API encodes int64 as strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSegment {
    #[serde(default)]
    pub start_index: Option<Index>,
    #[serde(default)]
    pub end_index: Option<Index>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Index {
    Number(u64),
    Text(String),
}

impl Index {
    pub fn value(&self) -> Option<usize> {
        match self {
            Index::Number(n) => usize::try_from(*n).ok(),
            Index::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WirePage {
    #[serde(default)]
    pub tables: Vec<WireTable>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTable {
    #[serde(default)]
    pub header_rows: Vec<WireRow>,
    #[serde(default)]
    pub body_rows: Vec<WireRow>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireRow {
    #[serde(default)]
    pub cells: Vec<WireCell>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireCell {
    #[serde(default)]
    pub layout: Option<Layout>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default)]
    pub text_anchor: Option<TextAnchor>,
}

impl TextAnchor {
    /// The anchored slice of `text`, segments concatenated. Offsets are in
    /// Unicode code points; out-of-range segments are ignored.
    pub fn resolve(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::new();
        for seg in &self.text_segments {
            let start = seg.start_index.as_ref().and_then(Index::value).unwrap_or(0);
            let Some(end) = seg.end_index.as_ref().and_then(Index::value) else {
                continue;
            };
            if start < end && end <= chars.len() {
                out.extend(&chars[start..end]);
            }
        }
        out.trim().to_string()
    }
}

/// The remote document-processing service.
#[async_trait]
pub trait DocumentAiClient: Send + Sync {
    async fn process(&self, content: &[u8], mime_type: &str) -> Result<ProcessResponse, RemoteError>;
}

enum Credentials {
    Token(String),
    ServiceAccount(DefaultAuthenticator),
}

/// Google Document AI over REST.
pub struct HttpDocumentAiClient {
    http: Client,
    endpoint: String,
    credentials: Credentials,
}

impl HttpDocumentAiClient {
    /// Validates identifiers and credentials before anything touches the
    /// network. A bearer token wins over a service-account key file.
    pub async fn from_config(cfg: &RemoteSection) -> Result<Self, RemoteError> {
        if !cfg.enabled {
            return Err(RemoteError::NotConfigured("remote extraction disabled".to_string()));
        }
        if cfg.project_id.trim().is_empty() || cfg.processor_id.trim().is_empty() {
            return Err(RemoteError::NotConfigured(
                "project_id and processor_id are required".to_string(),
            ));
        }

        let token = cfg.access_token.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let credentials = match (token, &cfg.credentials_path) {
            (Some(token), _) => Credentials::Token(token.to_string()),
            (None, Some(path)) => {
                let key = yup_oauth2::read_service_account_key(path)
                    .await
                    .map_err(|e| RemoteError::NotConfigured(format!("{}: {e}", path.display())))?;
                let auth = ServiceAccountAuthenticator::builder(key)
                    .build()
                    .await
                    .map_err(|e| RemoteError::Auth(e.to_string()))?;
                Credentials::ServiceAccount(auth)
            }
            (None, None) => {
                return Err(RemoteError::NotConfigured("no access token or credentials file".to_string()));
            }
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        let endpoint = process_url(cfg);
        info!(url = %endpoint, "Using Document AI processor");
        Ok(Self {
            http,
            endpoint,
            credentials,
        })
    }

    async fn bearer(&self) -> Result<String, RemoteError> {
        match &self.credentials {
            Credentials::Token(token) => Ok(token.clone()),
            Credentials::ServiceAccount(auth) => {
                let token = auth
                    .token(SCOPES)
                    .await
                    .map_err(|e| RemoteError::Auth(e.to_string()))?;
                token
                    .token()
                    .map(str::to_string)
                    .ok_or_else(|| RemoteError::Auth("token response had no access token".to_string()))
            }
        }
    }
}

pub(crate) fn process_url(cfg: &RemoteSection) -> String {
    let location = urlencoding::encode(cfg.location.trim());
    format!(
        "https://{location}-documentai.googleapis.com/v1/projects/{}/locations/{location}/processors/{}:process",
        urlencoding::encode(cfg.project_id.trim()),
        urlencoding::encode(cfg.processor_id.trim()),
    )
}

#[async_trait]
impl DocumentAiClient for HttpDocumentAiClient {
    async fn process(&self, content: &[u8], mime_type: &str) -> Result<ProcessResponse, RemoteError> {
        let request = ProcessRequest {
            raw_document: RawDocument {
                content: STANDARD.encode(content),
                mime_type,
            },
        };
        let bearer = self.bearer().await?;

        debug!(bytes = content.len(), mime_type, "Sending document to Document AI");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status, body });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_url() {
        let cfg = RemoteSection {
            project_id: "my-proj".to_string(),
            processor_id: "abc123".to_string(),
            location: "eu".to_string(),
            ..Default::default()
        };
        assert_eq!(
            process_url(&cfg),
            "https://eu-documentai.googleapis.com/v1/projects/my-proj/locations/eu/processors/abc123:process"
        );
    }

    #[tokio::test]
    async fn test_missing_identifiers_rejected_before_network() {
        let cfg = RemoteSection {
            access_token: Some("tok".to_string()),
            ..Default::default()
        };
        let err = HttpDocumentAiClient::from_config(&cfg).await.err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let cfg = RemoteSection {
            project_id: "p".to_string(),
            processor_id: "q".to_string(),
            access_token: Some("   ".to_string()),
            ..Default::default()
        };
        let err = HttpDocumentAiClient::from_config(&cfg).await.err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_response_with_string_offsets() {
        let json = r#"{
            "document": {
                "text": "Invoice 42\nAcme",
                "entities": [{
                    "type": "invoice_id",
                    "confidence": 0.9,
                    "textAnchor": {"textSegments": [{"startIndex": "8", "endIndex": "10"}]}
                }]
            }
        }"#;
        let resp: ProcessResponse = serde_json::from_str(json).unwrap();
        let entity = &resp.document.entities[0];
        assert_eq!(entity.kind, "invoice_id");
        let anchor = entity.text_anchor.as_ref().unwrap();
        assert_eq!(anchor.resolve(&resp.document.text), "42");
    }

    #[test]
    fn test_missing_start_index_means_zero() {
        let anchor = TextAnchor {
            text_segments: vec![TextSegment {
                start_index: None,
                end_index: Some(Index::Number(7)),
            }],
        };
        assert_eq!(anchor.resolve("Invoice 42"), "Invoice");
    }
}
