use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error as _;
use std::io;
use std::time::Duration;

const SANDBOX_BASE_URL: &str = "https://connect.squareupsandbox.com";
const PRODUCTION_BASE_URL: &str = "https://connect.squareup.com";

/// Transport-level failure classes the retry classifier recognises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkErrorCode {
    ConnectionReset,
    TimedOut,
    DnsRetry,
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("provider network error ({code:?}): {message}")]
    Network {
        code: NetworkErrorCode,
        message: String,
    },
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("provider call failed: {0}")]
    Other(String),
}

impl ProviderError {
    /// 429 and 5xx retry, other statuses don't. Only the known transient
    /// network codes retry. Anything unclassified retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network { code, .. } => !matches!(code, NetworkErrorCode::Other(_)),
            Self::NotConfigured(_) => false,
            Self::Other(_) => true,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Http {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        match network_code(&e) {
            Some(code) => Self::Network {
                code,
                message: e.to_string(),
            },
            None => Self::Other(e.to_string()),
        }
    }
}

/// Transport failures map onto the transient codes the retry classifier
/// knows: timeouts, resets (including a peer closing mid-response) and
/// resolver failures. Other connect and request failures, such as a refused
/// connection, become `NetworkErrorCode::Other`. Body and decode errors are
/// not network errors.
fn network_code(e: &reqwest::Error) -> Option<NetworkErrorCode> {
    if e.is_timeout() {
        return Some(NetworkErrorCode::TimedOut);
    }
    if !(e.is_connect() || e.is_request()) {
        return None;
    }

    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            match io.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => return Some(NetworkErrorCode::ConnectionReset),
                io::ErrorKind::TimedOut => return Some(NetworkErrorCode::TimedOut),
                _ => {}
            }
        }
        let text = err.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return Some(NetworkErrorCode::DnsRetry);
        }
        if text.contains("connection closed before message completed") {
            return Some(NetworkErrorCode::ConnectionReset);
        }
        source = err.source();
    }

    let kind = if e.is_connect() { "connect" } else { "request" };
    Some(NetworkErrorCode::Other(kind.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCount {
    pub catalog_object_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Minimal evidence that the catalog is reachable and what it looks like now.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogProbe {
    pub object_ids: Vec<String>,
    pub latest_time: Option<String>,
}

/// The slice of the catalog/inventory provider the webhook pipeline uses.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn batch_retrieve_inventory_counts(
        &self,
        catalog_object_ids: &[String],
    ) -> Result<Vec<InventoryCount>, ProviderError>;

    async fn catalog_probe(&self) -> Result<CatalogProbe, ProviderError>;
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareConfig {
    pub access_token: Option<String>,
    pub environment: String,
    pub api_version: String,
}

pub struct SquareClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    api_version: String,
}

#[derive(Deserialize)]
struct BatchCountsResponse {
    #[serde(default)]
    counts: Vec<InventoryCount>,
}

#[derive(Deserialize)]
struct SearchCatalogResponse {
    #[serde(default)]
    objects: Vec<Value>,
    #[serde(default)]
    latest_time: Option<String>,
}

impl SquareClient {
    pub fn new(config: &SquareConfig) -> Result<Self, ProviderError> {
        let base_url = match config.environment.as_str() {
            "production" => PRODUCTION_BASE_URL,
            _ => SANDBOX_BASE_URL,
        };
        Self::with_base_url(config, base_url)
    }

    pub fn with_base_url(config: &SquareConfig, base_url: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            api_version: config.api_version.clone(),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T, ProviderError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("SQUARE_ACCESS_TOKEN is not set".into()))?;

        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("Square-Version", &self.api_version)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: text,
            });
        }

        resp.json().await.map_err(ProviderError::from)
    }
}

#[async_trait]
impl CatalogProvider for SquareClient {
    async fn batch_retrieve_inventory_counts(
        &self,
        catalog_object_ids: &[String],
    ) -> Result<Vec<InventoryCount>, ProviderError> {
        let resp: BatchCountsResponse = self
            .post(
                "/v2/inventory/counts/batch-retrieve",
                json!({ "catalog_object_ids": catalog_object_ids }),
            )
            .await?;
        Ok(resp.counts)
    }

    async fn catalog_probe(&self) -> Result<CatalogProbe, ProviderError> {
        let resp: SearchCatalogResponse = self
            .post(
                "/v2/catalog/search",
                json!({ "object_types": ["ITEM"], "limit": 1 }),
            )
            .await?;
        Ok(CatalogProbe {
            object_ids: resp
                .objects
                .iter()
                .filter_map(|o| o.get("id").and_then(Value::as_str).map(String::from))
                .collect(),
            latest_time: resp.latest_time,
        })
    }
}
