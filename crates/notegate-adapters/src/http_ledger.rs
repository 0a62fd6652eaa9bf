use async_trait::async_trait;
use notegate_core::error::GateError;
use notegate_core::ledger::{ChainTip, LedgerBlock, LedgerClient, LedgerTransaction};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Ledger explorer client over plain JSON GET endpoints.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeightBody {
    Bare(u64),
    Wrapped { height: u64 },
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GateError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2).min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Config(format!("failed to build ledger client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, GateError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "ledger request");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| GateError::Ledger(format!("GET {path}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(GateError::Ledger(format!("GET {path} returned {status}")));
        }
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| GateError::Ledger(format!("GET {path}: invalid body: {e}")))
    }

    async fn require<T: DeserializeOwned>(&self, path: &str) -> Result<T, GateError> {
        self.get_json(path)
            .await?
            .ok_or_else(|| GateError::Ledger(format!("GET {path} returned 404")))
    }
}

/// Identifiers interpolated into a URL path.
fn path_segment(value: &str) -> Result<&str, GateError> {
    let valid = !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if valid {
        Ok(value)
    } else {
        Err(GateError::validation(format!(
            "identifier '{}' is not a valid ledger id",
            value
        )))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn client_id(&self) -> &'static str {
        "http"
    }

    async fn tip(&self) -> Result<ChainTip, GateError> {
        self.require("/tip").await
    }

    async fn height(&self) -> Result<u64, GateError> {
        let body: HeightBody = self.require("/height").await?;
        Ok(match body {
            HeightBody::Bare(height) | HeightBody::Wrapped { height } => height,
        })
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<LedgerBlock>, GateError> {
        self.get_json(&format!("/blocks/{height}")).await
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<LedgerBlock>, GateError> {
        let hash = path_segment(hash)?;
        self.get_json(&format!("/blocks/hash/{hash}")).await
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>, GateError> {
        let tx_id = path_segment(tx_id)?;
        self.get_json(&format!("/transactions/{tx_id}")).await
    }

    async fn latest_transactions(&self, limit: usize) -> Result<Vec<LedgerTransaction>, GateError> {
        Ok(self
            .get_json(&format!("/transactions/latest?limit={limit}"))
            .await?
            .unwrap_or_default())
    }
}
