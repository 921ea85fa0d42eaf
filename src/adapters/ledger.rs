//! Ledger provider REST client.
//!
//! Read-only client used by the reconciliation monitor to poll the remote
//! status of in-flight transfers. Transfer creation against the provider is
//! owned by the initiating side of the system, not by this daemon.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::LedgerConfig;
use crate::error::{Result, SettlerError};

/// A transfer as reported by the ledger provider.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTransfer {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Remote status query interface consumed by the reconciliation monitor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Fetch the provider's view of a transfer by its external reference.
    async fn get_transfer(&self, external_id: &str) -> Result<RemoteTransfer>;

    /// Check that the provider API is reachable.
    async fn health_check(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct LedgerClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl LedgerClient {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let http = Client::builder()
            .user_agent("settler-ledger-client/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                SettlerError::Internal(format!("failed to build ledger HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.api_key) {
                headers.insert("X-Api-Key", value);
            }
        }
        headers
    }
}

#[async_trait]
impl LedgerApi for LedgerClient {
    async fn get_transfer(&self, external_id: &str) -> Result<RemoteTransfer> {
        let url = format!("{}/transfers/{}", self.base_url, external_id);
        debug!("fetching remote transfer status from {}", url);

        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(SettlerError::Ledger(format!(
                "transfer lookup for {} returned status {}",
                external_id,
                response.status()
            )));
        }

        let remote: RemoteTransfer = response.json().await?;
        Ok(remote)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(SettlerError::Ledger(format!(
                "health check returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}
