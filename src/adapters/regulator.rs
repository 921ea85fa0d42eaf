//! Regulator webhook client.
//!
//! Delivers terminal transfer outcomes to the regulator's endpoint. When no
//! endpoint is configured the client reports immediate success so the
//! delivery queue drains instead of accumulating a backlog.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::RegulatorConfig;
use crate::domain::Transfer;
use crate::error::{Result, SettlerError};

/// Payload sent to the regulator's webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorPayload {
    pub transfer_id: Uuid,
    /// "completed" or "failed"
    pub status: String,
    /// Decimal amount, string-formatted
    pub amount: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Reason for failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RegulatorPayload {
    /// Snapshot of a transfer's terminal outcome.
    pub fn for_transfer(transfer: &Transfer) -> Self {
        Self {
            transfer_id: transfer.id,
            status: transfer.status.to_string(),
            amount: transfer.amount.to_string(),
            currency: transfer.currency.clone(),
            completed_at: transfer.completed_at,
            failed_at: transfer.failed_at,
            reason: transfer.error_message.clone(),
        }
    }
}

/// Outcome of one delivery attempt that produced a response.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub status_code: u16,
    pub body: String,
}

impl DeliveryReceipt {
    /// Regulators return 200 OK or 202 Accepted; any 2xx counts as success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Delivery interface consumed by the dispatcher.
///
/// `Ok` carries the response receipt whether or not the endpoint accepted
/// the notification; `Err` means the request never produced a response
/// (connect failure, timeout).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, payload: &RegulatorPayload) -> Result<DeliveryReceipt>;
}

#[derive(Clone)]
pub struct RegulatorClient {
    http: Client,
    webhook_url: String,
    api_key: Option<String>,
}

impl RegulatorClient {
    pub fn new(config: &RegulatorConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("settler-regulator-client/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                SettlerError::Internal(format!("failed to build regulator HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            webhook_url: config.webhook_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = self.api_key.as_deref() {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("X-Api-Key", value);
            }
        }
        headers
    }
}

#[async_trait]
impl NotificationSink for RegulatorClient {
    async fn deliver(&self, payload: &RegulatorPayload) -> Result<DeliveryReceipt> {
        if !self.is_configured() {
            debug!(
                "no regulator webhook URL configured, treating notification for transfer {} as sent",
                payload.transfer_id
            );
            return Ok(DeliveryReceipt {
                status_code: 200,
                body: "no-op: webhook URL not configured".to_string(),
            });
        }

        let response = self
            .http
            .post(&self.webhook_url)
            .headers(self.headers())
            .json(payload)
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let body = response.text().await?;

        Ok(DeliveryReceipt { status_code, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransferStatus;
    use rust_decimal_macros::dec;

    fn completed_transfer() -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            external_id: Some("ldg_txn_1".to_string()),
            status: TransferStatus::Completed,
            amount: dec!(250.75),
            currency: "USD".to_string(),
            error_message: None,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            failed_at: None,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_sink_reports_immediate_success() {
        let client = RegulatorClient::new(&RegulatorConfig::default()).unwrap();
        assert!(!client.is_configured());

        let receipt = client
            .deliver(&RegulatorPayload::for_transfer(&completed_transfer()))
            .await
            .unwrap();

        assert!(receipt.is_success());
        assert_eq!(receipt.status_code, 200);
        assert!(receipt.body.contains("not configured"));
    }

    #[test]
    fn test_receipt_success_window() {
        let receipt = |status_code| DeliveryReceipt {
            status_code,
            body: String::new(),
        };
        assert!(receipt(200).is_success());
        assert!(receipt(202).is_success());
        assert!(receipt(299).is_success());
        assert!(!receipt(199).is_success());
        assert!(!receipt(301).is_success());
        assert!(!receipt(500).is_success());
    }

    #[test]
    fn test_payload_omits_absent_fields() {
        let payload = RegulatorPayload::for_transfer(&completed_transfer());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["status"], "completed");
        assert_eq!(json["amount"], "250.75");
        assert_eq!(json["currency"], "USD");
        assert!(json.get("completed_at").is_some());
        // failed_at and reason are absent for a completed transfer
        assert!(json.get("failed_at").is_none());
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_payload_for_failed_transfer() {
        let mut transfer = completed_transfer();
        transfer.status = TransferStatus::Failed;
        transfer.completed_at = None;
        transfer.failed_at = Some(Utc::now());
        transfer.error_message = Some("transfer failed at external provider".to_string());

        let payload = RegulatorPayload::for_transfer(&transfer);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["status"], "failed");
        assert!(json.get("completed_at").is_none());
        assert!(json.get("failed_at").is_some());
        assert_eq!(json["reason"], "transfer failed at external provider");
    }
}
