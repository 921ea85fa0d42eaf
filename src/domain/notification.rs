use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery attempts allowed before an entry becomes a dead letter.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 5;

/// Webhook notification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Queued, not yet attempted
    Pending,
    /// Delivered successfully, never reconsidered
    Sent,
    /// Last attempt failed; retried until attempts reach the maximum
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for NotificationStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            other => Err(format!("unknown notification status: {other}")),
        }
    }
}

/// One obligation to inform the regulator about one transfer's terminal
/// outcome. Rows are never deleted; entries that exhaust their attempts
/// remain as an auditable dead-letter record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub url: String,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Always set; defaults to creation time so new entries are
    /// immediately eligible for delivery.
    pub next_attempt_at: DateTime<Utc>,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookNotification {
    /// New pending entry for a transfer, due immediately.
    pub fn for_transfer(transfer_id: Uuid, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transfer_id,
            url: url.into(),
            status: NotificationStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            next_attempt_at: now,
            response_status_code: None,
            response_body: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= MAX_DELIVERY_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_is_immediately_due() {
        let before = Utc::now();
        let n = WebhookNotification::for_transfer(Uuid::new_v4(), "https://example.com/hook");
        let after = Utc::now();

        assert_eq!(n.status, NotificationStatus::Pending);
        assert_eq!(n.attempts, 0);
        assert!(n.last_attempt_at.is_none());
        assert!(n.next_attempt_at >= before && n.next_attempt_at <= after);
    }

    #[test]
    fn test_exhaustion_boundary() {
        let mut n = WebhookNotification::for_transfer(Uuid::new_v4(), "");
        n.attempts = MAX_DELIVERY_ATTEMPTS - 1;
        assert!(!n.is_exhausted());
        n.attempts = MAX_DELIVERY_ATTEMPTS;
        assert!(n.is_exhausted());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::Failed,
        ] {
            assert_eq!(NotificationStatus::try_from(status.as_str()), Ok(status));
        }
        assert!(NotificationStatus::try_from("delivered").is_err());
    }
}
