use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Transfer created locally, not yet accepted by the ledger provider
    Pending,
    /// Transfer accepted and in flight at the ledger provider
    Processing,
    /// Transfer settled successfully
    Completed,
    /// Transfer failed
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TransferStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(TransferStatus::Pending),
            "processing" => Ok(TransferStatus::Processing),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

/// A money transfer settled through the external ledger provider.
///
/// The reconciliation monitor only ever advances `status`, `completed_at`,
/// `failed_at` and `error_message`; everything else is owned by the
/// surrounding system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    /// Reference assigned by the ledger provider once it accepts the
    /// transfer. Absent only while the transfer is still initializing.
    pub external_id: Option<String>,
    pub status: TransferStatus,
    pub amount: Decimal,
    pub currency: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Age of the transfer relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Whether the ledger provider has ever acknowledged this transfer.
    pub fn has_external_id(&self) -> bool {
        self.external_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer(status: TransferStatus) -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            external_id: None,
            status,
            amount: dec!(100.50),
            currency: "USD".to_string(),
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::Processing,
            TransferStatus::Completed,
            TransferStatus::Failed,
        ] {
            assert_eq!(TransferStatus::try_from(status.as_str()), Ok(status));
        }
        assert!(TransferStatus::try_from("settled").is_err());
    }

    #[test]
    fn test_has_external_id_treats_empty_as_missing() {
        let mut t = transfer(TransferStatus::Pending);
        assert!(!t.has_external_id());

        t.external_id = Some(String::new());
        assert!(!t.has_external_id());

        t.external_id = Some("ldg_txn_123".to_string());
        assert!(t.has_external_id());
    }
}
