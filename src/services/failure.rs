//! Default failed-transfer handler.
//!
//! Persists the failure through the terminal-guarded transfer update and
//! queues the regulator notification for the failed outcome. Deployments
//! that also reverse or refund balances substitute their own handler behind
//! the same trait.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::domain::{Transfer, TransferStatus};
use crate::error::Result;
use crate::services::transfer_monitor::{FailureHandler, TransferStore};
use crate::services::webhook_dispatcher::NotificationQueue;

pub struct RecordingFailureHandler {
    transfers: Arc<dyn TransferStore>,
    queue: Arc<dyn NotificationQueue>,
}

impl RecordingFailureHandler {
    pub fn new(transfers: Arc<dyn TransferStore>, queue: Arc<dyn NotificationQueue>) -> Self {
        Self { transfers, queue }
    }
}

#[async_trait]
impl FailureHandler for RecordingFailureHandler {
    async fn handle_failed_transfer(&self, transfer: &Transfer, reason: &str) -> Result<()> {
        let mut failed = transfer.clone();
        failed.status = TransferStatus::Failed;
        failed.failed_at = Some(Utc::now());
        failed.error_message = Some(reason.to_string());

        self.transfers.update_transfer(&failed).await?;

        info!("marked transfer {} failed: {}", failed.id, reason);

        self.queue.queue_notification(&failed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transfer_monitor::MockTransferStore;
    use crate::services::webhook_dispatcher::MockNotificationQueue;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn pending_transfer() -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            external_id: None,
            status: TransferStatus::Pending,
            amount: dec!(50),
            currency: "USD".to_string(),
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    #[tokio::test]
    async fn test_failure_is_persisted_then_queued() {
        let transfer = pending_transfer();
        let transfer_id = transfer.id;

        let mut transfers = MockTransferStore::new();
        transfers
            .expect_update_transfer()
            .withf(move |t| {
                t.id == transfer_id
                    && t.status == TransferStatus::Failed
                    && t.failed_at.is_some()
                    && t.error_message.as_deref() == Some("provider rejected the transfer")
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut queue = MockNotificationQueue::new();
        queue
            .expect_queue_notification()
            .withf(move |t| t.id == transfer_id && t.status == TransferStatus::Failed)
            .times(1)
            .returning(|_| Ok(()));

        let handler = RecordingFailureHandler::new(Arc::new(transfers), Arc::new(queue));
        handler
            .handle_failed_transfer(&transfer, "provider rejected the transfer")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_persistence_error_short_circuits_enqueue() {
        let mut transfers = MockTransferStore::new();
        transfers
            .expect_update_transfer()
            .returning(|_| Err(crate::error::SettlerError::Internal("write failed".into())));

        let mut queue = MockNotificationQueue::new();
        queue.expect_queue_notification().times(0);

        let handler = RecordingFailureHandler::new(Arc::new(transfers), Arc::new(queue));
        let result = handler
            .handle_failed_transfer(&pending_transfer(), "whatever")
            .await;
        assert!(result.is_err());
    }
}
