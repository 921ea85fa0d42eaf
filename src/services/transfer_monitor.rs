//! Transfer reconciliation monitor.
//!
//! One pass loads transfers still awaiting external settlement, detects
//! initiations stuck without a ledger reference, polls the ledger provider
//! for the rest and advances local state. Terminal completions are handed
//! off to the webhook dispatcher; terminal failures are delegated to the
//! failure handler, which owns that transition.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::adapters::ledger::LedgerApi;
use crate::config::MonitorConfig;
use crate::domain::{Transfer, TransferStatus};
use crate::error::Result;
use crate::services::webhook_dispatcher::NotificationQueue;

/// Reason recorded when a transfer never received an external reference.
pub const STUCK_INITIATION_REASON: &str =
    "transfer initiation failed; no external reference received";

/// Reason recorded when the ledger provider reports the transfer failed.
pub const EXTERNAL_FAILURE_REASON: &str = "transfer failed at external provider";

/// Transfer persistence interface consumed by the monitor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Transfers that are not yet terminal, oldest first, capped at `limit`.
    async fn load_reconciliation_candidates(&self, limit: i64) -> Result<Vec<Transfer>>;

    /// Persist a transfer update. Implementations must refuse to regress a
    /// row that already reached a terminal status.
    async fn update_transfer(&self, transfer: &Transfer) -> Result<()>;
}

/// Owner of the failed-transfer transition (persists the failure and any
/// downstream bookkeeping such as reversals).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn handle_failed_transfer(&self, transfer: &Transfer, reason: &str) -> Result<()>;
}

/// Reconciliation statistics
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub transfers_checked: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub transfers_stuck: u64,
    pub reconciliation_errors: u64,
    pub last_pass: Option<chrono::DateTime<chrono::Utc>>,
}

enum RowOutcome {
    /// Still initializing or nothing changed
    Unchanged,
    Completed,
    FailedExternal,
    StuckInitiation,
    /// Ledger query or persistence failed; retried next pass
    Error,
}

/// Transfer reconciliation service
pub struct TransferMonitor {
    transfers: Arc<dyn TransferStore>,
    ledger: Arc<dyn LedgerApi>,
    failure_handler: Arc<dyn FailureHandler>,
    queue: Arc<dyn NotificationQueue>,
    config: MonitorConfig,
    stats: Arc<RwLock<MonitorStats>>,
    running: Arc<AtomicBool>,
}

impl TransferMonitor {
    pub fn new(
        transfers: Arc<dyn TransferStore>,
        ledger: Arc<dyn LedgerApi>,
        failure_handler: Arc<dyn FailureHandler>,
        queue: Arc<dyn NotificationQueue>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            transfers,
            ledger,
            failure_handler,
            queue,
            config,
            stats: Arc::new(RwLock::new(MonitorStats::default())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> MonitorStats {
        self.stats.read().await.clone()
    }

    /// Run a single reconciliation pass.
    pub async fn run_pass(&self) {
        debug!("starting check for pending external transfers");

        let candidates = match self
            .transfers
            .load_reconciliation_candidates(self.config.batch_size)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("failed to fetch pending external transfers: {}", e);
                return;
            }
        };

        if candidates.is_empty() {
            debug!("no pending external transfers to monitor");
            return;
        }

        info!("found {} pending external transfers", candidates.len());

        let mut checked = 0u64;
        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut stuck = 0u64;
        let mut errors = 0u64;

        for transfer in candidates {
            checked += 1;
            match self.reconcile_transfer(transfer).await {
                RowOutcome::Unchanged => {}
                RowOutcome::Completed => completed += 1,
                RowOutcome::FailedExternal => failed += 1,
                RowOutcome::StuckInitiation => stuck += 1,
                RowOutcome::Error => errors += 1,
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.transfers_checked += checked;
            stats.transfers_completed += completed;
            stats.transfers_failed += failed;
            stats.transfers_stuck += stuck;
            stats.reconciliation_errors += errors;
            stats.last_pass = Some(Utc::now());
        }

        debug!(
            "reconciliation pass complete: checked={}, completed={}, failed={}, stuck={}, errors={}",
            checked, completed, failed, stuck, errors
        );
    }

    async fn reconcile_transfer(&self, mut transfer: Transfer) -> RowOutcome {
        let now = Utc::now();

        let Some(external_id) = transfer
            .external_id
            .clone()
            .filter(|id| !id.is_empty())
        else {
            // Still waiting on the ledger provider to acknowledge the
            // initiation. Past the grace period that never happens.
            if transfer.age(now) <= Duration::seconds(self.config.stuck_after_secs as i64) {
                debug!("transfer {} still awaiting external reference", transfer.id);
                return RowOutcome::Unchanged;
            }

            warn!(
                "failing transfer {} that is missing an external reference",
                transfer.id
            );
            if let Err(e) = self
                .failure_handler
                .handle_failed_transfer(&transfer, STUCK_INITIATION_REASON)
                .await
            {
                error!(
                    "failed to handle stuck transfer {}: {}",
                    transfer.id, e
                );
                return RowOutcome::Error;
            }
            return RowOutcome::StuckInitiation;
        };

        debug!(
            "checking status for transfer {} (external: {})",
            transfer.id, external_id
        );

        let remote = match self.ledger.get_transfer(&external_id).await {
            Ok(remote) => remote,
            Err(e) => {
                // Retried on the next scheduled pass; no backoff state is
                // kept for ledger polling.
                error!(
                    "failed to get status for transfer {} (external: {}) from ledger provider: {}",
                    transfer.id, external_id, e
                );
                return RowOutcome::Error;
            }
        };

        if remote.status == transfer.status.as_str() {
            return RowOutcome::Unchanged;
        }

        info!(
            "status change detected for transfer {}: {} -> {}",
            transfer.id, transfer.status, remote.status
        );

        match remote.status.as_str() {
            "completed" => {
                transfer.status = TransferStatus::Completed;
                transfer.completed_at = Some(Utc::now());
                if let Err(e) = self.transfers.update_transfer(&transfer).await {
                    // Left for retry on the next pass; the status comparison
                    // above guards re-entry.
                    error!(
                        "failed to update transfer {} to completed: {}",
                        transfer.id, e
                    );
                    return RowOutcome::Error;
                }
                if let Err(e) = self.queue.queue_notification(&transfer).await {
                    error!(
                        "failed to queue regulator notification for transfer {}: {}",
                        transfer.id, e
                    );
                }
                RowOutcome::Completed
            }
            "failed" => {
                if let Err(e) = self
                    .failure_handler
                    .handle_failed_transfer(&transfer, EXTERNAL_FAILURE_REASON)
                    .await
                {
                    error!(
                        "failed to handle externally failed transfer {}: {}",
                        transfer.id, e
                    );
                    return RowOutcome::Error;
                }
                RowOutcome::FailedExternal
            }
            "processing" => {
                transfer.status = TransferStatus::Processing;
                if let Err(e) = self.transfers.update_transfer(&transfer).await {
                    error!(
                        "failed to update transfer {} to processing: {}",
                        transfer.id, e
                    );
                    return RowOutcome::Error;
                }
                RowOutcome::Unchanged
            }
            other => {
                // Fail safe: an unrecognized upstream status never touches
                // the local state machine.
                warn!(
                    "unknown transfer status {:?} from ledger provider for transfer {}",
                    other, transfer.id
                );
                RowOutcome::Unchanged
            }
        }
    }

    /// Start the reconciliation loop
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("transfer monitor already running");
            return;
        }

        info!(
            "starting transfer monitor (interval: {}s, batch: {}, stuck threshold: {}s)",
            self.config.interval_secs, self.config.batch_size, self.config.stuck_after_secs
        );

        let monitor = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                monitor.config.interval_secs,
            ));

            while monitor.running.load(Ordering::SeqCst) {
                interval.tick().await;
                monitor.run_pass().await;
            }

            info!("transfer monitor stopped");
        });
    }

    /// Stop the reconciliation loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("transfer monitor stop requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ledger::{MockLedgerApi, RemoteTransfer};
    use crate::services::webhook_dispatcher::MockNotificationQueue;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transfer(external_id: Option<&str>, status: TransferStatus) -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            external_id: external_id.map(String::from),
            status,
            amount: dec!(100),
            currency: "USD".to_string(),
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    struct Mocks {
        transfers: MockTransferStore,
        ledger: MockLedgerApi,
        failure_handler: MockFailureHandler,
        queue: MockNotificationQueue,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                transfers: MockTransferStore::new(),
                ledger: MockLedgerApi::new(),
                failure_handler: MockFailureHandler::new(),
                queue: MockNotificationQueue::new(),
            }
        }

        fn with_candidates(mut self, candidates: Vec<Transfer>) -> Self {
            self.transfers
                .expect_load_reconciliation_candidates()
                .returning(move |_| Ok(candidates.clone()));
            self
        }

        fn into_monitor(self) -> TransferMonitor {
            TransferMonitor::new(
                Arc::new(self.transfers),
                Arc::new(self.ledger),
                Arc::new(self.failure_handler),
                Arc::new(self.queue),
                MonitorConfig::default(),
            )
        }
    }

    fn remote(id: &str, status: &str) -> RemoteTransfer {
        RemoteTransfer {
            id: id.to_string(),
            status: status.to_string(),
            amount: None,
        }
    }

    #[tokio::test]
    async fn test_completed_transfer_is_persisted_and_queued() {
        let t = transfer(Some("ldg_txn_completed"), TransferStatus::Processing);
        let transfer_id = t.id;

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks
            .ledger
            .expect_get_transfer()
            .with(eq("ldg_txn_completed"))
            .times(1)
            .returning(|id| Ok(remote(id, "completed")));
        mocks
            .transfers
            .expect_update_transfer()
            .withf(move |t| {
                t.id == transfer_id
                    && t.status == TransferStatus::Completed
                    && t.completed_at.is_some()
            })
            .times(1)
            .returning(|_| Ok(()));
        mocks
            .queue
            .expect_queue_notification()
            .withf(move |t| t.id == transfer_id && t.status == TransferStatus::Completed)
            .times(1)
            .returning(|_| Ok(()));

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.transfers_checked, 1);
        assert_eq!(stats.transfers_completed, 1);
    }

    #[tokio::test]
    async fn test_externally_failed_transfer_goes_to_failure_handler() {
        let t = transfer(Some("ldg_txn_failed"), TransferStatus::Processing);

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks
            .ledger
            .expect_get_transfer()
            .returning(|id| Ok(remote(id, "failed")));
        mocks
            .failure_handler
            .expect_handle_failed_transfer()
            .withf(|_, reason| reason == EXTERNAL_FAILURE_REASON)
            .times(1)
            .returning(|_, _| Ok(()));
        // The monitor itself never persists the failed transition
        mocks.transfers.expect_update_transfer().times(0);
        mocks.queue.expect_queue_notification().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.transfers_failed, 1);
    }

    #[tokio::test]
    async fn test_processing_status_is_bookkeeping_only() {
        let t = transfer(Some("ldg_txn_processing"), TransferStatus::Pending);

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks
            .ledger
            .expect_get_transfer()
            .returning(|id| Ok(remote(id, "processing")));
        mocks
            .transfers
            .expect_update_transfer()
            .withf(|t| t.status == TransferStatus::Processing && t.completed_at.is_none())
            .times(1)
            .returning(|_| Ok(()));
        mocks.queue.expect_queue_notification().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;
    }

    #[tokio::test]
    async fn test_matching_remote_status_is_a_noop() {
        let t = transfer(Some("ldg_txn_same"), TransferStatus::Processing);

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks
            .ledger
            .expect_get_transfer()
            .returning(|id| Ok(remote(id, "processing")));
        mocks.transfers.expect_update_transfer().times(0);
        mocks.queue.expect_queue_notification().times(0);
        mocks.failure_handler.expect_handle_failed_transfer().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;
    }

    #[tokio::test]
    async fn test_unknown_remote_status_leaves_state_untouched() {
        let t = transfer(Some("ldg_txn_weird"), TransferStatus::Processing);

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks
            .ledger
            .expect_get_transfer()
            .returning(|id| Ok(remote(id, "on_hold")));
        mocks.transfers.expect_update_transfer().times(0);
        mocks.queue.expect_queue_notification().times(0);
        mocks.failure_handler.expect_handle_failed_transfer().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;
    }

    #[tokio::test]
    async fn test_stuck_initiation_is_routed_to_failure_handler() {
        let mut t = transfer(None, TransferStatus::Pending);
        t.created_at = Utc::now() - Duration::minutes(6);

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks
            .failure_handler
            .expect_handle_failed_transfer()
            .withf(|_, reason| reason == STUCK_INITIATION_REASON)
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.ledger.expect_get_transfer().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.transfers_stuck, 1);
    }

    #[tokio::test]
    async fn test_young_transfer_without_reference_is_skipped() {
        let t = transfer(None, TransferStatus::Pending);

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks.failure_handler.expect_handle_failed_transfer().times(0);
        mocks.ledger.expect_get_transfer().times(0);
        mocks.transfers.expect_update_transfer().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.transfers_checked, 1);
        assert_eq!(stats.transfers_stuck, 0);
    }

    #[tokio::test]
    async fn test_empty_external_reference_counts_as_missing() {
        let mut t = transfer(Some(""), TransferStatus::Pending);
        t.created_at = Utc::now() - Duration::minutes(10);

        let mut mocks = Mocks::new().with_candidates(vec![t]);
        mocks
            .failure_handler
            .expect_handle_failed_transfer()
            .withf(|_, reason| reason == STUCK_INITIATION_REASON)
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.ledger.expect_get_transfer().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;
    }

    #[tokio::test]
    async fn test_ledger_error_isolates_row_and_continues() {
        let bad = transfer(Some("ldg_txn_err"), TransferStatus::Processing);
        let good = transfer(Some("ldg_txn_ok"), TransferStatus::Processing);
        let good_id = good.id;

        let mut mocks = Mocks::new().with_candidates(vec![bad, good]);
        mocks.ledger.expect_get_transfer().times(2).returning(|id| {
            if id == "ldg_txn_err" {
                Err(crate::error::SettlerError::Ledger("gateway timeout".into()))
            } else {
                Ok(remote(id, "completed"))
            }
        });
        mocks
            .transfers
            .expect_update_transfer()
            .withf(move |t| t.id == good_id)
            .times(1)
            .returning(|_| Ok(()));
        mocks
            .queue
            .expect_queue_notification()
            .times(1)
            .returning(|_| Ok(()));

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.transfers_checked, 2);
        assert_eq!(stats.transfers_completed, 1);
        assert_eq!(stats.reconciliation_errors, 1);
    }

    #[tokio::test]
    async fn test_candidate_load_failure_aborts_pass_quietly() {
        let mut mocks = Mocks::new();
        mocks
            .transfers
            .expect_load_reconciliation_candidates()
            .returning(|_| Err(crate::error::SettlerError::Internal("database is down".into())));
        mocks.ledger.expect_get_transfer().times(0);

        let monitor = mocks.into_monitor();
        monitor.run_pass().await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.transfers_checked, 0);
    }
}
