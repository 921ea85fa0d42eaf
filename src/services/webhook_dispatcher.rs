//! Regulator notification dispatcher.
//!
//! Drains the durable webhook queue: each pass selects due entries, attempts
//! delivery through the notification sink and either finalizes the entry or
//! reschedules it with exponential backoff. Entries that exhaust their
//! attempt budget stay in the table as an auditable dead-letter record.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::adapters::regulator::{NotificationSink, RegulatorPayload};
use crate::config::{DispatcherConfig, RegulatorConfig};
use crate::domain::{NotificationStatus, Transfer, WebhookNotification};
use crate::error::Result;

/// A due queue entry together with the transfer snapshot its payload is
/// built from.
#[derive(Debug, Clone)]
pub struct DueNotification {
    pub notification: WebhookNotification,
    pub transfer: Transfer,
}

/// Queue entry persistence interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new queue entry. Must be idempotent per transfer: creating
    /// an entry for a transfer that already has one is a no-op.
    async fn create_notification(&self, notification: &WebhookNotification) -> Result<()>;

    /// Persist an updated queue entry.
    async fn update_notification(&self, notification: &WebhookNotification) -> Result<()>;

    /// Entries eligible for a delivery attempt: status pending or failed,
    /// next_attempt_at in the past, attempts below `max_attempts`. Ordered
    /// by next_attempt_at ascending so the longest-overdue go first.
    async fn find_due(&self, max_attempts: i32, limit: i64) -> Result<Vec<DueNotification>>;
}

/// Enqueue interface handed to the reconciliation monitor and the failure
/// handler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Queue a regulator notification for a terminal transfer. A transfer
    /// that is not yet terminal is a silent no-op, never an error.
    async fn queue_notification(&self, transfer: &Transfer) -> Result<()>;
}

/// Dispatch statistics
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    pub entries_processed: u64,
    pub entries_sent: u64,
    pub entries_rescheduled: u64,
    pub entries_dead_lettered: u64,
    pub persistence_errors: u64,
    pub last_pass: Option<chrono::DateTime<chrono::Utc>>,
}

enum DeliveryOutcome {
    Sent,
    Rescheduled,
    DeadLettered,
    PersistenceError,
}

/// Webhook dispatcher service
pub struct WebhookDispatcher {
    store: Arc<dyn NotificationStore>,
    sink: Arc<dyn NotificationSink>,
    config: DispatcherConfig,
    webhook_url: String,
    stats: Arc<RwLock<DispatcherStats>>,
    running: Arc<AtomicBool>,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        sink: Arc<dyn NotificationSink>,
        config: DispatcherConfig,
        regulator: &RegulatorConfig,
    ) -> Self {
        Self {
            store,
            sink,
            config,
            webhook_url: regulator.webhook_url.clone(),
            stats: Arc::new(RwLock::new(DispatcherStats::default())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> DispatcherStats {
        self.stats.read().await.clone()
    }

    /// Run a single dispatch pass.
    pub async fn process_pass(&self) {
        debug!("checking for due webhook notifications");

        let due = match self
            .store
            .find_due(self.config.max_attempts, self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!("failed to fetch due webhook notifications: {}", e);
                return;
            }
        };

        if due.is_empty() {
            debug!("no due webhook notifications");
            return;
        }

        info!("processing {} due webhook notifications", due.len());

        let mut processed = 0u64;
        let mut sent = 0u64;
        let mut rescheduled = 0u64;
        let mut dead_lettered = 0u64;
        let mut persistence_errors = 0u64;

        for entry in due {
            processed += 1;
            match self.process_entry(entry).await {
                DeliveryOutcome::Sent => sent += 1,
                DeliveryOutcome::Rescheduled => rescheduled += 1,
                DeliveryOutcome::DeadLettered => dead_lettered += 1,
                DeliveryOutcome::PersistenceError => persistence_errors += 1,
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.entries_processed += processed;
            stats.entries_sent += sent;
            stats.entries_rescheduled += rescheduled;
            stats.entries_dead_lettered += dead_lettered;
            stats.persistence_errors += persistence_errors;
            stats.last_pass = Some(Utc::now());
        }

        debug!(
            "dispatch pass complete: processed={}, sent={}, rescheduled={}, dead_lettered={}, persistence_errors={}",
            processed, sent, rescheduled, dead_lettered, persistence_errors
        );
    }

    /// Attempt delivery for one due entry. Errors are contained here so one
    /// bad entry never aborts the rest of the pass.
    async fn process_entry(&self, entry: DueNotification) -> DeliveryOutcome {
        let DueNotification {
            mut notification,
            transfer,
        } = entry;

        let payload = RegulatorPayload::for_transfer(&transfer);
        let result = self.sink.deliver(&payload).await;

        // Attempt accounting happens regardless of outcome.
        let now = Utc::now();
        notification.last_attempt_at = Some(now);
        notification.attempts += 1;

        let delivered = match result {
            Ok(receipt) => {
                notification.response_status_code = Some(receipt.status_code as i32);
                notification.response_body = Some(receipt.body.clone());
                if receipt.is_success() {
                    true
                } else {
                    warn!(
                        "regulator rejected notification {} with status {} (attempt {})",
                        notification.id, receipt.status_code, notification.attempts
                    );
                    false
                }
            }
            Err(e) => {
                warn!(
                    "failed to deliver webhook notification {}: {} (attempt {})",
                    notification.id, e, notification.attempts
                );
                notification.response_status_code = None;
                notification.response_body = None;
                false
            }
        };

        let outcome = if delivered {
            info!(
                "successfully sent webhook notification {} for transfer {}",
                notification.id, notification.transfer_id
            );
            notification.status = NotificationStatus::Sent;
            DeliveryOutcome::Sent
        } else {
            notification.status = NotificationStatus::Failed;
            notification.next_attempt_at = now + self.config.backoff_delay(notification.attempts);
            if notification.attempts >= self.config.max_attempts {
                warn!(
                    "webhook notification {} exhausted its {} delivery attempts, leaving as dead letter",
                    notification.id, self.config.max_attempts
                );
                DeliveryOutcome::DeadLettered
            } else {
                DeliveryOutcome::Rescheduled
            }
        };

        if let Err(e) = self.store.update_notification(&notification).await {
            // The in-memory attempt is lost; the entry is re-evaluated fresh
            // on the next pass. At-least-once, not exactly-once.
            error!(
                "failed to persist webhook notification {}: {}",
                notification.id, e
            );
            return DeliveryOutcome::PersistenceError;
        }

        outcome
    }

    /// Start the dispatch loop
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("webhook dispatcher already running");
            return;
        }

        info!(
            "starting webhook dispatcher (interval: {}s, batch: {})",
            self.config.interval_secs, self.config.batch_size
        );

        let dispatcher = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                dispatcher.config.interval_secs,
            ));

            while dispatcher.running.load(Ordering::SeqCst) {
                interval.tick().await;
                dispatcher.process_pass().await;
            }

            info!("webhook dispatcher stopped");
        });
    }

    /// Stop the dispatch loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("webhook dispatcher stop requested");
    }
}

#[async_trait]
impl NotificationQueue for WebhookDispatcher {
    async fn queue_notification(&self, transfer: &Transfer) -> Result<()> {
        if !transfer.status.is_terminal() {
            warn!(
                "attempted to queue regulator notification for transfer {} with non-terminal status {}",
                transfer.id, transfer.status
            );
            return Ok(());
        }

        let notification = WebhookNotification::for_transfer(transfer.id, self.webhook_url.clone());

        if let Err(e) = self.store.create_notification(&notification).await {
            error!(
                "failed to create webhook notification record for transfer {}: {}",
                transfer.id, e
            );
            return Err(e);
        }

        info!(
            "queued regulator notification {} for transfer {}",
            notification.id, transfer.id
        );
        Ok(())
    }
}
