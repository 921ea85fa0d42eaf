use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::domain::{NotificationStatus, Transfer, TransferStatus, WebhookNotification};
use crate::error::{Result, SettlerError};
use crate::services::transfer_monitor::TransferStore;
use crate::services::webhook_dispatcher::{DueNotification, NotificationStore};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_transfer(row: &PgRow) -> Result<Transfer> {
        let status: String = row.get("status");
        let status =
            TransferStatus::try_from(status.as_str()).map_err(SettlerError::Internal)?;

        Ok(Transfer {
            id: row.get("id"),
            external_id: row.get("external_id"),
            status,
            amount: row.get("amount"),
            currency: row.get("currency"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
            failed_at: row.get("failed_at"),
        })
    }

    fn map_due_notification(row: &PgRow) -> Result<DueNotification> {
        let notification_status: String = row.get("status");
        let notification_status = NotificationStatus::try_from(notification_status.as_str())
            .map_err(SettlerError::Internal)?;
        let transfer_status: String = row.get("t_status");
        let transfer_status =
            TransferStatus::try_from(transfer_status.as_str()).map_err(SettlerError::Internal)?;

        Ok(DueNotification {
            notification: WebhookNotification {
                id: row.get("id"),
                transfer_id: row.get("transfer_id"),
                url: row.get("url"),
                status: notification_status,
                attempts: row.get("attempts"),
                last_attempt_at: row.get("last_attempt_at"),
                next_attempt_at: row.get("next_attempt_at"),
                response_status_code: row.get("response_status_code"),
                response_body: row.get("response_body"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            },
            transfer: Transfer {
                id: row.get("transfer_id"),
                external_id: row.get("t_external_id"),
                status: transfer_status,
                amount: row.get("t_amount"),
                currency: row.get("t_currency"),
                error_message: row.get("t_error_message"),
                created_at: row.get("t_created_at"),
                completed_at: row.get("t_completed_at"),
                failed_at: row.get("t_failed_at"),
            },
        })
    }
}

#[async_trait]
impl TransferStore for PostgresStore {
    async fn load_reconciliation_candidates(&self, limit: i64) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, external_id, status, amount, currency, error_message,
                   created_at, completed_at, failed_at
            FROM transfers
            WHERE status IN ('pending', 'processing')
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_transfer).collect()
    }

    async fn update_transfer(&self, transfer: &Transfer) -> Result<()> {
        // Terminal states are monotonic: the guard refuses to touch a row
        // that already completed or failed.
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET external_id = $2, status = $3, error_message = $4,
                completed_at = $5, failed_at = $6, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(transfer.id)
        .bind(&transfer.external_id)
        .bind(transfer.status.as_str())
        .bind(&transfer.error_message)
        .bind(transfer.completed_at)
        .bind(transfer.failed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                "transfer {} already terminal, update to {} skipped",
                transfer.id, transfer.status
            );
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn create_notification(&self, notification: &WebhookNotification) -> Result<()> {
        // One obligation per transfer: re-queueing the same transfer is a
        // no-op rather than a duplicate notification.
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_notifications
                (id, transfer_id, url, status, attempts, last_attempt_at, next_attempt_at,
                 response_status_code, response_body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (transfer_id) DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(notification.transfer_id)
        .bind(&notification.url)
        .bind(notification.status.as_str())
        .bind(notification.attempts)
        .bind(notification.last_attempt_at)
        .bind(notification.next_attempt_at)
        .bind(notification.response_status_code)
        .bind(&notification.response_body)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                "notification for transfer {} already queued",
                notification.transfer_id
            );
        }

        Ok(())
    }

    async fn update_notification(&self, notification: &WebhookNotification) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_notifications
            SET status = $2, attempts = $3, last_attempt_at = $4, next_attempt_at = $5,
                response_status_code = $6, response_body = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(notification.id)
        .bind(notification.status.as_str())
        .bind(notification.attempts)
        .bind(notification.last_attempt_at)
        .bind(notification.next_attempt_at)
        .bind(notification.response_status_code)
        .bind(&notification.response_body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_due(&self, max_attempts: i32, limit: i64) -> Result<Vec<DueNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT n.id, n.transfer_id, n.url, n.status, n.attempts, n.last_attempt_at,
                   n.next_attempt_at, n.response_status_code, n.response_body,
                   n.created_at, n.updated_at,
                   t.external_id AS t_external_id, t.status AS t_status, t.amount AS t_amount,
                   t.currency AS t_currency, t.error_message AS t_error_message,
                   t.created_at AS t_created_at, t.completed_at AS t_completed_at,
                   t.failed_at AS t_failed_at
            FROM webhook_notifications n
            JOIN transfers t ON t.id = n.transfer_id
            WHERE n.status IN ('pending', 'failed')
              AND n.next_attempt_at <= NOW()
              AND n.attempts < $1
            ORDER BY n.next_attempt_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_due_notification).collect()
    }
}
