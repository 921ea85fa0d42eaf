pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;

pub use adapters::{
    DeliveryReceipt, LedgerApi, LedgerClient, NotificationSink, PostgresStore, RegulatorClient,
    RegulatorPayload, RemoteTransfer,
};
pub use config::AppConfig;
pub use domain::{
    NotificationStatus, Transfer, TransferStatus, WebhookNotification, MAX_DELIVERY_ATTEMPTS,
};
pub use error::{Result, SettlerError};
pub use services::{
    DispatcherStats, DueNotification, FailureHandler, MonitorStats, NotificationQueue,
    NotificationStore, RecordingFailureHandler, TransferMonitor, TransferStore, WebhookDispatcher,
};
