pub mod failure;
pub mod transfer_monitor;
pub mod webhook_dispatcher;

pub use failure::RecordingFailureHandler;
pub use transfer_monitor::{
    FailureHandler, MonitorStats, TransferMonitor, TransferStore, EXTERNAL_FAILURE_REASON,
    STUCK_INITIATION_REASON,
};
pub use webhook_dispatcher::{
    DispatcherStats, DueNotification, NotificationQueue, NotificationStore, WebhookDispatcher,
};
