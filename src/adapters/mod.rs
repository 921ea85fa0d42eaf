pub mod ledger;
pub mod postgres;
pub mod regulator;

pub use ledger::{LedgerApi, LedgerClient, RemoteTransfer};
pub use postgres::PostgresStore;
pub use regulator::{DeliveryReceipt, NotificationSink, RegulatorClient, RegulatorPayload};
