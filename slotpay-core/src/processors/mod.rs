//! Settlement processors.
//!
//! - [`settlement`]: the shared transition engine both pipelines use
//! - [`webhook`]: provider callback ingestion
//! - [`monitor`]: background reconciliation and statistics

pub mod monitor;
pub mod settlement;
pub mod webhook;

pub use monitor::{MonitorStats, SharedStats, TransactionMonitor};
pub use settlement::{CreditNotice, SettleError, SettlementEngine, SettlementOutcome};
pub use webhook::{ValidationError, WebhookError, WebhookProcessor};
