//! Application state shared across all request handlers.

use slotpay_core::gateway::CryptoGateway;
use slotpay_core::gateway::provider::ProviderClient;
use slotpay_core::ledger::BalanceLedger;
use slotpay_core::processors::{SharedStats, WebhookProcessor};
use slotpay_core::store::{DepositAddressBook, PendingTransactionStore};
use std::sync::Arc;

use crate::config::runtime::RuntimeConfig;

/// Shared handler state. Cloneable and cheap (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<CryptoGateway<ProviderClient>>,
    pub store: Arc<PendingTransactionStore>,
    pub addresses: Arc<DepositAddressBook>,
    pub ledger: Arc<BalanceLedger>,
    pub webhooks: Arc<WebhookProcessor>,
    pub stats: SharedStats,
    pub config: Arc<RuntimeConfig>,
}
