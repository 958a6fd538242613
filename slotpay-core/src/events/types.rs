//! Event type definitions.
//!
//! Events are ephemeral notifications, not state: every consumer that
//! needs current data re-reads the ledger or the store. Settlement and
//! alert events are consumed outside this crate (bot notifications,
//! dashboard); [`TxEvent`] feeds the monitor's statistics.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::entities::{Currency, Network, TxType};

/// A ledger-relevant settlement happened.
///
/// The bot-notification layer subscribes to these to message the user.
#[derive(Debug, Clone)]
pub enum SettlementEvent {
    DepositCredited {
        user_id: i64,
        tx_id: Uuid,
        token_amount: i64,
        amount: Decimal,
        currency: Currency,
        network: Network,
    },
    WithdrawalCompleted {
        user_id: i64,
        tx_id: Uuid,
        amount: Decimal,
        currency: Currency,
        network: Network,
    },
    /// A failed withdrawal had its up-front debit credited back.
    WithdrawalRefunded {
        user_id: i64,
        tx_id: Uuid,
        token_amount: i64,
        currency: Currency,
        network: Network,
    },
    RefundCredited {
        user_id: i64,
        tx_id: Uuid,
        token_amount: i64,
        amount: Decimal,
        currency: Currency,
        network: Network,
    },
    /// A deposit address reached its expiry with no payment observed.
    DepositAddressExpired {
        user_id: i64,
        uuid: Uuid,
        currency: Currency,
        network: Network,
    },
}

/// Operational alerts, consumed by the (external) admin dashboard.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    LongPending {
        tx_id: Uuid,
        tx_type: TxType,
        network: Network,
        pending_for: time::Duration,
    },
    RetriesExhausted {
        tx_id: Uuid,
        tx_type: TxType,
        network: Network,
    },
    HighFailureRate {
        network: Network,
        rate: f64,
    },
    LargeTransaction {
        tx_id: Uuid,
        tx_type: TxType,
        currency: Currency,
        network: Network,
        amount: Decimal,
    },
    /// Webhook processing exhausted its retries; the payload is carried
    /// verbatim for manual handling.
    WebhookStalled {
        tx_id: Uuid,
        payload: String,
        error: String,
    },
}

/// Transaction lifecycle observations feeding monitor statistics.
#[derive(Debug, Clone)]
pub enum TxEvent {
    Created {
        tx_id: Uuid,
        tx_type: TxType,
        currency: Currency,
        network: Network,
        amount: Decimal,
    },
    Settled {
        tx_id: Uuid,
        tx_type: TxType,
        network: Network,
    },
    Failed {
        tx_id: Uuid,
        tx_type: TxType,
        network: Network,
    },
}
