//! In-flight transaction and deposit-address records.

use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Currency, Network, TxStatus, TxType};

/// A transaction that has not yet reached a terminal state.
///
/// `amount`, `currency`, `network` and `user_id` are immutable after
/// creation. `token_amount` is written exactly once — at withdrawal
/// initiation, or at deposit/refund settlement — and never recomputed,
/// so a conversion-rate change mid-flight cannot alter what a
/// settlement credits or refunds.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    pub id: Uuid,
    pub tx_type: TxType,
    pub user_id: i64,
    pub currency: Currency,
    pub network: Network,
    /// Provider-currency units.
    pub amount: Decimal,
    /// Internal ledger units; `None` until settlement fixes it.
    pub token_amount: Option<i64>,
    pub address: String,
    pub status: TxStatus,
    pub created_at: OffsetDateTime,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl PendingTransaction {
    /// Create a fresh `Pending` record.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        tx_type: TxType,
        user_id: i64,
        currency: Currency,
        network: Network,
        amount: Decimal,
        address: String,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            tx_type,
            user_id,
            currency,
            network,
            amount,
            token_amount: None,
            address,
            status: TxStatus::Pending,
            created_at,
            retry_count: 0,
            last_error: None,
        }
    }

    /// How long this transaction has been in flight.
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.created_at
    }
}

/// An issued deposit address awaiting payment.
///
/// Issuing an address does not create a [`PendingTransaction`]; that
/// happens when the provider first reports a payment event for this
/// uuid. Until then this entry is what the monitor expires and what
/// bounds a user's open deposit requests.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositAddress {
    pub uuid: Uuid,
    pub user_id: i64,
    pub currency: Currency,
    pub network: Network,
    pub address: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl DepositAddress {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}
