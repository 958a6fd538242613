//! Per-user account state.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::Currency;

/// A user account: the token balance plus the bookkeeping that makes
/// balance mutations idempotent.
///
/// `token_balance` only changes through
/// [`BalanceLedger`](crate::ledger::BalanceLedger), and a credit only
/// applies if its transaction id is absent from
/// `processed_transaction_ids` at mutation time. The set grows
/// monotonically; it is never pruned while a transaction is
/// user-visible.
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub user_id: i64,
    pub token_balance: i64,
    pub vip: bool,
    pub deposit_addresses: HashMap<Currency, String>,
    pub withdrawal_addresses: HashMap<Currency, String>,
    pub processed_transaction_ids: HashSet<Uuid>,
}

impl Account {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }
}
