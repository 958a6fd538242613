//! The token balance ledger.
//!
//! This is the enforcement point for at-most-once crediting: every
//! credit is keyed by a transaction id and checked against the
//! account's processed-id set inside the same write-lock critical
//! section that mutates the balance. Upstream dedup (the webhook
//! processor's in-flight window, the store's compare-and-set) may fail
//! fast, but correctness never depends on them.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entities::Currency;
use crate::entities::account::Account;

/// Ledger mutation errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: have {balance}, need {needed}")]
    InsufficientBalance { balance: i64, needed: i64 },
}

/// Result of an idempotent credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditOutcome {
    /// Balance after the call (unchanged if the credit was a replay).
    pub balance: i64,
    /// Whether this call actually moved the balance.
    pub applied: bool,
}

/// Owns every account's token balance.
///
/// All mutation goes through `&self` methods behind one `RwLock`; the
/// game logic uses [`add_tokens`](Self::add_tokens) /
/// [`remove_tokens`](Self::remove_tokens) directly for win/loss
/// settlement, outside the crypto path.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    accounts: RwLock<HashMap<i64, Account>>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` tokens, at most once per `tx_id`.
    ///
    /// If `tx_id` was already processed for this user the balance is
    /// left untouched and `applied` is `false`. Otherwise the balance
    /// increment and the processed-id insertion happen as one atomic
    /// unit.
    pub async fn add_tokens(&self, user_id: i64, amount: i64, tx_id: Uuid) -> CreditOutcome {
        debug_assert!(amount >= 0);
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id));
        if account.processed_transaction_ids.contains(&tx_id) {
            return CreditOutcome {
                balance: account.token_balance,
                applied: false,
            };
        }
        account.token_balance += amount;
        account.processed_transaction_ids.insert(tx_id);
        CreditOutcome {
            balance: account.token_balance,
            applied: true,
        }
    }

    /// Debit `amount` tokens, failing without mutation if the balance
    /// is too low.
    ///
    /// Not keyed by a transaction id: the only crypto-path caller is
    /// withdrawal initiation, which precedes transaction creation. The
    /// compensating refund path re-adds tokens through
    /// [`add_tokens`](Self::add_tokens) keyed by the eventual
    /// transaction id, which is what keeps retries idempotent.
    pub async fn remove_tokens(&self, user_id: i64, amount: i64) -> Result<i64, LedgerError> {
        debug_assert!(amount >= 0);
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id));
        if account.token_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: account.token_balance,
                needed: amount,
            });
        }
        account.token_balance -= amount;
        Ok(account.token_balance)
    }

    pub async fn balance(&self, user_id: i64) -> i64 {
        self.accounts
            .read()
            .await
            .get(&user_id)
            .map(|a| a.token_balance)
            .unwrap_or(0)
    }

    pub async fn is_processed(&self, user_id: i64, tx_id: Uuid) -> bool {
        self.accounts
            .read()
            .await
            .get(&user_id)
            .is_some_and(|a| a.processed_transaction_ids.contains(&tx_id))
    }

    pub async fn is_vip(&self, user_id: i64) -> bool {
        self.accounts
            .read()
            .await
            .get(&user_id)
            .is_some_and(|a| a.vip)
    }

    pub async fn set_vip(&self, user_id: i64, vip: bool) {
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id))
            .vip = vip;
    }

    pub async fn set_deposit_address(&self, user_id: i64, currency: Currency, address: String) {
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id))
            .deposit_addresses
            .insert(currency, address);
    }

    pub async fn set_withdrawal_address(&self, user_id: i64, currency: Currency, address: String) {
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id))
            .withdrawal_addresses
            .insert(currency, address);
    }

    pub async fn withdrawal_address(&self, user_id: i64, currency: Currency) -> Option<String> {
        self.accounts
            .read()
            .await
            .get(&user_id)
            .and_then(|a| a.withdrawal_addresses.get(&currency).cloned())
    }

    /// Clone of the full account, for read APIs.
    pub async fn snapshot(&self, user_id: i64) -> Option<Account> {
        self.accounts.read().await.get(&user_id).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn credit_applies_exactly_once_per_tx_id() {
        let ledger = BalanceLedger::new();
        let tx = Uuid::new_v4();

        let first = ledger.add_tokens(1, 10_000, tx).await;
        assert!(first.applied);
        assert_eq!(first.balance, 10_000);

        let replay = ledger.add_tokens(1, 10_000, tx).await;
        assert!(!replay.applied);
        assert_eq!(replay.balance, 10_000);
        assert_eq!(ledger.balance(1).await, 10_000);

        // A different id credits normally.
        let second = ledger.add_tokens(1, 500, Uuid::new_v4()).await;
        assert!(second.applied);
        assert_eq!(second.balance, 10_500);
    }

    #[tokio::test]
    async fn concurrent_replays_credit_once() {
        let ledger = std::sync::Arc::new(BalanceLedger::new());
        let tx = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(
                async move { ledger.add_tokens(7, 1_000, tx).await },
            ));
        }
        let mut applied = 0;
        for h in handles {
            if h.await.unwrap().applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(ledger.balance(7).await, 1_000);
    }

    #[tokio::test]
    async fn debit_fails_without_mutation_when_short() {
        let ledger = BalanceLedger::new();
        ledger.add_tokens(3, 100, Uuid::new_v4()).await;

        let err = ledger.remove_tokens(3, 200).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                balance: 100,
                needed: 200
            }
        ));
        assert_eq!(ledger.balance(3).await, 100);

        assert_eq!(ledger.remove_tokens(3, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn addresses_are_per_currency() {
        let ledger = BalanceLedger::new();
        ledger
            .set_withdrawal_address(5, Currency::Btc, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into())
            .await;
        assert!(ledger.withdrawal_address(5, Currency::Btc).await.is_some());
        assert!(ledger.withdrawal_address(5, Currency::Eth).await.is_none());
    }
}
