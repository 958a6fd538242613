//! Shared settlement transitions.
//!
//! Both the webhook pipeline and the reconciliation monitor drive
//! settlements through this engine, so a recovered (re-polled)
//! transaction takes exactly the same path as a delivered webhook.
//!
//! Every method serializes on the per-transaction-id lock and holds it
//! across the ledger effect, the compare-and-set transition, and the
//! registry removal — concurrent deliveries of the same id can never
//! observe each other's intermediate state. The ledger's processed-id
//! check stays the final authority on whether a credit applies.

use rust_decimal::Decimal;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::CurrencyTable;
use crate::entities::transaction::PendingTransaction;
use crate::entities::{Currency, Network, TxStatus, TxType};
use crate::events::{EventSenders, SettlementEvent, TxEvent};
use crate::ledger::BalanceLedger;
use crate::store::{DepositAddressBook, PendingTransactionStore};

/// Settlement failures. None of these are authentication or dedup
/// concerns — those are handled before the engine is reached.
#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("amount not representable in ledger units")]
    AmountNotRepresentable,
    #[error("withdrawal {0} has no recorded token amount")]
    MissingTokenAmount(Uuid),
}

/// What a settlement call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The transaction reached its terminal state through this call.
    Applied,
    /// Replay of an already-settled transaction; idempotent no-op.
    AlreadyProcessed,
    /// Bookkeeping only, no terminal transition.
    Recorded,
}

/// A provider notice that can credit tokens: a paid deposit or a
/// completed refund.
#[derive(Debug, Clone)]
pub struct CreditNotice {
    pub tx_id: Uuid,
    pub user_id: i64,
    pub currency: Currency,
    pub network: Network,
    pub amount: Decimal,
    pub address: String,
}

/// Drives PendingTransactionStore + BalanceLedger transitions.
#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<PendingTransactionStore>,
    addresses: Arc<DepositAddressBook>,
    ledger: Arc<BalanceLedger>,
    currencies: CurrencyTable,
    events: EventSenders,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<PendingTransactionStore>,
        addresses: Arc<DepositAddressBook>,
        ledger: Arc<BalanceLedger>,
        currencies: CurrencyTable,
        events: EventSenders,
    ) -> Self {
        Self {
            store,
            addresses,
            ledger,
            currencies,
            events,
        }
    }

    /// Settle a paid deposit: credit `floor(amount * rate)` tokens, at
    /// most once for this transaction id.
    pub async fn credit_deposit(
        &self,
        notice: &CreditNotice,
    ) -> Result<SettlementOutcome, SettleError> {
        let _guard = self.store.lock_tx(notice.tx_id).await;
        let token_amount = self
            .currencies
            .token_amount(notice.currency, notice.amount)
            .ok_or(SettleError::AmountNotRepresentable)?;

        let credit = self
            .ledger
            .add_tokens(notice.user_id, token_amount, notice.tx_id)
            .await;
        // The address has served its purpose either way.
        self.addresses.remove(notice.tx_id).await;

        if !credit.applied {
            // Replay. Clear any entry an interrupted earlier pass left.
            self.finish_entry(notice.tx_id, TxStatus::Completed).await;
            tracing::debug!(uuid = %notice.tx_id, "deposit replay ignored");
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        if self.store.get(notice.tx_id).await.is_none() {
            // Paid arrived with no prior pending event; register the
            // transaction so the terminal transition has an entry.
            self.store
                .put(self.deposit_entry(notice, OffsetDateTime::now_utc()))
                .await;
            self.events
                .emit_tx(TxEvent::Created {
                    tx_id: notice.tx_id,
                    tx_type: TxType::Deposit,
                    currency: notice.currency,
                    network: notice.network,
                    amount: notice.amount,
                })
                .await;
        }
        if let Err(e) = self
            .store
            .transition(notice.tx_id, TxStatus::Pending, TxStatus::Completed, |tx| {
                tx.token_amount = Some(token_amount);
            })
            .await
        {
            // Should not happen while holding the per-id lock.
            tracing::warn!(uuid = %notice.tx_id, error = %e, "deposit completion transition conflicted");
        }
        self.store.remove(notice.tx_id).await;

        self.events
            .emit_tx(TxEvent::Settled {
                tx_id: notice.tx_id,
                tx_type: TxType::Deposit,
                network: notice.network,
            })
            .await;
        self.events
            .emit_settlement(SettlementEvent::DepositCredited {
                user_id: notice.user_id,
                tx_id: notice.tx_id,
                token_amount,
                amount: notice.amount,
                currency: notice.currency,
                network: notice.network,
            })
            .await;

        tracing::info!(
            user_id = notice.user_id,
            uuid = %notice.tx_id,
            token_amount,
            amount = %notice.amount,
            currency = %notice.currency,
            balance = credit.balance,
            "deposit credited"
        );
        Ok(SettlementOutcome::Applied)
    }

    /// A payment event with non-terminal status: register the deposit
    /// transaction if this is the first we hear of it.
    pub async fn note_deposit_pending(&self, notice: &CreditNotice) -> SettlementOutcome {
        let _guard = self.store.lock_tx(notice.tx_id).await;
        self.addresses.remove(notice.tx_id).await;

        if self
            .ledger
            .is_processed(notice.user_id, notice.tx_id)
            .await
        {
            // A pending event delivered after settlement.
            return SettlementOutcome::AlreadyProcessed;
        }
        if self.store.get(notice.tx_id).await.is_none() {
            self.store
                .put(self.deposit_entry(notice, OffsetDateTime::now_utc()))
                .await;
            self.events
                .emit_tx(TxEvent::Created {
                    tx_id: notice.tx_id,
                    tx_type: TxType::Deposit,
                    currency: notice.currency,
                    network: notice.network,
                    amount: notice.amount,
                })
                .await;
            tracing::info!(uuid = %notice.tx_id, user_id = notice.user_id, "deposit observed, awaiting confirmation");
        }
        SettlementOutcome::Recorded
    }

    /// Close a deposit that expired or failed at the provider. No
    /// ledger effect.
    pub async fn close_deposit(&self, tx_id: Uuid, to: TxStatus) -> SettlementOutcome {
        debug_assert!(to.is_terminal());
        let _guard = self.store.lock_tx(tx_id).await;
        self.addresses.remove(tx_id).await;

        match self
            .store
            .transition(tx_id, TxStatus::Pending, to, |_| {})
            .await
        {
            Ok(tx) => {
                self.store.remove(tx_id).await;
                self.events
                    .emit_tx(TxEvent::Failed {
                        tx_id,
                        tx_type: TxType::Deposit,
                        network: tx.network,
                    })
                    .await;
                tracing::info!(uuid = %tx_id, status = %to, "deposit closed without settlement");
                SettlementOutcome::Applied
            }
            Err(_) => SettlementOutcome::AlreadyProcessed,
        }
    }

    /// Complete a withdrawal. The debit was applied at initiation, so
    /// this is a pure status transition.
    pub async fn complete_withdrawal(&self, tx_id: Uuid) -> SettlementOutcome {
        let _guard = self.store.lock_tx(tx_id).await;
        let Some(tx) = self.store.get(tx_id).await else {
            return SettlementOutcome::AlreadyProcessed;
        };
        match self
            .store
            .transition(tx_id, TxStatus::Pending, TxStatus::Completed, |_| {})
            .await
        {
            Ok(_) => {
                self.store.remove(tx_id).await;
                self.events
                    .emit_tx(TxEvent::Settled {
                        tx_id,
                        tx_type: TxType::Withdrawal,
                        network: tx.network,
                    })
                    .await;
                self.events
                    .emit_settlement(SettlementEvent::WithdrawalCompleted {
                        user_id: tx.user_id,
                        tx_id,
                        amount: tx.amount,
                        currency: tx.currency,
                        network: tx.network,
                    })
                    .await;
                tracing::info!(uuid = %tx_id, user_id = tx.user_id, "withdrawal completed");
                SettlementOutcome::Applied
            }
            Err(_) => SettlementOutcome::AlreadyProcessed,
        }
    }

    /// A withdrawal failed at the provider: credit back the exact token
    /// amount debited at initiation, keyed by the transaction id.
    pub async fn refund_withdrawal(&self, tx_id: Uuid) -> Result<SettlementOutcome, SettleError> {
        let _guard = self.store.lock_tx(tx_id).await;
        let Some(tx) = self.store.get(tx_id).await else {
            // Replay after removal; the ledger already holds the id.
            return Ok(SettlementOutcome::AlreadyProcessed);
        };
        let token_amount = tx
            .token_amount
            .ok_or(SettleError::MissingTokenAmount(tx_id))?;

        let credit = self.ledger.add_tokens(tx.user_id, token_amount, tx_id).await;
        if let Err(e) = self
            .store
            .transition(tx_id, TxStatus::Pending, TxStatus::Failed, |t| {
                t.last_error = Some("withdrawal failed at provider".to_owned());
            })
            .await
        {
            tracing::warn!(uuid = %tx_id, error = %e, "withdrawal failure transition conflicted");
        }
        self.store.remove(tx_id).await;
        self.events
            .emit_tx(TxEvent::Failed {
                tx_id,
                tx_type: TxType::Withdrawal,
                network: tx.network,
            })
            .await;

        if credit.applied {
            self.events
                .emit_settlement(SettlementEvent::WithdrawalRefunded {
                    user_id: tx.user_id,
                    tx_id,
                    token_amount,
                    currency: tx.currency,
                    network: tx.network,
                })
                .await;
            tracing::info!(
                uuid = %tx_id,
                user_id = tx.user_id,
                token_amount,
                balance = credit.balance,
                "failed withdrawal refunded"
            );
            Ok(SettlementOutcome::Applied)
        } else {
            Ok(SettlementOutcome::AlreadyProcessed)
        }
    }

    /// A provider-side refund completed: credit tokens like a deposit
    /// settlement.
    pub async fn credit_refund(
        &self,
        notice: &CreditNotice,
    ) -> Result<SettlementOutcome, SettleError> {
        let _guard = self.store.lock_tx(notice.tx_id).await;
        let token_amount = self
            .currencies
            .token_amount(notice.currency, notice.amount)
            .ok_or(SettleError::AmountNotRepresentable)?;

        let credit = self
            .ledger
            .add_tokens(notice.user_id, token_amount, notice.tx_id)
            .await;
        // Refunds are provider-initiated; an entry exists only if a
        // prior event registered one.
        self.finish_entry(notice.tx_id, TxStatus::Completed).await;

        if credit.applied {
            self.events
                .emit_settlement(SettlementEvent::RefundCredited {
                    user_id: notice.user_id,
                    tx_id: notice.tx_id,
                    token_amount,
                    amount: notice.amount,
                    currency: notice.currency,
                    network: notice.network,
                })
                .await;
            tracing::info!(
                user_id = notice.user_id,
                uuid = %notice.tx_id,
                token_amount,
                "refund credited"
            );
            Ok(SettlementOutcome::Applied)
        } else {
            Ok(SettlementOutcome::AlreadyProcessed)
        }
    }

    fn deposit_entry(&self, notice: &CreditNotice, now: OffsetDateTime) -> PendingTransaction {
        PendingTransaction::new(
            notice.tx_id,
            TxType::Deposit,
            notice.user_id,
            notice.currency,
            notice.network,
            notice.amount,
            notice.address.clone(),
            now,
        )
    }

    /// Transition a lingering entry to `to` and drop it, if present.
    async fn finish_entry(&self, tx_id: Uuid, to: TxStatus) {
        if self.store.get(tx_id).await.is_some() {
            let _ = self.store.transition(tx_id, TxStatus::Pending, to, |_| {}).await;
            self.store.remove(tx_id).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{alert_event_channel, settlement_event_channel, tx_event_channel};

    pub(crate) struct EngineFixture {
        pub engine: SettlementEngine,
        pub events: EventSenders,
        pub store: Arc<PendingTransactionStore>,
        pub addresses: Arc<DepositAddressBook>,
        pub ledger: Arc<BalanceLedger>,
        pub settlement_rx: crate::events::SettlementEventReceiver,
        pub alert_rx: crate::events::AlertEventReceiver,
        pub tx_rx: crate::events::TxEventReceiver,
    }

    pub(crate) fn engine_fixture() -> EngineFixture {
        let store = Arc::new(PendingTransactionStore::new());
        let addresses = Arc::new(DepositAddressBook::new());
        let ledger = Arc::new(BalanceLedger::new());
        let (settlement_tx, settlement_rx) = settlement_event_channel();
        let (alert_tx, alert_rx) = alert_event_channel();
        let (tx_tx, tx_rx) = tx_event_channel();
        let events = EventSenders::new(settlement_tx, alert_tx, tx_tx);
        let engine = SettlementEngine::new(
            store.clone(),
            addresses.clone(),
            ledger.clone(),
            CurrencyTable::default(),
            events.clone(),
        );
        EngineFixture {
            engine,
            events,
            store,
            addresses,
            ledger,
            settlement_rx,
            alert_rx,
            tx_rx,
        }
    }

    fn btc_notice(tx_id: Uuid, user_id: i64, amount: Decimal) -> CreditNotice {
        CreditNotice {
            tx_id,
            user_id,
            currency: Currency::Btc,
            network: Network::Bitcoin,
            amount,
            address: "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into(),
        }
    }

    #[tokio::test]
    async fn direct_paid_and_pending_then_paid_agree() {
        // Path A: paid with no prior pending event.
        let mut a = engine_fixture();
        let tx_a = Uuid::new_v4();
        a.engine
            .credit_deposit(&btc_notice(tx_a, 1, Decimal::new(1, 2)))
            .await
            .unwrap();
        // The lifecycle events fire even without a prior pending entry.
        assert!(matches!(a.tx_rx.try_recv(), Ok(TxEvent::Created { .. })));
        assert!(matches!(a.tx_rx.try_recv(), Ok(TxEvent::Settled { .. })));
        assert!(matches!(
            a.settlement_rx.try_recv(),
            Ok(SettlementEvent::DepositCredited {
                token_amount: 10_000,
                ..
            })
        ));

        // Path B: pending first, then paid.
        let b = engine_fixture();
        let tx_b = Uuid::new_v4();
        b.engine
            .note_deposit_pending(&btc_notice(tx_b, 1, Decimal::new(1, 2)))
            .await;
        assert_eq!(b.store.get(tx_b).await.unwrap().status, TxStatus::Pending);
        b.engine
            .credit_deposit(&btc_notice(tx_b, 1, Decimal::new(1, 2)))
            .await
            .unwrap();

        assert_eq!(a.ledger.balance(1).await, 10_000);
        assert_eq!(b.ledger.balance(1).await, 10_000);
        assert!(a.store.is_empty().await);
        assert!(b.store.is_empty().await);
    }

    #[tokio::test]
    async fn deposit_credit_consumes_the_address_book_entry() {
        let f = engine_fixture();
        let tx_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        f.addresses
            .insert(crate::entities::transaction::DepositAddress {
                uuid: tx_id,
                user_id: 1,
                currency: Currency::Btc,
                network: Network::Bitcoin,
                address: "addr".into(),
                created_at: now,
                expires_at: now + time::Duration::hours(24),
            })
            .await;

        f.engine
            .credit_deposit(&btc_notice(tx_id, 1, Decimal::new(1, 2)))
            .await
            .unwrap();
        assert!(f.addresses.get(tx_id).await.is_none());
    }

    #[tokio::test]
    async fn refund_after_removal_stays_idempotent() {
        let f = engine_fixture();
        let tx_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let mut tx = PendingTransaction::new(
            tx_id,
            TxType::Withdrawal,
            1,
            Currency::Btc,
            Network::Bitcoin,
            Decimal::new(495, 5),
            "addr".into(),
            now,
        );
        tx.token_amount = Some(5_000);
        f.store.put(tx).await;

        assert_eq!(
            f.engine.refund_withdrawal(tx_id).await.unwrap(),
            SettlementOutcome::Applied
        );
        assert_eq!(f.ledger.balance(1).await, 5_000);

        // The entry is gone; a replay must not credit again.
        assert_eq!(
            f.engine.refund_withdrawal(tx_id).await.unwrap(),
            SettlementOutcome::AlreadyProcessed
        );
        assert_eq!(f.ledger.balance(1).await, 5_000);
    }

    #[tokio::test]
    async fn refund_credit_is_keyed_by_uuid() {
        let f = engine_fixture();
        let tx_id = Uuid::new_v4();
        let notice = btc_notice(tx_id, 2, Decimal::new(2, 3));

        assert_eq!(
            f.engine.credit_refund(&notice).await.unwrap(),
            SettlementOutcome::Applied
        );
        assert_eq!(
            f.engine.credit_refund(&notice).await.unwrap(),
            SettlementOutcome::AlreadyProcessed
        );
        assert_eq!(f.ledger.balance(2).await, 2_000);
    }
}
