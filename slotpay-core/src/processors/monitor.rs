//! TransactionMonitor processor.
//!
//! The monitor is responsible for:
//! - Re-polling the provider for transactions stuck past the SLA and
//!   applying the shared settlement path when the provider reports a
//!   terminal status the webhook pipeline missed
//! - Expiring deposit addresses past their `expires_at`
//! - Bounded re-poll bookkeeping for overdue withdrawals
//! - Accumulating per-network counters and hourly volume, with
//!   failure-rate and large-transaction alerts
//!
//! The loop never holds a transaction's lock across a provider call —
//! the settlement engine acquires per id, acts, and releases.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::time::MissedTickBehavior;

use slotpay_sdk::objects::provider::TransactionStatus;

use crate::config::{CurrencyTable, MonitorConfig};
use crate::entities::transaction::{DepositAddress, PendingTransaction};
use crate::entities::{Network, TxStatus, TxType};
use crate::events::{AlertEvent, EventSenders, SettlementEvent, TxEvent, TxEventReceiver};
use crate::gateway::CryptoGateway;
use crate::gateway::provider::ProviderApi;
use crate::store::{DepositAddressBook, PendingTransactionStore};

use super::settlement::{CreditNotice, SettlementEngine};

/// Marker written to `last_error` once the re-poll budget is spent, so
/// the permanent alert fires exactly once.
const RETRIES_EXHAUSTED: &str = "re-poll budget exhausted";

/// Per-network counters.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub volume: Decimal,
}

/// Deposit/withdrawal volume for one hour of the day.
#[derive(Debug, Clone, Default)]
pub struct HourlyVolume {
    pub deposits: Decimal,
    pub withdrawals: Decimal,
}

/// Aggregate statistics, shared with the admin read API.
///
/// Resets clear these aggregates only; the pending registry itself is
/// never touched by a reset.
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    pub network_stats: HashMap<Network, NetworkStats>,
    pub hourly_volume: HashMap<u8, HourlyVolume>,
}

impl MonitorStats {
    pub fn failure_rates(&self) -> HashMap<Network, f64> {
        self.network_stats
            .iter()
            .filter(|(_, s)| s.total > 0)
            .map(|(n, s)| (*n, s.failed as f64 / s.total as f64))
            .collect()
    }
}

pub type SharedStats = Arc<RwLock<MonitorStats>>;

/// Background reconciliation and statistics loop.
pub struct TransactionMonitor<P> {
    config: MonitorConfig,
    gateway: Arc<CryptoGateway<P>>,
    engine: SettlementEngine,
    store: Arc<PendingTransactionStore>,
    addresses: Arc<DepositAddressBook>,
    currencies: CurrencyTable,
    events: EventSenders,
    stats: SharedStats,
}

impl<P: ProviderApi> TransactionMonitor<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MonitorConfig,
        gateway: Arc<CryptoGateway<P>>,
        engine: SettlementEngine,
        store: Arc<PendingTransactionStore>,
        addresses: Arc<DepositAddressBook>,
        currencies: CurrencyTable,
        events: EventSenders,
    ) -> Self {
        Self {
            config,
            gateway,
            engine,
            store,
            addresses,
            currencies,
            events,
            stats: Arc::new(RwLock::new(MonitorStats::default())),
        }
    }

    /// Handle to the statistics, for the admin read API.
    pub fn stats(&self) -> SharedStats {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>, mut tx_rx: TxEventReceiver) {
        tracing::info!("TransactionMonitor started");

        let mut scan = tokio::time::interval(self.config.check_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut hour_roll = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        hour_roll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut midnight_check = tokio::time::interval(std::time::Duration::from_secs(60));
        midnight_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("TransactionMonitor received shutdown signal");
                        break;
                    }
                }

                Some(event) = tx_rx.recv() => {
                    self.observe(event).await;
                }

                _ = scan.tick() => {
                    self.scan(OffsetDateTime::now_utc()).await;
                }

                _ = hour_roll.tick() => {
                    self.roll_hour(OffsetDateTime::now_utc()).await;
                }

                _ = midnight_check.tick() => {
                    let now = OffsetDateTime::now_utc();
                    if now.hour() == 0 && now.minute() == 0 {
                        self.reset_daily().await;
                    }
                }
            }
        }

        tracing::info!("TransactionMonitor shutdown complete");
    }

    /// One reconciliation pass.
    async fn scan(&self, now: OffsetDateTime) {
        // Deposit addresses past their expiry: the only cancellation
        // path for deposits.
        for entry in self.addresses.take_expired(now).await {
            tracing::info!(
                uuid = %entry.uuid,
                user_id = entry.user_id,
                currency = %entry.currency,
                "deposit address expired with no payment observed"
            );
            self.events
                .emit_settlement(SettlementEvent::DepositAddressExpired {
                    user_id: entry.user_id,
                    uuid: entry.uuid,
                    currency: entry.currency,
                    network: entry.network,
                })
                .await;
        }

        // Open addresses past the SLA: the webhook may have been lost
        // entirely, so ask the provider directly.
        for entry in self
            .addresses
            .list_older_than(self.config.pending_sla, now)
            .await
        {
            match self.gateway.check_status(entry.uuid).await {
                Ok(remote) => self.reconcile_address(&entry, &remote).await,
                Err(e) => {
                    tracing::warn!(uuid = %entry.uuid, error = %e, "address status check failed");
                }
            }
        }

        // Stale pending transactions.
        for tx in self.store.list_older_than(self.config.pending_sla, now).await {
            match self.gateway.check_status(tx.id).await {
                Ok(remote) => {
                    if self.reconcile(&tx, &remote).await {
                        continue;
                    }
                }
                Err(e) => {
                    tracing::warn!(uuid = %tx.id, error = %e, "status check failed");
                }
            }
            self.handle_overdue(&tx, now).await;
        }

        self.check_failure_rates().await;
    }

    /// Recover a dropped deposit webhook from an address-book entry.
    async fn reconcile_address(&self, entry: &DepositAddress, remote: &TransactionStatus) {
        match remote.status.as_str() {
            "paid" | "completed" => {
                let Some(amount) = remote.amount else {
                    tracing::warn!(uuid = %entry.uuid, "provider reports paid but no amount");
                    return;
                };
                let notice = CreditNotice {
                    tx_id: entry.uuid,
                    user_id: entry.user_id,
                    currency: entry.currency,
                    network: entry.network,
                    amount,
                    address: entry.address.clone(),
                };
                tracing::info!(uuid = %entry.uuid, "recovering dropped deposit webhook");
                if let Err(e) = self.engine.credit_deposit(&notice).await {
                    tracing::error!(uuid = %entry.uuid, error = %e, "reconciliation credit failed");
                }
            }
            "expired" | "failed" => {
                self.addresses.remove(entry.uuid).await;
                self.events
                    .emit_settlement(SettlementEvent::DepositAddressExpired {
                        user_id: entry.user_id,
                        uuid: entry.uuid,
                        currency: entry.currency,
                        network: entry.network,
                    })
                    .await;
            }
            _ => {}
        }
    }

    /// Apply a provider-reported terminal status through the same
    /// settlement path the webhook pipeline uses. Returns `true` when
    /// the transaction reached a terminal state.
    async fn reconcile(&self, tx: &PendingTransaction, remote: &TransactionStatus) -> bool {
        match (tx.tx_type, remote.status.as_str()) {
            (TxType::Deposit, "paid" | "completed") => {
                let notice = CreditNotice {
                    tx_id: tx.id,
                    user_id: tx.user_id,
                    currency: tx.currency,
                    network: tx.network,
                    amount: remote.amount.unwrap_or(tx.amount),
                    address: tx.address.clone(),
                };
                if let Err(e) = self.engine.credit_deposit(&notice).await {
                    tracing::error!(uuid = %tx.id, error = %e, "reconciliation credit failed");
                }
                true
            }
            (TxType::Deposit, "expired") => {
                self.engine.close_deposit(tx.id, TxStatus::Expired).await;
                true
            }
            (TxType::Deposit, "failed") => {
                self.engine.close_deposit(tx.id, TxStatus::Failed).await;
                true
            }
            (TxType::Withdrawal, "completed" | "paid") => {
                self.engine.complete_withdrawal(tx.id).await;
                true
            }
            (TxType::Withdrawal, "failed") => {
                if let Err(e) = self.engine.refund_withdrawal(tx.id).await {
                    tracing::error!(uuid = %tx.id, error = %e, "reconciliation refund failed");
                }
                true
            }
            (TxType::Refund, "completed") => {
                let notice = CreditNotice {
                    tx_id: tx.id,
                    user_id: tx.user_id,
                    currency: tx.currency,
                    network: tx.network,
                    amount: remote.amount.unwrap_or(tx.amount),
                    address: tx.address.clone(),
                };
                if let Err(e) = self.engine.credit_refund(&notice).await {
                    tracing::error!(uuid = %tx.id, error = %e, "reconciliation refund credit failed");
                }
                true
            }
            _ => false,
        }
    }

    /// Still pending past the SLA: alert, and for withdrawals spend the
    /// bounded re-poll budget.
    async fn handle_overdue(&self, tx: &PendingTransaction, now: OffsetDateTime) {
        let pending_for = tx.age(now);
        tracing::warn!(
            uuid = %tx.id,
            tx_type = %tx.tx_type,
            network = %tx.network,
            %pending_for,
            retry_count = tx.retry_count,
            "transaction pending past SLA"
        );
        self.events
            .emit_alert(AlertEvent::LongPending {
                tx_id: tx.id,
                tx_type: tx.tx_type,
                network: tx.network,
                pending_for,
            })
            .await;

        if tx.tx_type != TxType::Withdrawal {
            return;
        }
        if tx.retry_count < self.config.max_retries {
            let retries = self.store.record_retry(tx.id).await;
            tracing::debug!(uuid = %tx.id, ?retries, "scheduled another status re-poll");
        } else if tx.last_error.as_deref() != Some(RETRIES_EXHAUSTED) {
            self.store.set_last_error(tx.id, RETRIES_EXHAUSTED).await;
            tracing::error!(uuid = %tx.id, "withdrawal re-poll budget exhausted");
            self.events
                .emit_alert(AlertEvent::RetriesExhausted {
                    tx_id: tx.id,
                    tx_type: tx.tx_type,
                    network: tx.network,
                })
                .await;
        }
    }

    /// Fold one lifecycle observation into the aggregates.
    async fn observe(&self, event: TxEvent) {
        match event {
            TxEvent::Created {
                tx_id,
                tx_type,
                currency,
                network,
                amount,
            } => {
                let mut stats = self.stats.write().await;
                stats.total_transactions += 1;
                let net = stats.network_stats.entry(network).or_default();
                net.total += 1;
                net.volume += amount;

                let hour = OffsetDateTime::now_utc().hour();
                let bucket = stats.hourly_volume.entry(hour).or_default();
                match tx_type {
                    TxType::Withdrawal => bucket.withdrawals += amount,
                    TxType::Deposit | TxType::Refund => bucket.deposits += amount,
                }
                drop(stats);

                if let Some(spec) = self.currencies.spec(currency)
                    && amount >= spec.large_tx_threshold
                {
                    self.events
                        .emit_alert(AlertEvent::LargeTransaction {
                            tx_id,
                            tx_type,
                            currency,
                            network,
                            amount,
                        })
                        .await;
                }
            }
            TxEvent::Settled { network, .. } => {
                let mut stats = self.stats.write().await;
                stats.successful_transactions += 1;
                stats.network_stats.entry(network).or_default().successful += 1;
            }
            TxEvent::Failed { network, .. } => {
                let mut stats = self.stats.write().await;
                stats.failed_transactions += 1;
                stats.network_stats.entry(network).or_default().failed += 1;
            }
        }
    }

    async fn check_failure_rates(&self) {
        let rates = self.stats.read().await.failure_rates();
        for (network, rate) in rates {
            if rate > self.config.failure_rate_threshold {
                tracing::warn!(%network, rate, "network failure rate above threshold");
                self.events
                    .emit_alert(AlertEvent::HighFailureRate { network, rate })
                    .await;
            }
        }
    }

    /// Start a fresh bucket for the new hour.
    async fn roll_hour(&self, now: OffsetDateTime) {
        self.stats
            .write()
            .await
            .hourly_volume
            .insert(now.hour(), HourlyVolume::default());
    }

    /// Midnight reset: aggregates only.
    async fn reset_daily(&self) {
        let mut stats = self.stats.write().await;
        *stats = MonitorStats::default();
        tracing::info!("daily statistics reset");
    }
}
