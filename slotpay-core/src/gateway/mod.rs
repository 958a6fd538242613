//! CryptoGateway: the transaction-issuing boundary to the provider.
//!
//! The gateway validates requests synchronously (no state is created on
//! a validation failure), issues deposit addresses, and submits
//! withdrawals. Withdrawals debit the ledger *before* the provider call
//! so funds cannot be double-spent while in flight; if the submission
//! itself fails, the exact debited amount is credited back through the
//! idempotent ledger path.

pub mod provider;

use rust_decimal::Decimal;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use slotpay_sdk::objects::provider::{
    CreatePaymentRequest, CreateWithdrawalRequest, NetworkFee, TransactionStatus,
};
use slotpay_sdk::objects::webhook::{OrderKind, OrderRef};

use crate::config::{CurrencyTable, GatewayConfig};
use crate::entities::transaction::{DepositAddress, PendingTransaction};
use crate::entities::{Currency, Network, TxType, address};
use crate::events::{EventSenders, TxEvent};
use crate::ledger::{BalanceLedger, LedgerError};
use crate::store::{DepositAddressBook, PendingTransactionStore};

use provider::{ProviderApi, ProviderError};

/// Gateway request failures.
///
/// Validation variants reject synchronously — nothing was created or
/// mutated. `Provider` is the only retryable variant.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(Currency),
    #[error("network {network} is not valid for {currency}")]
    UnsupportedNetwork {
        currency: Currency,
        network: Network,
    },
    #[error("invalid {currency} address for {network}")]
    InvalidAddress {
        currency: Currency,
        network: Network,
    },
    #[error("maximum open deposit addresses reached")]
    TooManyPendingDeposits,
    #[error("minimum withdrawal is {minimum} {currency}")]
    BelowMinimumWithdrawal {
        minimum: Decimal,
        currency: Currency,
    },
    #[error("no {currency} withdrawal address registered")]
    NoWithdrawalAddress { currency: Currency },
    #[error("amount not representable in ledger units")]
    AmountNotRepresentable,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Successful deposit-address issuance.
#[derive(Debug, Clone)]
pub struct DepositAddressGrant {
    pub address: String,
    pub expires_at: OffsetDateTime,
    pub minimum_deposit: Decimal,
    pub currency: Currency,
    pub network: Network,
}

/// Successful withdrawal submission.
#[derive(Debug, Clone)]
pub struct WithdrawalReceipt {
    pub tx_id: Uuid,
    /// Net amount submitted (gross minus fee).
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: Currency,
    pub network: Network,
}

/// Issues deposit addresses and withdrawal requests against the
/// external provider. Holds no mutable state of its own — the registry,
/// address book, and ledger are the shared collaborators it drives.
pub struct CryptoGateway<P> {
    config: GatewayConfig,
    currencies: CurrencyTable,
    provider: P,
    ledger: Arc<BalanceLedger>,
    store: Arc<PendingTransactionStore>,
    addresses: Arc<DepositAddressBook>,
    events: EventSenders,
}

impl<P: ProviderApi> CryptoGateway<P> {
    pub fn new(
        config: GatewayConfig,
        currencies: CurrencyTable,
        provider: P,
        ledger: Arc<BalanceLedger>,
        store: Arc<PendingTransactionStore>,
        addresses: Arc<DepositAddressBook>,
        events: EventSenders,
    ) -> Self {
        Self {
            config,
            currencies,
            provider,
            ledger,
            store,
            addresses,
            events,
        }
    }

    pub fn currencies(&self) -> &CurrencyTable {
        &self.currencies
    }

    /// Issue a deposit address for `user_id`.
    ///
    /// Issuance does not create a transaction; it records an address
    /// book entry with an expiry and updates the account's deposit
    /// address for the currency.
    pub async fn generate_deposit_address(
        &self,
        user_id: i64,
        currency: Currency,
        network: Network,
    ) -> Result<DepositAddressGrant, GatewayError> {
        let spec = self
            .currencies
            .spec(currency)
            .ok_or(GatewayError::UnsupportedCurrency(currency))?;
        if !spec.networks.contains(&network) {
            return Err(GatewayError::UnsupportedNetwork { currency, network });
        }
        if self.addresses.open_count(user_id).await >= self.config.max_pending_deposits {
            return Err(GatewayError::TooManyPendingDeposits);
        }

        let now = OffsetDateTime::now_utc();
        let order_id = OrderRef::new(OrderKind::Deposit, user_id, now.unix_timestamp()).encode();
        let created = self
            .provider
            .create_payment(CreatePaymentRequest {
                currency: currency.code().to_owned(),
                network: network.name().to_owned(),
                order_id,
                url_callback: self.config.callback_url.clone(),
                is_payment_multiple: false,
                lifetime: self.config.deposit_lifetime.whole_seconds(),
                minimum_amount: spec.minimum_deposit,
            })
            .await?;

        let expires_at = now + self.config.deposit_lifetime;
        self.addresses
            .insert(DepositAddress {
                uuid: created.uuid,
                user_id,
                currency,
                network,
                address: created.address.clone(),
                created_at: now,
                expires_at,
            })
            .await;
        self.ledger
            .set_deposit_address(user_id, currency, created.address.clone())
            .await;

        tracing::info!(
            user_id,
            %currency,
            %network,
            uuid = %created.uuid,
            "issued deposit address"
        );

        Ok(DepositAddressGrant {
            address: created.address,
            expires_at,
            minimum_deposit: spec.minimum_deposit,
            currency,
            network,
        })
    }

    /// Submit a withdrawal, debiting the token equivalent up front.
    pub async fn initiate_withdrawal(
        &self,
        user_id: i64,
        amount: Decimal,
        currency: Currency,
        network: Network,
    ) -> Result<WithdrawalReceipt, GatewayError> {
        let spec = self
            .currencies
            .spec(currency)
            .ok_or(GatewayError::UnsupportedCurrency(currency))?;
        if !spec.networks.contains(&network) {
            return Err(GatewayError::UnsupportedNetwork { currency, network });
        }
        if amount < spec.minimum_withdrawal {
            return Err(GatewayError::BelowMinimumWithdrawal {
                minimum: spec.minimum_withdrawal,
                currency,
            });
        }
        let destination = self
            .ledger
            .withdrawal_address(user_id, currency)
            .await
            .ok_or(GatewayError::NoWithdrawalAddress { currency })?;
        let token_amount = self
            .currencies
            .token_amount(currency, amount)
            .ok_or(GatewayError::AmountNotRepresentable)?;

        // Debit before talking to the provider: the user must not be
        // able to spend these tokens while the withdrawal is in flight.
        self.ledger.remove_tokens(user_id, token_amount).await?;

        let fee_rate = if self.ledger.is_vip(user_id).await {
            spec.fee_vip
        } else {
            spec.fee_regular
        };
        let fee = amount * fee_rate;
        let net_amount = amount - fee;

        let now = OffsetDateTime::now_utc();
        let order_id = OrderRef::new(OrderKind::Withdrawal, user_id, now.unix_timestamp()).encode();
        // Keys the compensating credit if the submission itself fails;
        // the provider has not assigned a transaction id at that point.
        let attempt_id = Uuid::new_v4();

        match self
            .provider
            .create_withdrawal(CreateWithdrawalRequest {
                currency: currency.code().to_owned(),
                network: network.name().to_owned(),
                amount: net_amount,
                address: destination.clone(),
                order_id,
                is_subtract_fee_from_amount: true,
            })
            .await
        {
            Ok(created) => {
                let mut tx = PendingTransaction::new(
                    created.uuid,
                    TxType::Withdrawal,
                    user_id,
                    currency,
                    network,
                    net_amount,
                    destination,
                    now,
                );
                tx.token_amount = Some(token_amount);
                self.store.put(tx).await;
                self.events
                    .emit_tx(TxEvent::Created {
                        tx_id: created.uuid,
                        tx_type: TxType::Withdrawal,
                        currency,
                        network,
                        amount: net_amount,
                    })
                    .await;

                tracing::info!(
                    user_id,
                    uuid = %created.uuid,
                    %currency,
                    %network,
                    %net_amount,
                    token_amount,
                    "withdrawal submitted"
                );

                Ok(WithdrawalReceipt {
                    tx_id: created.uuid,
                    amount: net_amount,
                    fee,
                    currency,
                    network,
                })
            }
            Err(e) => {
                // Reverse the up-front debit through the idempotent
                // credit path, keyed by this attempt.
                let refund = self.ledger.add_tokens(user_id, token_amount, attempt_id).await;
                tracing::warn!(
                    user_id,
                    %currency,
                    %network,
                    token_amount,
                    refund_applied = refund.applied,
                    error = %e,
                    "withdrawal submission failed, debit reversed"
                );
                Err(GatewayError::Provider(e))
            }
        }
    }

    /// Read-only provider status query, used by the monitor.
    pub async fn check_status(&self, tx_id: Uuid) -> Result<TransactionStatus, ProviderError> {
        self.provider.transaction_status(tx_id).await
    }

    /// Validate and register a withdrawal address for a user.
    pub async fn set_withdrawal_address(
        &self,
        user_id: i64,
        addr: String,
        currency: Currency,
        network: Network,
    ) -> Result<(), GatewayError> {
        let spec = self
            .currencies
            .spec(currency)
            .ok_or(GatewayError::UnsupportedCurrency(currency))?;
        if !spec.networks.contains(&network) {
            return Err(GatewayError::UnsupportedNetwork { currency, network });
        }
        if !address::matches_network(network, &addr) {
            return Err(GatewayError::InvalidAddress { currency, network });
        }
        self.ledger
            .set_withdrawal_address(user_id, currency, addr)
            .await;
        Ok(())
    }

    /// Current provider fee for a network.
    pub async fn network_fee(&self, network: Network) -> Result<NetworkFee, ProviderError> {
        self.provider.network_fee(network).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::{alert_event_channel, settlement_event_channel, tx_event_channel};
    use async_trait::async_trait;
    use slotpay_sdk::objects::provider::{PaymentCreated, WithdrawalCreated};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProvider {
        fail_submissions: AtomicBool,
        uuid: Uuid,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                fail_submissions: AtomicBool::new(false),
                uuid: Uuid::new_v4(),
            }
        }
    }

    #[async_trait]
    impl ProviderApi for StubProvider {
        async fn create_payment(
            &self,
            _request: CreatePaymentRequest,
        ) -> Result<PaymentCreated, ProviderError> {
            if self.fail_submissions.load(Ordering::SeqCst) {
                return Err(ProviderError::Timeout);
            }
            Ok(PaymentCreated {
                uuid: Uuid::new_v4(),
                address: "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into(),
            })
        }

        async fn create_withdrawal(
            &self,
            _request: CreateWithdrawalRequest,
        ) -> Result<WithdrawalCreated, ProviderError> {
            if self.fail_submissions.load(Ordering::SeqCst) {
                return Err(ProviderError::Timeout);
            }
            Ok(WithdrawalCreated { uuid: self.uuid })
        }

        async fn transaction_status(
            &self,
            tx_id: Uuid,
        ) -> Result<TransactionStatus, ProviderError> {
            Ok(TransactionStatus {
                uuid: tx_id,
                status: "pending".into(),
                amount: None,
            })
        }

        async fn network_fee(&self, network: Network) -> Result<NetworkFee, ProviderError> {
            Ok(NetworkFee {
                network: network.name().into(),
                fee: Decimal::ZERO,
            })
        }
    }

    struct Fixture {
        gateway: CryptoGateway<StubProvider>,
        ledger: Arc<BalanceLedger>,
        store: Arc<PendingTransactionStore>,
        addresses: Arc<DepositAddressBook>,
        // Keep receivers alive so emits do not log warnings.
        _rx: (
            crate::events::SettlementEventReceiver,
            crate::events::AlertEventReceiver,
            crate::events::TxEventReceiver,
        ),
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(BalanceLedger::new());
        let store = Arc::new(PendingTransactionStore::new());
        let addresses = Arc::new(DepositAddressBook::new());
        let (settlement_tx, settlement_rx) = settlement_event_channel();
        let (alert_tx, alert_rx) = alert_event_channel();
        let (tx_tx, tx_rx) = tx_event_channel();
        let events = EventSenders::new(settlement_tx, alert_tx, tx_tx);
        let config = GatewayConfig {
            api_url: url::Url::parse("https://provider.invalid/v1").unwrap(),
            merchant_id: "merchant-1".into(),
            api_key: b"api-key".to_vec().into_boxed_slice(),
            callback_url: "https://game.invalid/webhook/crypto".into(),
            deposit_lifetime: GatewayConfig::DEFAULT_DEPOSIT_LIFETIME,
            max_pending_deposits: GatewayConfig::DEFAULT_MAX_PENDING_DEPOSITS,
            request_timeout: GatewayConfig::DEFAULT_REQUEST_TIMEOUT,
        };
        let gateway = CryptoGateway::new(
            config,
            CurrencyTable::default(),
            StubProvider::new(),
            ledger.clone(),
            store.clone(),
            addresses.clone(),
            events,
        );
        Fixture {
            gateway,
            ledger,
            store,
            addresses,
            _rx: (settlement_rx, alert_rx, tx_rx),
        }
    }

    const BTC_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    #[tokio::test]
    async fn withdrawal_debits_up_front_and_registers_pending() {
        let f = fixture();
        f.ledger.add_tokens(1, 5_000, Uuid::new_v4()).await;
        f.ledger
            .set_withdrawal_address(1, Currency::Btc, BTC_ADDR.into())
            .await;

        // 0.005 BTC * 1_000_000 tokens/BTC = 5_000 tokens.
        let receipt = f
            .gateway
            .initiate_withdrawal(1, Decimal::new(5, 3), Currency::Btc, Network::Bitcoin)
            .await
            .unwrap();

        assert_eq!(f.ledger.balance(1).await, 0);
        let tx = f.store.get(receipt.tx_id).await.unwrap();
        assert_eq!(tx.token_amount, Some(5_000));
        assert_eq!(tx.status, crate::entities::TxStatus::Pending);
        // 1% regular fee.
        assert_eq!(receipt.fee, Decimal::new(5, 3) * Decimal::new(1, 2));
        assert_eq!(receipt.amount + receipt.fee, Decimal::new(5, 3));
    }

    #[tokio::test]
    async fn failed_submission_reverses_the_debit() {
        let f = fixture();
        f.ledger.add_tokens(1, 5_000, Uuid::new_v4()).await;
        f.ledger
            .set_withdrawal_address(1, Currency::Btc, BTC_ADDR.into())
            .await;
        f.gateway
            .provider
            .fail_submissions
            .store(true, Ordering::SeqCst);

        let err = f
            .gateway
            .initiate_withdrawal(1, Decimal::new(5, 3), Currency::Btc, Network::Bitcoin)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Provider(_)));
        assert_eq!(f.ledger.balance(1).await, 5_000);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn validation_failures_touch_nothing() {
        let f = fixture();
        f.ledger.add_tokens(1, 5_000, Uuid::new_v4()).await;
        f.ledger
            .set_withdrawal_address(1, Currency::Btc, BTC_ADDR.into())
            .await;

        // Below minimum.
        let err = f
            .gateway
            .initiate_withdrawal(1, Decimal::new(1, 4), Currency::Btc, Network::Bitcoin)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BelowMinimumWithdrawal { .. }));

        // Wrong network for the currency.
        let err = f
            .gateway
            .initiate_withdrawal(1, Decimal::new(5, 3), Currency::Btc, Network::Tron)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedNetwork { .. }));

        assert_eq!(f.ledger.balance(1).await, 5_000);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn insufficient_balance_rejects_before_submission() {
        let f = fixture();
        f.ledger.add_tokens(1, 100, Uuid::new_v4()).await;
        f.ledger
            .set_withdrawal_address(1, Currency::Btc, BTC_ADDR.into())
            .await;

        let err = f
            .gateway
            .initiate_withdrawal(1, Decimal::new(5, 3), Currency::Btc, Network::Bitcoin)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Ledger(_)));
        assert_eq!(f.ledger.balance(1).await, 100);
    }

    #[tokio::test]
    async fn missing_withdrawal_address_rejects_before_debit() {
        let f = fixture();
        f.ledger.add_tokens(1, 5_000, Uuid::new_v4()).await;

        let err = f
            .gateway
            .initiate_withdrawal(1, Decimal::new(5, 3), Currency::Btc, Network::Bitcoin)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoWithdrawalAddress { .. }));
        assert_eq!(f.ledger.balance(1).await, 5_000);
    }

    #[tokio::test]
    async fn deposit_addresses_are_capped_per_user() {
        let f = fixture();
        for _ in 0..3 {
            f.gateway
                .generate_deposit_address(9, Currency::Btc, Network::Bitcoin)
                .await
                .unwrap();
        }
        assert_eq!(f.addresses.open_count(9).await, 3);

        let err = f
            .gateway
            .generate_deposit_address(9, Currency::Btc, Network::Bitcoin)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TooManyPendingDeposits));

        // Another user is unaffected.
        f.gateway
            .generate_deposit_address(10, Currency::Btc, Network::Bitcoin)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn withdrawal_address_registration_validates_pattern() {
        let f = fixture();
        let err = f
            .gateway
            .set_withdrawal_address(1, "not-an-address".into(), Currency::Btc, Network::Bitcoin)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAddress { .. }));

        f.gateway
            .set_withdrawal_address(1, BTC_ADDR.into(), Currency::Btc, Network::Bitcoin)
            .await
            .unwrap();
        assert_eq!(
            f.ledger.withdrawal_address(1, Currency::Btc).await.as_deref(),
            Some(BTC_ADDR)
        );
    }
}
