//! Core configuration: currency tables and component settings.
//!
//! Secrets (provider API key, webhook secret) are injected by the
//! server's config loader from the environment — they are never part of
//! compiled defaults or the config file.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use url::Url;

use crate::entities::{Currency, Network};

/// Per-currency settings.
#[derive(Debug, Clone)]
pub struct CurrencySpec {
    /// Networks this currency settles on.
    pub networks: Vec<Network>,
    /// Tokens credited per provider-currency unit.
    pub conversion_rate: Decimal,
    pub minimum_deposit: Decimal,
    pub minimum_withdrawal: Decimal,
    /// Withdrawal fee rates, as fractions of the gross amount.
    pub fee_regular: Decimal,
    pub fee_vip: Decimal,
    /// Amounts at or above this raise a large-transaction alert.
    pub large_tx_threshold: Decimal,
}

/// The set of supported currencies and their settings.
#[derive(Debug, Clone)]
pub struct CurrencyTable {
    currencies: HashMap<Currency, CurrencySpec>,
}

impl CurrencyTable {
    pub fn new(currencies: HashMap<Currency, CurrencySpec>) -> Self {
        Self { currencies }
    }

    pub fn spec(&self, currency: Currency) -> Option<&CurrencySpec> {
        self.currencies.get(&currency)
    }

    /// Is `network` a valid settlement network for `currency`?
    pub fn supports(&self, currency: Currency, network: Network) -> bool {
        self.spec(currency)
            .is_some_and(|spec| spec.networks.contains(&network))
    }

    /// Convert a provider-currency amount into whole tokens:
    /// `floor(amount * conversion_rate)`.
    ///
    /// Returns `None` for an unknown currency or an amount that does not
    /// fit a ledger integer.
    pub fn token_amount(&self, currency: Currency, amount: Decimal) -> Option<i64> {
        let spec = self.spec(currency)?;
        (amount * spec.conversion_rate).floor().to_i64()
    }
}

impl Default for CurrencyTable {
    /// The built-in table. Values are overridable via server config.
    fn default() -> Self {
        let mut currencies = HashMap::new();
        currencies.insert(
            Currency::Btc,
            CurrencySpec {
                networks: vec![Network::Bitcoin, Network::Lightning],
                conversion_rate: Decimal::from(1_000_000u64),
                minimum_deposit: Decimal::new(1, 4),
                minimum_withdrawal: Decimal::new(5, 4),
                fee_regular: Decimal::new(1, 2),
                fee_vip: Decimal::new(5, 3),
                large_tx_threshold: Decimal::ONE,
            },
        );
        currencies.insert(
            Currency::Eth,
            CurrencySpec {
                networks: vec![Network::Ethereum, Network::Arbitrum, Network::Optimism],
                conversion_rate: Decimal::from(10_000u64),
                minimum_deposit: Decimal::new(1, 2),
                minimum_withdrawal: Decimal::new(5, 2),
                fee_regular: Decimal::new(1, 2),
                fee_vip: Decimal::new(5, 3),
                large_tx_threshold: Decimal::from(10u64),
            },
        );
        currencies.insert(
            Currency::Usdt,
            CurrencySpec {
                networks: vec![Network::Ethereum, Network::Tron, Network::Bsc],
                conversion_rate: Decimal::ONE,
                minimum_deposit: Decimal::from(10u64),
                minimum_withdrawal: Decimal::from(20u64),
                fee_regular: Decimal::new(1, 2),
                fee_vip: Decimal::new(5, 3),
                large_tx_threshold: Decimal::from(10_000u64),
            },
        );
        currencies.insert(
            Currency::Usdc,
            CurrencySpec {
                networks: vec![Network::Ethereum, Network::Polygon, Network::Solana],
                conversion_rate: Decimal::ONE,
                minimum_deposit: Decimal::from(10u64),
                minimum_withdrawal: Decimal::from(20u64),
                fee_regular: Decimal::new(1, 2),
                fee_vip: Decimal::new(5, 3),
                large_tx_threshold: Decimal::from(10_000u64),
            },
        );
        currencies.insert(
            Currency::Matic,
            CurrencySpec {
                networks: vec![Network::Polygon, Network::Ethereum],
                conversion_rate: Decimal::ONE,
                minimum_deposit: Decimal::from(10u64),
                minimum_withdrawal: Decimal::from(20u64),
                fee_regular: Decimal::new(1, 2),
                fee_vip: Decimal::new(5, 3),
                large_tx_threshold: Decimal::from(10_000u64),
            },
        );
        Self { currencies }
    }
}

/// CryptoGateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Provider API base URL.
    pub api_url: Url,
    pub merchant_id: String,
    /// Signing key for outbound provider calls.
    pub api_key: Box<[u8]>,
    /// Callback URL handed to the provider on address issuance.
    pub callback_url: String,
    /// How long an issued deposit address stays watchable.
    pub deposit_lifetime: time::Duration,
    /// Cap on a user's simultaneously open deposit addresses.
    pub max_pending_deposits: usize,
    /// Bound on every provider HTTP call.
    pub request_timeout: std::time::Duration,
}

impl GatewayConfig {
    pub const DEFAULT_DEPOSIT_LIFETIME: time::Duration = time::Duration::hours(24);
    pub const DEFAULT_MAX_PENDING_DEPOSITS: usize = 3;
    pub const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
}

/// WebhookProcessor settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared secret the provider signs callbacks with.
    pub webhook_secret: Box<[u8]>,
    /// Source allowlist; empty means no IP restriction.
    pub allowed_ips: Vec<std::net::IpAddr>,
    /// Processing (not authenticity) retry attempts.
    pub retry_attempts: u32,
    pub retry_delay: std::time::Duration,
    /// Window during which a second delivery of the same id is refused.
    pub max_processing_time: std::time::Duration,
}

impl WebhookConfig {
    pub fn new(webhook_secret: Box<[u8]>) -> Self {
        Self {
            webhook_secret,
            allowed_ips: Vec::new(),
            retry_attempts: 3,
            retry_delay: std::time::Duration::from_secs(5),
            max_processing_time: std::time::Duration::from_secs(30),
        }
    }
}

/// TransactionMonitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the monitor scans for stale entries.
    pub check_interval: std::time::Duration,
    /// Age past which a pending transaction is considered stuck.
    pub pending_sla: time::Duration,
    /// Withdrawal re-poll budget once past the SLA.
    pub max_retries: u32,
    /// Per-network failure rate that raises an alert.
    pub failure_rate_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: std::time::Duration::from_secs(5 * 60),
            pending_sla: time::Duration::hours(2),
            max_retries: 3,
            failure_rate_threshold: 0.1,
        }
    }
}
