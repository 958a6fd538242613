//! TOML config file schema.
//!
//! The file carries everything *except* secrets — those come from the
//! environment (`SLOTPAY_PROVIDER_API_KEY`, `SLOTPAY_WEBHOOK_SECRET`,
//! `SLOTPAY_SERVICE_SECRET`). The admin secret is the one exception:
//! it lives in the file but is argon2-hashed in place on first load.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerSection,
    pub provider: ProviderSection,
    pub admin: AdminSection,
    #[serde(default)]
    pub webhook: WebhookSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub deposits: DepositSection,
    /// Per-currency overrides of the built-in table, keyed by currency
    /// code (`[currencies.BTC]`).
    #[serde(default)]
    pub currencies: HashMap<String, CurrencySection>,
}

impl FileConfig {
    pub fn is_admin_secret_hashed(&self) -> bool {
        self.admin.secret.starts_with("$argon2")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    pub api_url: Url,
    pub merchant_id: String,
    /// Public URL the provider posts callbacks to.
    pub callback_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSection {
    /// Plaintext on first write; replaced by its argon2 hash on load.
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub allowed_ips: Vec<IpAddr>,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub max_processing_secs: u64,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            retry_attempts: 3,
            retry_delay_secs: 5,
            max_processing_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub check_interval_secs: u64,
    pub pending_sla_minutes: i64,
    pub max_retries: u32,
    pub failure_rate_threshold: f64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 5 * 60,
            pending_sla_minutes: 2 * 60,
            max_retries: 3,
            failure_rate_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepositSection {
    pub max_pending: usize,
    pub lifetime_hours: i64,
}

impl Default for DepositSection {
    fn default() -> Self {
        Self {
            max_pending: 3,
            lifetime_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencySection {
    pub networks: Vec<String>,
    pub conversion_rate: Decimal,
    pub minimum_deposit: Decimal,
    pub minimum_withdrawal: Decimal,
    #[serde(default = "default_fee_regular")]
    pub fee_regular: Decimal,
    #[serde(default = "default_fee_vip")]
    pub fee_vip: Decimal,
    pub large_tx_threshold: Decimal,
}

fn default_fee_regular() -> Decimal {
    Decimal::new(1, 2)
}

fn default_fee_vip() -> Decimal {
    Decimal::new(5, 3)
}
