//! Configuration loading for slotpay-server.
//!
//! Layers, in order: the TOML file, CLI overrides, then secrets from
//! the environment. A plaintext admin secret is hashed with argon2 and
//! the file rewritten so the plaintext never persists.

pub mod file;
pub mod runtime;

use crate::config::file::{CurrencySection, FileConfig};
use crate::config::runtime::{AdminConfig, RuntimeConfig};
use slotpay_core::config::{CurrencySpec, CurrencyTable, GatewayConfig, MonitorConfig, WebhookConfig};
use slotpay_core::entities::{Currency, Network};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Environment variable holding the provider API signing key.
pub const ENV_PROVIDER_API_KEY: &str = "SLOTPAY_PROVIDER_API_KEY";
/// Environment variable holding the webhook shared secret.
pub const ENV_WEBHOOK_SECRET: &str = "SLOTPAY_WEBHOOK_SECRET";
/// Environment variable holding the Service API signing key.
pub const ENV_SERVICE_SECRET: &str = "SLOTPAY_SERVICE_SECRET";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("password hashing error: {0}")]
    Hash(String),

    #[error("{0} environment variable not set")]
    MissingSecret(&'static str),
}

/// Loads and processes the configuration.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// 1. Read and parse the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate currency overrides
    /// 4. Hash the admin secret if it is plaintext (and rewrite the file)
    /// 5. Resolve secrets from the environment
    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        let currencies = build_currency_table(&file_config.currencies)?;

        let secret_hash = if file_config.is_admin_secret_hashed() {
            file_config.admin.secret.clone()
        } else {
            let hash = self.hash_secret(&file_config.admin.secret)?;
            file_config.admin.secret = hash.clone();
            self.rewrite_config(&file_config)?;
            tracing::info!("admin secret hashed and config file updated");
            hash
        };

        let api_key = read_secret(ENV_PROVIDER_API_KEY)?;
        let webhook_secret = read_secret(ENV_WEBHOOK_SECRET)?;
        let service_secret = read_secret(ENV_SERVICE_SECRET)?;

        let gateway = GatewayConfig {
            api_url: file_config.provider.api_url.clone(),
            merchant_id: file_config.provider.merchant_id.clone(),
            api_key,
            callback_url: file_config.provider.callback_url.clone(),
            deposit_lifetime: time::Duration::hours(file_config.deposits.lifetime_hours),
            max_pending_deposits: file_config.deposits.max_pending,
            request_timeout: std::time::Duration::from_secs(
                file_config.provider.request_timeout_secs,
            ),
        };

        let webhook = WebhookConfig {
            webhook_secret,
            allowed_ips: file_config.webhook.allowed_ips.clone(),
            retry_attempts: file_config.webhook.retry_attempts,
            retry_delay: std::time::Duration::from_secs(file_config.webhook.retry_delay_secs),
            max_processing_time: std::time::Duration::from_secs(
                file_config.webhook.max_processing_secs,
            ),
        };

        let monitor = MonitorConfig {
            check_interval: std::time::Duration::from_secs(file_config.monitor.check_interval_secs),
            pending_sla: time::Duration::minutes(file_config.monitor.pending_sla_minutes),
            max_retries: file_config.monitor.max_retries,
            failure_rate_threshold: file_config.monitor.failure_rate_threshold,
        };

        Ok(RuntimeConfig {
            listen: file_config.server.listen,
            admin: AdminConfig::new(secret_hash),
            service_secret,
            gateway,
            webhook,
            monitor,
            currencies,
        })
    }

    fn hash_secret(&self, plaintext: &str) -> Result<String, ConfigError> {
        use argon2::{
            Argon2, PasswordHasher,
            password_hash::{SaltString, rand_core::OsRng},
        };

        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ConfigError::Hash(e.to_string()))
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: temp file, then rename.
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

fn read_secret(name: &'static str) -> Result<Box<[u8]>, ConfigError> {
    std::env::var(name)
        .map(|v| v.into_bytes().into_boxed_slice())
        .map_err(|_| ConfigError::MissingSecret(name))
}

/// Apply `[currencies.*]` overrides on top of the built-in table.
fn build_currency_table(
    overrides: &HashMap<String, CurrencySection>,
) -> Result<CurrencyTable, ConfigError> {
    let mut table: HashMap<Currency, CurrencySpec> = defaults_as_map();

    for (code, section) in overrides {
        let currency = Currency::parse(code)
            .ok_or_else(|| ConfigError::Validation(format!("unknown currency {code:?}")))?;
        if section.networks.is_empty() {
            return Err(ConfigError::Validation(format!(
                "currency {code} has no networks"
            )));
        }
        let networks = section
            .networks
            .iter()
            .map(|n| {
                Network::parse(n).ok_or_else(|| {
                    ConfigError::Validation(format!("unknown network {n:?} for {code}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        table.insert(
            currency,
            CurrencySpec {
                networks,
                conversion_rate: section.conversion_rate,
                minimum_deposit: section.minimum_deposit,
                minimum_withdrawal: section.minimum_withdrawal,
                fee_regular: section.fee_regular,
                fee_vip: section.fee_vip,
                large_tx_threshold: section.large_tx_threshold,
            },
        );
    }

    Ok(CurrencyTable::new(table))
}

fn defaults_as_map() -> HashMap<Currency, CurrencySpec> {
    let table = CurrencyTable::default();
    [
        Currency::Btc,
        Currency::Eth,
        Currency::Usdt,
        Currency::Usdc,
        Currency::Matic,
    ]
    .into_iter()
    .filter_map(|c| table.spec(c).map(|s| (c, s.clone())))
    .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn currency_overrides_replace_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "BTC".to_owned(),
            CurrencySection {
                networks: vec!["bitcoin".to_owned()],
                conversion_rate: Decimal::from(2_000_000u64),
                minimum_deposit: Decimal::new(2, 4),
                minimum_withdrawal: Decimal::new(1, 3),
                fee_regular: Decimal::new(1, 2),
                fee_vip: Decimal::new(5, 3),
                large_tx_threshold: Decimal::from(2u64),
            },
        );

        let table = build_currency_table(&overrides).unwrap();
        assert_eq!(
            table.token_amount(Currency::Btc, Decimal::new(1, 2)),
            Some(20_000)
        );
        // Lightning was dropped by the override.
        assert!(!table.supports(Currency::Btc, Network::Lightning));
        // Untouched currencies keep their defaults.
        assert!(table.supports(Currency::Usdt, Network::Tron));
    }

    #[test]
    fn unknown_currency_or_network_is_rejected() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "DOGE".to_owned(),
            CurrencySection {
                networks: vec!["bitcoin".to_owned()],
                conversion_rate: Decimal::ONE,
                minimum_deposit: Decimal::ONE,
                minimum_withdrawal: Decimal::ONE,
                fee_regular: Decimal::new(1, 2),
                fee_vip: Decimal::new(5, 3),
                large_tx_threshold: Decimal::ONE,
            },
        );
        assert!(matches!(
            build_currency_table(&overrides),
            Err(ConfigError::Validation(_))
        ));
    }
}
