//! Runtime configuration assembled by the loader.

use slotpay_core::config::{CurrencyTable, GatewayConfig, MonitorConfig, WebhookConfig};
use std::net::SocketAddr;

/// Everything the server needs at runtime, secrets resolved.
pub struct RuntimeConfig {
    pub listen: SocketAddr,
    pub admin: AdminConfig,
    /// Signing key for the Service API.
    pub service_secret: Box<[u8]>,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
    pub monitor: MonitorConfig,
    pub currencies: CurrencyTable,
}

/// Admin API authentication: an argon2 hash of the admin secret.
pub struct AdminConfig {
    secret_hash: String,
}

impl AdminConfig {
    pub fn new(secret_hash: String) -> Self {
        Self { secret_hash }
    }

    /// Verify a presented plaintext secret against the stored hash.
    pub fn verify(&self, presented: &str) -> bool {
        use argon2::{Argon2, PasswordHash, PasswordVerifier};

        let Ok(parsed) = PasswordHash::new(&self.secret_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(presented.as_bytes(), &parsed)
            .is_ok()
    }
}
