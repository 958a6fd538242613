//! Outbound provider API objects.
//!
//! The provider wraps every response in a `{status, result}` envelope;
//! anything other than `status == "success"` is treated as a provider
//! error by the gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Signed;

/// Provider response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEnvelope<T> {
    pub status: String,
    pub result: T,
}

impl<T> ProviderEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// `POST /payment` — request a deposit address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub currency: String,
    pub network: String,
    pub order_id: String,
    pub url_callback: String,
    pub is_payment_multiple: bool,
    /// Address lifetime in seconds.
    pub lifetime: i64,
    pub minimum_amount: Decimal,
}

impl Signed for CreatePaymentRequest {}

/// Result of a successful `POST /payment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub uuid: Uuid,
    pub address: String,
}

/// `POST /withdrawal` — submit a withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub currency: String,
    pub network: String,
    pub amount: Decimal,
    pub address: String,
    pub order_id: String,
    pub is_subtract_fee_from_amount: bool,
}

impl Signed for CreateWithdrawalRequest {}

/// Result of a successful `POST /withdrawal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalCreated {
    pub uuid: Uuid,
}

/// Result of `GET /payment/status/{uuid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub uuid: Uuid,
    pub status: String,
    /// Settled amount, present once the provider has observed one.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Result of `GET /network-fees/{network}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFee {
    pub network: String,
    pub fee: Decimal,
}
