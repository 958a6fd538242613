//! Service API DTOs.
//!
//! The game/bot backend talks to these endpoints with signed bodies
//! (see [`crate::signature`]); responses are plain JSON.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Signed;

/// `POST /service/deposit-address`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddressRequest {
    pub user_id: i64,
    pub currency: String,
    pub network: String,
}

impl Signed for DepositAddressRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddressResponse {
    pub address: String,
    /// Unix timestamp after which the address is no longer watched.
    pub expires_at: i64,
    pub minimum_deposit: Decimal,
    pub currency: String,
    pub network: String,
}

/// `POST /service/withdrawals`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub network: String,
}

impl Signed for WithdrawalRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub tx_id: Uuid,
    /// Net amount submitted to the provider (gross minus fee).
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub network: String,
}

/// `POST /service/withdrawal-address`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalAddressRequest {
    pub user_id: i64,
    pub address: String,
    pub currency: String,
    pub network: String,
}

impl Signed for WithdrawalAddressRequest {}

/// `POST /service/accounts` — balance and pending transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRequest {
    pub user_id: i64,
}

impl Signed for AccountRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub user_id: i64,
    pub token_balance: i64,
    pub pending: Vec<PendingTransactionView>,
}

/// One in-flight transaction, as shown to integrators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransactionView {
    pub tx_id: Uuid,
    pub tx_type: String,
    pub currency: String,
    pub network: String,
    pub amount: Decimal,
    pub status: String,
    pub created_at: i64,
    pub retry_count: u32,
}
