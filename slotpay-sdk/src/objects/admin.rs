//! Admin API DTOs.
//!
//! Read-only views consumed by the (external) dashboard. Authenticated
//! with the `Slotpay-Admin-Authorization` header.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Monitor statistics snapshot (`GET /admin/stats`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    pub pending_transactions: usize,
    pub network_stats: HashMap<String, NetworkStatsView>,
    pub failure_rates: HashMap<String, f64>,
    pub hourly_volume: HashMap<u8, HourlyVolumeView>,
}

/// Per-network counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStatsView {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub volume: Decimal,
}

/// Deposit/withdrawal volume for one hour of the day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourlyVolumeView {
    pub deposits: Decimal,
    pub withdrawals: Decimal,
}

/// One open deposit address (`GET /admin/deposit-addresses`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminDepositAddressView {
    pub uuid: Uuid,
    pub user_id: i64,
    pub currency: String,
    pub network: String,
    pub address: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Full transaction detail (`GET /admin/transactions/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminTransactionView {
    pub tx_id: Uuid,
    pub tx_type: String,
    pub user_id: i64,
    pub currency: String,
    pub network: String,
    pub amount: Decimal,
    pub token_amount: Option<i64>,
    pub address: String,
    pub status: String,
    pub created_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}
