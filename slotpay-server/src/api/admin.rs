//! Admin API handlers.
//!
//! Read-only views for the (external) dashboard, authenticated with the
//! `Slotpay-Admin-Authorization` header.
//!
//! # Endpoints
//!
//! - `GET /stats`             – monitor statistics snapshot
//! - `GET /transactions`      – list pending transactions
//! - `GET /transactions/{id}` – transaction detail
//! - `GET /deposit-addresses` – list open deposit addresses

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use slotpay_core::entities::transaction::PendingTransaction;
use slotpay_sdk::objects::admin::{
    AdminDepositAddressView, AdminTransactionView, HourlyVolumeView, NetworkStatsView,
    StatsResponse,
};
use uuid::Uuid;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/transactions", get(list_transactions))
        .route("/transactions/{tx_id}", get(transaction_detail))
        .route("/deposit-addresses", get(list_deposit_addresses))
}

async fn stats(State(state): State<AppState>, _auth: AdminAuth) -> impl IntoResponse {
    let pending = state.store.len().await;
    let snapshot = state.stats.read().await.clone();

    let network_stats = snapshot
        .network_stats
        .iter()
        .map(|(network, s)| {
            (
                network.name().to_owned(),
                NetworkStatsView {
                    total: s.total,
                    successful: s.successful,
                    failed: s.failed,
                    volume: s.volume,
                },
            )
        })
        .collect();
    let failure_rates = snapshot
        .failure_rates()
        .into_iter()
        .map(|(network, rate)| (network.name().to_owned(), rate))
        .collect();
    let hourly_volume = snapshot
        .hourly_volume
        .iter()
        .map(|(hour, v)| {
            (
                *hour,
                HourlyVolumeView {
                    deposits: v.deposits,
                    withdrawals: v.withdrawals,
                },
            )
        })
        .collect();

    Json(StatsResponse {
        total_transactions: snapshot.total_transactions,
        successful_transactions: snapshot.successful_transactions,
        failed_transactions: snapshot.failed_transactions,
        pending_transactions: pending,
        network_stats,
        failure_rates,
        hourly_volume,
    })
}

async fn list_transactions(State(state): State<AppState>, _auth: AdminAuth) -> impl IntoResponse {
    let views: Vec<AdminTransactionView> =
        state.store.snapshot().await.iter().map(to_view).collect();
    Json(views)
}

async fn transaction_detail(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(tx_id): Path<Uuid>,
) -> Result<Json<AdminTransactionView>, StatusCode> {
    state
        .store
        .get(tx_id)
        .await
        .map(|tx| Json(to_view(&tx)))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_deposit_addresses(
    State(state): State<AppState>,
    _auth: AdminAuth,
) -> impl IntoResponse {
    let views: Vec<AdminDepositAddressView> = state
        .addresses
        .snapshot()
        .await
        .iter()
        .map(|a| AdminDepositAddressView {
            uuid: a.uuid,
            user_id: a.user_id,
            currency: a.currency.code().to_owned(),
            network: a.network.name().to_owned(),
            address: a.address.clone(),
            created_at: a.created_at.unix_timestamp(),
            expires_at: a.expires_at.unix_timestamp(),
        })
        .collect();
    Json(views)
}

fn to_view(tx: &PendingTransaction) -> AdminTransactionView {
    AdminTransactionView {
        tx_id: tx.id,
        tx_type: tx.tx_type.to_string(),
        user_id: tx.user_id,
        currency: tx.currency.code().to_owned(),
        network: tx.network.name().to_owned(),
        amount: tx.amount,
        token_amount: tx.token_amount,
        address: tx.address.clone(),
        status: tx.status.to_string(),
        created_at: tx.created_at.unix_timestamp(),
        retry_count: tx.retry_count,
        last_error: tx.last_error.clone(),
    }
}
