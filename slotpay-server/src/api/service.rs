//! Service API handlers.
//!
//! Called by the (external) game/bot backend with signed bodies.
//!
//! # Endpoints
//!
//! - `POST /deposit-address`    – issue a deposit address
//! - `POST /withdrawals`        – initiate a withdrawal
//! - `POST /withdrawal-address` – register a withdrawal address
//! - `POST /accounts`           – balance + pending transactions

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use slotpay_core::entities::transaction::PendingTransaction;
use slotpay_core::entities::{Currency, Network};
use slotpay_core::gateway::GatewayError;
use slotpay_core::ledger::LedgerError;
use slotpay_sdk::objects::service::{
    AccountRequest, AccountResponse, DepositAddressRequest, DepositAddressResponse,
    PendingTransactionView, WithdrawalAddressRequest, WithdrawalRequest, WithdrawalResponse,
};

use crate::api::extractors::SignedBody;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deposit-address", post(create_deposit_address))
        .route("/withdrawals", post(create_withdrawal))
        .route("/withdrawal-address", post(set_withdrawal_address))
        .route("/accounts", post(get_account))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in Service API handlers.
#[derive(Debug)]
enum ServiceApiError {
    UnknownCurrency(String),
    UnknownNetwork(String),
    Gateway(GatewayError),
}

impl From<GatewayError> for ServiceApiError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

impl IntoResponse for ServiceApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ServiceApiError::UnknownCurrency(code) => {
                (StatusCode::BAD_REQUEST, format!("unknown currency {code:?}"))
            }
            ServiceApiError::UnknownNetwork(name) => {
                (StatusCode::BAD_REQUEST, format!("unknown network {name:?}"))
            }
            ServiceApiError::Gateway(err) => match err {
                GatewayError::Provider(e) => {
                    tracing::error!(error = %e, "provider call failed");
                    (StatusCode::BAD_GATEWAY, "payment provider unavailable".to_owned())
                }
                GatewayError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                    (StatusCode::CONFLICT, err.to_string())
                }
                GatewayError::TooManyPendingDeposits => {
                    (StatusCode::TOO_MANY_REQUESTS, err.to_string())
                }
                _ => (StatusCode::BAD_REQUEST, err.to_string()),
            },
        };
        (status, message).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn parse_pair(currency: &str, network: &str) -> Result<(Currency, Network), ServiceApiError> {
    let currency = Currency::parse(currency)
        .ok_or_else(|| ServiceApiError::UnknownCurrency(currency.to_owned()))?;
    let network = Network::parse(network)
        .ok_or_else(|| ServiceApiError::UnknownNetwork(network.to_owned()))?;
    Ok((currency, network))
}

async fn create_deposit_address(
    State(state): State<AppState>,
    SignedBody(req): SignedBody<DepositAddressRequest>,
) -> Result<impl IntoResponse, ServiceApiError> {
    let (currency, network) = parse_pair(&req.currency, &req.network)?;
    let grant = state
        .gateway
        .generate_deposit_address(req.user_id, currency, network)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DepositAddressResponse {
            address: grant.address,
            expires_at: grant.expires_at.unix_timestamp(),
            minimum_deposit: grant.minimum_deposit,
            currency: grant.currency.code().to_owned(),
            network: grant.network.name().to_owned(),
        }),
    ))
}

async fn create_withdrawal(
    State(state): State<AppState>,
    SignedBody(req): SignedBody<WithdrawalRequest>,
) -> Result<impl IntoResponse, ServiceApiError> {
    let (currency, network) = parse_pair(&req.currency, &req.network)?;
    let receipt = state
        .gateway
        .initiate_withdrawal(req.user_id, req.amount, currency, network)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(WithdrawalResponse {
            tx_id: receipt.tx_id,
            amount: receipt.amount,
            fee: receipt.fee,
            currency: receipt.currency.code().to_owned(),
            network: receipt.network.name().to_owned(),
        }),
    ))
}

async fn set_withdrawal_address(
    State(state): State<AppState>,
    SignedBody(req): SignedBody<WithdrawalAddressRequest>,
) -> Result<impl IntoResponse, ServiceApiError> {
    let (currency, network) = parse_pair(&req.currency, &req.network)?;
    state
        .gateway
        .set_withdrawal_address(req.user_id, req.address, currency, network)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_account(
    State(state): State<AppState>,
    SignedBody(req): SignedBody<AccountRequest>,
) -> Result<impl IntoResponse, ServiceApiError> {
    let balance = state.ledger.balance(req.user_id).await;
    let pending = state
        .store
        .list_for_user(req.user_id)
        .await
        .iter()
        .map(to_view)
        .collect();

    Ok(Json(AccountResponse {
        user_id: req.user_id,
        token_balance: balance,
        pending,
    }))
}

fn to_view(tx: &PendingTransaction) -> PendingTransactionView {
    PendingTransactionView {
        tx_id: tx.id,
        tx_type: tx.tx_type.to_string(),
        currency: tx.currency.code().to_owned(),
        network: tx.network.name().to_owned(),
        amount: tx.amount,
        status: tx.status.to_string(),
        created_at: tx.created_at.unix_timestamp(),
        retry_count: tx.retry_count,
    }
}
