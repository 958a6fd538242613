//! Provider webhook endpoint.
//!
//! `POST /webhook/crypto`. Responds `200 {success:true}` once
//! authenticity passes — including in-window duplicates and payloads
//! queued for manual handling after retry exhaustion — per the
//! provider's redelivery convention. Authenticity and parse failures
//! get a non-2xx with an error body.

use axum::{
    Json, Router,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use slotpay_core::processors::WebhookError;
use slotpay_sdk::signature::SIGNATURE_HEADER;
use std::net::SocketAddr;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/crypto", post(receive))
}

#[derive(Serialize)]
struct WebhookAck {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ack() -> Response {
    (
        StatusCode::OK,
        Json(WebhookAck {
            success: true,
            error: None,
        }),
    )
        .into_response()
}

fn reject(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(WebhookAck {
            success: false,
            error: Some(error),
        }),
    )
        .into_response()
}

async fn receive(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return reject(
            StatusCode::UNAUTHORIZED,
            "missing Slotpay-Signature header".to_owned(),
        );
    };

    match state.webhooks.handle(&body, signature, peer.ip()).await {
        Ok(_) => ack(),
        Err(e) if e.acknowledge() => ack(),
        Err(e @ (WebhookError::Authentication(_) | WebhookError::DisallowedSource(_))) => {
            reject(StatusCode::UNAUTHORIZED, e.to_string())
        }
        Err(e) => reject(StatusCode::BAD_REQUEST, e.to_string()),
    }
}
