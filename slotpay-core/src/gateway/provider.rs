//! The external payment provider API.
//!
//! [`ProviderApi`] is the seam between the gateway and the provider's
//! HTTP surface; [`ProviderClient`] is the production implementation.
//! Every call is signed with the merchant API key and runs under the
//! configured timeout — a timeout surfaces as a retryable
//! [`ProviderError`], never as a hang.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use slotpay_sdk::objects::provider::{
    CreatePaymentRequest, CreateWithdrawalRequest, NetworkFee, PaymentCreated, ProviderEnvelope,
    TransactionStatus, WithdrawalCreated,
};
use slotpay_sdk::signature::{self, SIGNATURE_HEADER, Signed, SignedJson};

use crate::config::GatewayConfig;
use crate::entities::Network;

/// Provider-boundary failures. All variants are retryable at the
/// boundary that made the call; none are retried blindly elsewhere.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,
    #[error("provider transport error: {0}")]
    Transport(reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider rejected request: {message}")]
    Rejected { message: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(err)
        }
    }
}

/// Operations the system needs from the payment provider.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Request a deposit address (`POST /payment`).
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, ProviderError>;

    /// Submit a withdrawal (`POST /withdrawal`).
    async fn create_withdrawal(
        &self,
        request: CreateWithdrawalRequest,
    ) -> Result<WithdrawalCreated, ProviderError>;

    /// Read-only status query (`GET /payment/status/{uuid}`).
    async fn transaction_status(&self, tx_id: Uuid) -> Result<TransactionStatus, ProviderError>;

    /// Current network fee (`GET /network-fees/{network}`).
    async fn network_fee(&self, network: Network) -> Result<NetworkFee, ProviderError>;
}

/// Signed reqwest client for the provider REST API.
pub struct ProviderClient {
    api_url: Url,
    merchant_id: String,
    api_key: Box<[u8]>,
    http: reqwest::Client,
}

impl ProviderClient {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            merchant_id: config.merchant_id.clone(),
            api_key: config.api_key.clone(),
            http: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        let base = self.api_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| ProviderError::Malformed(format!("bad endpoint {path}: {e}")))
    }

    async fn post_signed<B, T>(&self, path: &str, body: B) -> Result<T, ProviderError>
    where
        B: Signed + Send,
        T: DeserializeOwned,
    {
        let sealed =
            SignedJson::seal(body, &self.api_key).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let response = self
            .http
            .post(self.endpoint(path)?)
            .header("merchant", &self.merchant_id)
            .header(SIGNATURE_HEADER, sealed.header_value())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(sealed.json)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_signed<T>(&self, path: &str) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        // GETs sign the full URL instead of a body.
        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
        let sig = signature::sign_payload(url.as_str(), timestamp, &self.api_key);
        let response = self
            .http
            .get(url)
            .header("merchant", &self.merchant_id)
            .header(SIGNATURE_HEADER, signature::format_header(timestamp, &sig))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: ProviderEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        if !envelope.is_success() {
            return Err(ProviderError::Rejected {
                message: envelope.status,
            });
        }
        Ok(envelope.result)
    }
}

#[async_trait]
impl ProviderApi for ProviderClient {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, ProviderError> {
        self.post_signed("payment", request).await
    }

    async fn create_withdrawal(
        &self,
        request: CreateWithdrawalRequest,
    ) -> Result<WithdrawalCreated, ProviderError> {
        self.post_signed("withdrawal", request).await
    }

    async fn transaction_status(&self, tx_id: Uuid) -> Result<TransactionStatus, ProviderError> {
        self.get_signed(&format!("payment/status/{tx_id}")).await
    }

    async fn network_fee(&self, network: Network) -> Result<NetworkFee, ProviderError> {
        self.get_signed(&format!("network-fees/{network}")).await
    }
}
