//! Webhook ingestion pipeline.
//!
//! Provider callbacks pass through, in order, each step short-circuiting
//! on failure:
//!
//! 1. signature verification over the raw body
//! 2. source IP allowlist (when configured)
//! 3. payload parsing and `(type, status)` routing validation
//! 4. an in-flight dedup window per transaction id
//! 5. settlement, with a bounded fixed-delay retry
//!
//! The dedup window only fails fast; the store's compare-and-set and
//! the ledger's processed-id check are what actually guarantee
//! at-most-once settlement.

use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use slotpay_sdk::objects::webhook::{CallbackKind, MalformedOrderId, OrderKind, ProviderCallback};
use slotpay_sdk::signature::{self, SignatureError};

use crate::config::WebhookConfig;
use crate::entities::{Currency, Network, TxStatus};
use crate::events::{AlertEvent, EventSenders};

use super::settlement::{CreditNotice, SettleError, SettlementEngine, SettlementOutcome};

/// Webhook pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Bad signature. Logged as a security event; never retried.
    #[error("webhook authentication failed: {0}")]
    Authentication(#[source] SignatureError),
    /// Source IP outside the configured allowlist.
    #[error("webhook source {0} is not allowed")]
    DisallowedSource(IpAddr),
    /// Malformed or unsupported payload. Never retried.
    #[error("invalid webhook payload: {0}")]
    Validation(#[from] ValidationError),
    /// Another delivery of this id is inside the processing window.
    /// Idempotent no-op; safe to acknowledge to the provider.
    #[error("transaction {0} is already being processed")]
    InFlight(Uuid),
    /// Processing kept failing; the payload has been surfaced on the
    /// alert channel rather than dropped.
    #[error("webhook processing failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: SettleError,
    },
}

impl WebhookError {
    /// Whether the provider should still receive a 2xx acknowledgement.
    /// Duplicates and queued-for-manual-handling payloads are
    /// acknowledged to avoid redelivery storms.
    pub fn acknowledge(&self) -> bool {
        matches!(
            self,
            WebhookError::InFlight(_) | WebhookError::Exhausted { .. }
        )
    }
}

/// Payload-level rejections.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    OrderId(#[from] MalformedOrderId),
    #[error("order_id kind {order} does not match callback type {callback}")]
    KindMismatch {
        order: &'static str,
        callback: CallbackKind,
    },
    #[error("unknown currency {0:?}")]
    UnknownCurrency(String),
    #[error("unknown network {0:?}")]
    UnknownNetwork(String),
    #[error("negative amount")]
    NegativeAmount,
    #[error("unsupported combination: {kind} + {status:?}")]
    Unsupported { kind: CallbackKind, status: String },
}

/// What a `(type, status)` pair means for settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleAction {
    CreditDeposit,
    NoteDepositPending,
    ExpireDeposit,
    FailDeposit,
    CompleteWithdrawal,
    RefundWithdrawal,
    CreditRefund,
}

fn route(kind: CallbackKind, status: &str) -> Result<SettleAction, ValidationError> {
    match (kind, status) {
        (CallbackKind::Payment, "paid") => Ok(SettleAction::CreditDeposit),
        (CallbackKind::Payment, "pending") => Ok(SettleAction::NoteDepositPending),
        (CallbackKind::Payment, "expired") => Ok(SettleAction::ExpireDeposit),
        (CallbackKind::Payment, "failed") => Ok(SettleAction::FailDeposit),
        (CallbackKind::Withdrawal, "completed") => Ok(SettleAction::CompleteWithdrawal),
        (CallbackKind::Withdrawal, "failed") => Ok(SettleAction::RefundWithdrawal),
        (CallbackKind::Refund, "completed") => Ok(SettleAction::CreditRefund),
        _ => Err(ValidationError::Unsupported {
            kind,
            status: status.to_owned(),
        }),
    }
}

/// A callback that passed authenticity and validation.
#[derive(Debug, Clone)]
pub struct VerifiedCallback {
    tx_id: Uuid,
    user_id: i64,
    action: SettleAction,
    currency: Currency,
    network: Network,
    amount: Decimal,
    address: String,
    /// The raw body, carried for the stalled-payload alert.
    raw: String,
}

impl VerifiedCallback {
    fn notice(&self) -> CreditNotice {
        CreditNotice {
            tx_id: self.tx_id,
            user_id: self.user_id,
            currency: self.currency,
            network: self.network,
            amount: self.amount,
            address: self.address.clone(),
        }
    }
}

/// Entry point for provider callbacks.
pub struct WebhookProcessor {
    config: WebhookConfig,
    engine: SettlementEngine,
    events: EventSenders,
    in_flight: Mutex<HashMap<Uuid, Instant>>,
}

impl WebhookProcessor {
    pub fn new(config: WebhookConfig, engine: SettlementEngine, events: EventSenders) -> Self {
        Self {
            config,
            engine,
            events,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run the full pipeline on one delivery.
    pub async fn handle(
        &self,
        body: &str,
        signature_header: &str,
        source: IpAddr,
    ) -> Result<SettlementOutcome, WebhookError> {
        // 1. Authenticity — recompute the HMAC over the raw body.
        let (timestamp, sig) = signature::parse_header(signature_header).map_err(|e| {
            tracing::warn!(%source, error = %e, "webhook rejected: bad signature header");
            WebhookError::Authentication(e)
        })?;
        if let Err(e) =
            signature::verify_payload(body, timestamp, &sig, &self.config.webhook_secret)
        {
            tracing::warn!(%source, error = %e, "webhook rejected: signature verification failed");
            return Err(WebhookError::Authentication(e));
        }

        // 2. Origin.
        if !self.config.allowed_ips.is_empty() && !self.config.allowed_ips.contains(&source) {
            tracing::warn!(%source, "webhook rejected: source not in allowlist");
            return Err(WebhookError::DisallowedSource(source));
        }

        // 3. Parse and validate before any lookup.
        let verified = self.parse(body)?;

        // 4. Dedup window.
        {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(started) = in_flight.get(&verified.tx_id)
                && started.elapsed() < self.config.max_processing_time
            {
                tracing::debug!(uuid = %verified.tx_id, "duplicate delivery inside processing window");
                return Err(WebhookError::InFlight(verified.tx_id));
            }
            in_flight.insert(verified.tx_id, Instant::now());
        }

        // 5. Settle, retrying the processing (never the authenticity).
        let result = self.process_with_retry(&verified).await;
        self.in_flight.lock().await.remove(&verified.tx_id);
        result
    }

    fn parse(&self, body: &str) -> Result<VerifiedCallback, ValidationError> {
        let callback: ProviderCallback = serde_json::from_str(body)?;
        let order = slotpay_sdk::objects::webhook::OrderRef::parse(&callback.order_id)?;

        let expected = match callback.kind {
            CallbackKind::Payment => OrderKind::Deposit,
            CallbackKind::Withdrawal => OrderKind::Withdrawal,
            CallbackKind::Refund => OrderKind::Refund,
        };
        if order.kind != expected {
            return Err(ValidationError::KindMismatch {
                order: order.kind.as_str(),
                callback: callback.kind,
            });
        }

        let currency = Currency::parse(&callback.currency)
            .ok_or_else(|| ValidationError::UnknownCurrency(callback.currency.clone()))?;
        let network = Network::parse(&callback.network)
            .ok_or_else(|| ValidationError::UnknownNetwork(callback.network.clone()))?;
        if callback.amount < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount);
        }
        let action = route(callback.kind, &callback.status)?;

        Ok(VerifiedCallback {
            tx_id: callback.uuid,
            user_id: order.user_id,
            action,
            currency,
            network,
            amount: callback.amount,
            address: callback.address,
            raw: body.to_owned(),
        })
    }

    async fn process_with_retry(
        &self,
        verified: &VerifiedCallback,
    ) -> Result<SettlementOutcome, WebhookError> {
        let mut attempt = 1u32;
        loop {
            match self.process(verified.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.config.retry_attempts => {
                    tracing::warn!(
                        uuid = %verified.tx_id,
                        attempt,
                        error = %e,
                        "webhook processing failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        uuid = %verified.tx_id,
                        attempts = attempt,
                        error = %e,
                        "webhook processing exhausted retries, surfacing payload"
                    );
                    self.events
                        .emit_alert(AlertEvent::WebhookStalled {
                            tx_id: verified.tx_id,
                            payload: verified.raw.clone(),
                            error: e.to_string(),
                        })
                        .await;
                    return Err(WebhookError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

impl Processor<VerifiedCallback> for WebhookProcessor {
    type Output = SettlementOutcome;
    type Error = SettleError;

    async fn process(&self, callback: VerifiedCallback) -> Result<SettlementOutcome, SettleError> {
        match callback.action {
            SettleAction::CreditDeposit => self.engine.credit_deposit(&callback.notice()).await,
            SettleAction::NoteDepositPending => {
                Ok(self.engine.note_deposit_pending(&callback.notice()).await)
            }
            SettleAction::ExpireDeposit => {
                Ok(self.engine.close_deposit(callback.tx_id, TxStatus::Expired).await)
            }
            SettleAction::FailDeposit => {
                Ok(self.engine.close_deposit(callback.tx_id, TxStatus::Failed).await)
            }
            SettleAction::CompleteWithdrawal => {
                Ok(self.engine.complete_withdrawal(callback.tx_id).await)
            }
            SettleAction::RefundWithdrawal => self.engine.refund_withdrawal(callback.tx_id).await,
            SettleAction::CreditRefund => self.engine.credit_refund(&callback.notice()).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::{TxType, transaction::PendingTransaction};
    use crate::processors::settlement::tests::{EngineFixture, engine_fixture};
    use slotpay_sdk::signature::SignedJson;
    use std::sync::Arc;
    use time::OffsetDateTime;

    const SECRET: &[u8] = b"webhook-secret";
    const SOURCE: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 7));

    fn processor(f: &EngineFixture) -> WebhookProcessor {
        let mut config = WebhookConfig::new(SECRET.to_vec().into_boxed_slice());
        config.retry_delay = std::time::Duration::from_millis(1);
        WebhookProcessor::new(config, f.engine.clone(), f.events.clone())
    }

    fn signed_payment(uuid: Uuid, user_id: i64, status: &str, amount: &str) -> (String, String) {
        signed_callback("payment", "deposit", uuid, user_id, status, amount)
    }

    fn signed_callback(
        kind: &str,
        order_kind: &str,
        uuid: Uuid,
        user_id: i64,
        status: &str,
        amount: &str,
    ) -> (String, String) {
        let callback: ProviderCallback = serde_json::from_str(&format!(
            r#"{{
                "type": "{kind}",
                "status": "{status}",
                "uuid": "{uuid}",
                "order_id": "{order_kind}_{user_id}_1700000000",
                "amount": "{amount}",
                "currency": "BTC",
                "network": "bitcoin",
                "address": "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"
            }}"#
        ))
        .unwrap();
        let sealed = SignedJson::seal(callback, SECRET).unwrap();
        (sealed.json.clone(), sealed.header_value())
    }

    #[tokio::test]
    async fn paid_deposit_credits_once_across_redelivery() {
        let f = engine_fixture();
        let p = processor(&f);
        let uuid = Uuid::new_v4();
        let (body, header) = signed_payment(uuid, 42, "paid", "0.01");

        // First delivery: balance 0 -> 10_000 at 1_000_000 tokens/BTC.
        let outcome = p.handle(&body, &header, SOURCE).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Applied);
        assert_eq!(f.ledger.balance(42).await, 10_000);
        assert!(f.ledger.is_processed(42, uuid).await);
        assert!(f.store.get(uuid).await.is_none());

        // Identical redelivery: no second credit.
        let outcome = p.handle(&body, &header, SOURCE).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::AlreadyProcessed);
        assert_eq!(f.ledger.balance(42).await, 10_000);
    }

    #[tokio::test]
    async fn concurrent_deliveries_credit_once() {
        let f = engine_fixture();
        let p = Arc::new(processor(&f));
        let uuid = Uuid::new_v4();
        let (body, header) = signed_payment(uuid, 42, "paid", "0.01");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let p = p.clone();
            let body = body.clone();
            let header = header.clone();
            handles.push(tokio::spawn(async move {
                p.handle(&body, &header, SOURCE).await
            }));
        }
        for h in handles {
            // Either settled, replay, or refused by the dedup window —
            // never a second credit.
            match h.await.unwrap() {
                Ok(_) | Err(WebhookError::InFlight(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(f.ledger.balance(42).await, 10_000);
    }

    #[tokio::test]
    async fn failed_withdrawal_refunds_exactly_once() {
        let f = engine_fixture();
        let p = processor(&f);
        let uuid = Uuid::new_v4();

        // A withdrawal initiated against a 5_000 balance, already
        // debited to zero.
        let mut tx = PendingTransaction::new(
            uuid,
            TxType::Withdrawal,
            42,
            crate::entities::Currency::Btc,
            crate::entities::Network::Bitcoin,
            Decimal::new(495, 5),
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into(),
            OffsetDateTime::now_utc(),
        );
        tx.token_amount = Some(5_000);
        f.store.put(tx).await;
        assert_eq!(f.ledger.balance(42).await, 0);

        let (body, header) =
            signed_callback("withdrawal", "withdrawal", uuid, 42, "failed", "0.00495");

        p.handle(&body, &header, SOURCE).await.unwrap();
        assert_eq!(f.ledger.balance(42).await, 5_000);

        // Double delivery of the failure notification.
        p.handle(&body, &header, SOURCE).await.unwrap();
        assert_eq!(f.ledger.balance(42).await, 5_000);
    }

    #[tokio::test]
    async fn completed_withdrawal_has_no_ledger_effect() {
        let f = engine_fixture();
        let p = processor(&f);
        let uuid = Uuid::new_v4();
        let mut tx = PendingTransaction::new(
            uuid,
            TxType::Withdrawal,
            42,
            crate::entities::Currency::Btc,
            crate::entities::Network::Bitcoin,
            Decimal::new(495, 5),
            "addr".into(),
            OffsetDateTime::now_utc(),
        );
        tx.token_amount = Some(5_000);
        f.store.put(tx).await;

        let (body, header) =
            signed_callback("withdrawal", "withdrawal", uuid, 42, "completed", "0.00495");
        let outcome = p.handle(&body, &header, SOURCE).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Applied);
        assert_eq!(f.ledger.balance(42).await, 0);
        assert!(f.store.get(uuid).await.is_none());
    }

    #[tokio::test]
    async fn tampering_rejects_without_state_change() {
        let f = engine_fixture();
        let p = processor(&f);
        let uuid = Uuid::new_v4();
        let (body, header) = signed_payment(uuid, 42, "paid", "0.01");

        // Flip a byte of the body.
        let tampered_body = body.replace("0.01", "0.09");
        let err = p.handle(&tampered_body, &header, SOURCE).await.unwrap_err();
        assert!(matches!(err, WebhookError::Authentication(_)));

        // Flip a byte of the signature.
        let (ts, mut sig) = signature::parse_header(&header).unwrap();
        sig[0] ^= 0x01;
        let bad_header = signature::format_header(ts, &sig);
        let err = p.handle(&body, &bad_header, SOURCE).await.unwrap_err();
        assert!(matches!(err, WebhookError::Authentication(_)));

        assert_eq!(f.ledger.balance(42).await, 0);
        assert!(f.store.is_empty().await);
        assert!(!f.ledger.is_processed(42, uuid).await);
    }

    #[tokio::test]
    async fn allowlist_rejects_unknown_sources() {
        let f = engine_fixture();
        let mut config = WebhookConfig::new(SECRET.to_vec().into_boxed_slice());
        config.allowed_ips = vec![SOURCE];
        let p = WebhookProcessor::new(config, f.engine.clone(), f.events.clone());

        let uuid = Uuid::new_v4();
        let (body, header) = signed_payment(uuid, 42, "paid", "0.01");

        let stranger = IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 1));
        let err = p.handle(&body, &header, stranger).await.unwrap_err();
        assert!(matches!(err, WebhookError::DisallowedSource(_)));
        assert_eq!(f.ledger.balance(42).await, 0);

        // The allowlisted source still settles.
        p.handle(&body, &header, SOURCE).await.unwrap();
        assert_eq!(f.ledger.balance(42).await, 10_000);
    }

    #[tokio::test]
    async fn malformed_order_id_rejected_before_lookup() {
        let f = engine_fixture();
        let p = processor(&f);
        let callback: ProviderCallback = serde_json::from_str(&format!(
            r#"{{
                "type": "payment", "status": "paid",
                "uuid": "{}",
                "order_id": "not-an-order-id",
                "amount": "0.01", "currency": "BTC",
                "network": "bitcoin", "address": "x"
            }}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        let sealed = SignedJson::seal(callback, SECRET).unwrap();

        let err = p
            .handle(&sealed.json, &sealed.header_value(), SOURCE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WebhookError::Validation(ValidationError::OrderId(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_combination_is_a_validation_error() {
        let f = engine_fixture();
        let p = processor(&f);
        let uuid = Uuid::new_v4();
        let (body, header) =
            signed_callback("withdrawal", "withdrawal", uuid, 42, "pending", "0.01");

        let err = p.handle(&body, &header, SOURCE).await.unwrap_err();
        assert!(matches!(
            err,
            WebhookError::Validation(ValidationError::Unsupported { .. })
        ));
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn in_window_duplicate_is_a_conflict() {
        let f = engine_fixture();
        let p = processor(&f);
        let uuid = Uuid::new_v4();
        let (body, header) = signed_payment(uuid, 42, "paid", "0.01");

        p.in_flight.lock().await.insert(uuid, Instant::now());
        let err = p.handle(&body, &header, SOURCE).await.unwrap_err();
        assert!(matches!(err, WebhookError::InFlight(id) if id == uuid));
        assert!(err.acknowledge());
        assert_eq!(f.ledger.balance(42).await, 0);
    }

    #[tokio::test]
    async fn non_terminal_payment_statuses_only_bookkeep() {
        let f = engine_fixture();
        let p = processor(&f);
        let uuid = Uuid::new_v4();

        let (body, header) = signed_payment(uuid, 42, "pending", "0.01");
        let outcome = p.handle(&body, &header, SOURCE).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Recorded);
        assert_eq!(f.ledger.balance(42).await, 0);
        assert_eq!(f.store.get(uuid).await.unwrap().status, TxStatus::Pending);

        // Expiry closes the entry without any credit.
        let (body, header) = signed_payment(uuid, 42, "expired", "0.01");
        p.handle(&body, &header, SOURCE).await.unwrap();
        assert!(f.store.get(uuid).await.is_none());
        assert_eq!(f.ledger.balance(42).await, 0);
    }
}
