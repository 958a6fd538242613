//! Provider webhook callback payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Signed;

/// A provider callback body, as delivered to `POST /webhook/crypto`.
///
/// `status` is kept as the provider's raw string; the settlement pipeline
/// routes on the `(kind, status)` pair and rejects unsupported
/// combinations explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallback {
    #[serde(rename = "type")]
    pub kind: CallbackKind,
    pub status: String,
    /// Provider-assigned transaction id.
    pub uuid: Uuid,
    /// Correlation string: `<type>_<userId>_<timestamp>`.
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub network: String,
    pub address: String,
}

impl Signed for ProviderCallback {}

/// Top-level callback kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackKind {
    Payment,
    Withdrawal,
    Refund,
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackKind::Payment => write!(f, "payment"),
            CallbackKind::Withdrawal => write!(f, "withdrawal"),
            CallbackKind::Refund => write!(f, "refund"),
        }
    }
}

/// Parsed `order_id` correlation string.
///
/// The gateway assigns `"{kind}_{user_id}_{unix_timestamp}"` when talking
/// to the provider; webhooks echo it back, and it is the only place a
/// callback names the owning user. A payload whose `order_id` does not
/// match this shape is rejected before any account lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRef {
    pub kind: OrderKind,
    pub user_id: i64,
    pub issued_at: i64,
}

/// The operation an `order_id` was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    Deposit,
    Withdrawal,
    Refund,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Deposit => "deposit",
            OrderKind::Withdrawal => "withdrawal",
            OrderKind::Refund => "refund",
        }
    }
}

/// Error parsing an `order_id`.
#[derive(Debug, thiserror::Error)]
#[error("malformed order_id: {0:?}")]
pub struct MalformedOrderId(pub String);

impl OrderRef {
    pub fn new(kind: OrderKind, user_id: i64, issued_at: i64) -> Self {
        Self {
            kind,
            user_id,
            issued_at,
        }
    }

    /// Render the wire form: `deposit_42_1700000000`.
    pub fn encode(&self) -> String {
        format!("{}_{}_{}", self.kind.as_str(), self.user_id, self.issued_at)
    }

    /// Parse the wire form, rejecting anything that is not exactly
    /// `<kind>_<user_id>_<timestamp>`.
    pub fn parse(raw: &str) -> Result<Self, MalformedOrderId> {
        let mut parts = raw.split('_');
        let kind = match parts.next() {
            Some("deposit") => OrderKind::Deposit,
            Some("withdrawal") => OrderKind::Withdrawal,
            Some("refund") => OrderKind::Refund,
            _ => return Err(MalformedOrderId(raw.to_owned())),
        };
        let user_id: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MalformedOrderId(raw.to_owned()))?;
        let issued_at: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MalformedOrderId(raw.to_owned()))?;
        if parts.next().is_some() {
            return Err(MalformedOrderId(raw.to_owned()));
        }
        Ok(Self {
            kind,
            user_id,
            issued_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn order_ref_roundtrip() {
        let r = OrderRef::new(OrderKind::Withdrawal, 987654321, 1700000000);
        let encoded = r.encode();
        assert_eq!(encoded, "withdrawal_987654321_1700000000");
        assert_eq!(OrderRef::parse(&encoded).unwrap(), r);
    }

    #[test]
    fn order_ref_rejects_malformed() {
        for bad in [
            "",
            "deposit",
            "deposit_12",
            "deposit_12_34_56",
            "payout_12_34",
            "deposit_notanumber_34",
            "deposit_12_then",
        ] {
            assert!(OrderRef::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn callback_deserializes_spec_shape() {
        let json = r#"{
            "type": "payment",
            "status": "paid",
            "uuid": "f7b9e6a0-5c89-4d7e-9f34-6f2c6a1b0d12",
            "order_id": "deposit_42_1700000000",
            "amount": "0.01",
            "currency": "BTC",
            "network": "bitcoin",
            "address": "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"
        }"#;
        let cb: ProviderCallback = serde_json::from_str(json).unwrap();
        assert_eq!(cb.kind, CallbackKind::Payment);
        assert_eq!(cb.status, "paid");
        assert_eq!(cb.amount, Decimal::new(1, 2));
        let order = OrderRef::parse(&cb.order_id).unwrap();
        assert_eq!(order.user_id, 42);
    }
}
