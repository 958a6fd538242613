//! Signature scheme shared by every Slotpay HTTP surface.
//!
//! Provider webhook callbacks, outbound provider calls, and the internal
//! Service API all carry an HMAC-SHA256 signature over the JSON body:
//!
//! ```text
//! Slotpay-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! where the signature is `HMAC-SHA256("{timestamp}.{json_body}", secret)`.
//! Each surface uses its own secret (webhook key, provider API key,
//! service key); the algorithm and header format are identical.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Header carrying the HMAC signature.
pub const SIGNATURE_HEADER: &str = "Slotpay-Signature";

/// Header carrying the plaintext admin secret (Admin API only).
pub const ADMIN_AUTH_HEADER: &str = "Slotpay-Admin-Authorization";

/// Maximum accepted age of a signature, in seconds.
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Marker for payload types that travel inside a signed JSON body.
pub trait Signed: Serialize + DeserializeOwned {}

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid signature header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signature mismatch")]
    Mismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::Mismatch
    }
}

/// Compute `HMAC-SHA256("{timestamp}.{json}", key)`.
pub fn sign_payload(json: &str, timestamp: i64, key: &[u8]) -> Box<[u8]> {
    let data = format!("{timestamp}.{json}");
    let tag = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
    );
    tag.as_ref().to_owned().into_boxed_slice()
}

/// Verify an HMAC over `"{timestamp}.{json}"` and check freshness.
pub fn verify_payload(
    json: &str,
    timestamp: i64,
    signature: &[u8],
    key: &[u8],
) -> Result<(), SignatureError> {
    let data = format!("{timestamp}.{json}");
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
        signature,
    )?;
    check_timestamp(timestamp)
}

/// Parse a `Slotpay-Signature` header value into `(timestamp, signature)`.
pub fn parse_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let dot = value.find('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = value[..dot]
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature = fast32::base64::RFC4648_NOPAD
        .decode_str(&value[dot + 1..])
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature))
}

/// Format a `{timestamp}.{base64}` header value.
pub fn format_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Reject timestamps older than [`MAX_SIGNATURE_AGE`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now - timestamp > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

/// A signed JSON body: the typed payload plus the exact bytes and HMAC
/// that went over the wire.
///
/// Keeping the raw `json` string around matters: verification must run
/// over the bytes the peer signed, not over a re-serialization.
#[derive(Debug, Clone)]
pub struct SignedJson<T: Signed> {
    pub body: T,
    pub timestamp: i64,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signed> SignedJson<T> {
    /// Serialize and sign `body` with the current time.
    pub fn seal(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
        let json = serde_json::to_string(&body)?;
        let signature = sign_payload(&json, timestamp, key);
        Ok(Self {
            body,
            timestamp,
            json,
            signature,
        })
    }

    /// Rebuild from a received header value and raw body string.
    ///
    /// Parses the header and deserializes the payload but does **not**
    /// verify the HMAC; call [`verify`](Self::verify) for that.
    pub fn open(header_value: &str, json: String) -> Result<Self, SignatureError> {
        let (timestamp, signature) = parse_header(header_value)?;
        let body: T = serde_json::from_str(&json)?;
        Ok(Self {
            body,
            timestamp,
            json,
            signature,
        })
    }

    /// Verify HMAC and freshness, consuming `self` into the payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        verify_payload(&self.json, self.timestamp, &self.signature, key)?;
        Ok(self.body)
    }

    /// The full `Slotpay-Signature` header value for this body.
    pub fn header_value(&self) -> String {
        format_header(self.timestamp, &self.signature)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Ping {
        n: u32,
        msg: String,
    }
    impl Signed for Ping {}

    const KEY: &[u8] = b"test-webhook-secret";

    #[test]
    fn seal_then_verify_roundtrip() {
        let sealed = SignedJson::seal(
            Ping {
                n: 7,
                msg: "hello".into(),
            },
            KEY,
        )
        .unwrap();
        let header = sealed.header_value();
        let json = sealed.json.clone();

        let received = SignedJson::<Ping>::open(&header, json).unwrap();
        let body = received.verify(KEY).unwrap();
        assert_eq!(body.n, 7);
        assert_eq!(body.msg, "hello");
    }

    #[test]
    fn flipped_body_byte_is_rejected() {
        let sealed = SignedJson::seal(
            Ping {
                n: 7,
                msg: "hello".into(),
            },
            KEY,
        )
        .unwrap();
        let header = sealed.header_value();
        // Flip one byte of the payload.
        let tampered = sealed.json.replace("hello", "hellp");
        assert_ne!(tampered, sealed.json);

        let received = SignedJson::<Ping>::open(&header, tampered).unwrap();
        assert!(matches!(
            received.verify(KEY),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let sealed = SignedJson::seal(
            Ping {
                n: 1,
                msg: "x".into(),
            },
            KEY,
        )
        .unwrap();
        let mut sig = sealed.signature.clone().into_vec();
        sig[0] ^= 0x01;
        let header = format_header(sealed.timestamp, &sig);

        let received = SignedJson::<Ping>::open(&header, sealed.json.clone()).unwrap();
        assert!(matches!(
            received.verify(KEY),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = SignedJson::seal(
            Ping {
                n: 1,
                msg: "x".into(),
            },
            KEY,
        )
        .unwrap();
        let header = sealed.header_value();
        let received = SignedJson::<Ping>::open(&header, sealed.json.clone()).unwrap();
        assert!(received.verify(b"another-secret").is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let body = Ping {
            n: 2,
            msg: "old".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp() - MAX_SIGNATURE_AGE - 10;
        let signature = sign_payload(&json, timestamp, KEY);
        assert!(matches!(
            verify_payload(&json, timestamp, &signature, KEY),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(matches!(
            parse_header("no-dot-here"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_header("abc.SGVsbG8"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_header("123.!!!not-base64!!!"),
            Err(SignatureError::InvalidBase64)
        ));
    }
}
