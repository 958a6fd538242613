//! Custom Axum extractors for request authentication.
//!
//! - `SignedBody<T>` — verifies the `Slotpay-Signature` header against a
//!   signed JSON body (Service API).
//! - `AdminAuth` — verifies the `Slotpay-Admin-Authorization` header
//!   against the argon2-hashed admin secret (Admin API).
//!
//! Cryptographic operations are delegated to [`slotpay_sdk::signature`].

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use slotpay_sdk::signature::{ADMIN_AUTH_HEADER, SIGNATURE_HEADER, Signed, SignatureError, SignedJson};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// SignedBody — Service API authentication via signed JSON body
// ---------------------------------------------------------------------------

/// Verifies the `Slotpay-Signature` header and deserializes +
/// authenticates the JSON request body.
///
/// The signature is `HMAC-SHA256("{timestamp}.{json_body}", service_secret)`,
/// carried as `{unix_timestamp}.{base64_signature}`.
pub struct SignedBody<T: Signed>(pub T);

/// Errors that can occur during signed-body verification.
#[derive(Debug, thiserror::Error)]
pub enum SignedBodyError {
    #[error("missing Slotpay-Signature header")]
    MissingHeader,
    #[error("invalid Slotpay-Signature header format")]
    InvalidHeader,
    #[error("invalid signature encoding")]
    InvalidBase64,
    #[error("failed to read request body")]
    BodyRead,
    #[error("invalid JSON body: {0}")]
    Json(serde_json::Error),
    #[error("signature verification failed")]
    VerificationFailed,
}

impl From<SignatureError> for SignedBodyError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidFormat => Self::InvalidHeader,
            SignatureError::InvalidBase64 => Self::InvalidBase64,
            SignatureError::Json(e) => Self::Json(e),
            SignatureError::Mismatch | SignatureError::Expired => Self::VerificationFailed,
        }
    }
}

impl IntoResponse for SignedBodyError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            SignedBodyError::MissingHeader => {
                (StatusCode::UNAUTHORIZED, "missing Slotpay-Signature header")
            }
            SignedBodyError::InvalidHeader => (
                StatusCode::BAD_REQUEST,
                "invalid Slotpay-Signature header format",
            ),
            SignedBodyError::InvalidBase64 => {
                (StatusCode::BAD_REQUEST, "invalid signature encoding")
            }
            SignedBodyError::BodyRead => (StatusCode::BAD_REQUEST, "failed to read request body"),
            SignedBodyError::Json(_) => (StatusCode::BAD_REQUEST, "invalid JSON body"),
            SignedBodyError::VerificationFailed => {
                (StatusCode::UNAUTHORIZED, "signature verification failed")
            }
        };
        (status, message).into_response()
    }
}

impl<T: Signed + Send> FromRequest<AppState> for SignedBody<T> {
    type Rejection = SignedBodyError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = req
            .headers()
            .get(SIGNATURE_HEADER)
            .ok_or(SignedBodyError::MissingHeader)?
            .to_str()
            .map_err(|_| SignedBodyError::InvalidHeader)?
            .to_owned();

        let body_bytes = axum::body::to_bytes(req.into_body(), 1024 * 1024)
            .await
            .map_err(|_| SignedBodyError::BodyRead)?;
        let json = String::from_utf8(body_bytes.to_vec()).map_err(|_| SignedBodyError::BodyRead)?;

        let signed = SignedJson::<T>::open(&header_value, json)?;
        let body = signed.verify(&state.config.service_secret)?;

        Ok(SignedBody(body))
    }
}

// ---------------------------------------------------------------------------
// AdminAuth — Admin API authentication
// ---------------------------------------------------------------------------

/// Verifies the plaintext admin secret against its stored argon2 hash.
pub struct AdminAuth;

/// Errors returned by the [`AdminAuth`] extractor.
#[derive(Debug)]
pub enum AdminAuthError {
    MissingHeader,
    InvalidSecret,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminAuthError::MissingHeader => (
                StatusCode::UNAUTHORIZED,
                "missing Slotpay-Admin-Authorization header",
            ),
            AdminAuthError::InvalidSecret => (StatusCode::UNAUTHORIZED, "invalid admin secret"),
        };
        (status, message).into_response()
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AdminAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(ADMIN_AUTH_HEADER)
            .ok_or(AdminAuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AdminAuthError::InvalidSecret)?;

        if !state.config.admin.verify(presented) {
            tracing::warn!("admin authentication failed");
            return Err(AdminAuthError::InvalidSecret);
        }

        Ok(AdminAuth)
    }
}
