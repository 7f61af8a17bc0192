//! Telephony request signature validation.
//!
//! The telephony platform signs each request with HMAC-SHA256 over the
//! full request URL using the account's shared secret, and sends the
//! base64 digest in the `X-Telephony-Signature` header. When a secret is
//! configured, requests with a missing or wrong signature never reach the
//! upgrade handler. Comparison is constant-time.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// The signature header the telephony platform sends.
pub const SIGNATURE_HEADER: &str = "x-telephony-signature";

/// Compute the expected signature for a URL (base64 digest).
pub fn compute_signature(secret: &str, url: &str) -> String {
    BASE64_STANDARD.encode(digest(secret, url))
}

fn digest(secret: &str, url: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(url.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Platforms disagree on digest encoding; accept base64 or lowercase hex.
fn verify(secret: &str, url: &str, provided: &str) -> bool {
    let digest = digest(secret, url);
    let b64_ok: bool = BASE64_STANDARD
        .encode(&digest)
        .as_bytes()
        .ct_eq(provided.as_bytes())
        .into();
    let hex_ok: bool = hex::encode(&digest)
        .as_bytes()
        .ct_eq(provided.as_bytes())
        .into();
    b64_ok || hex_ok
}

/// Middleware validating the telephony signature header.
///
/// A deployment without a configured secret skips validation — local
/// development and tests run unsigned.
pub async fn signature_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(secret) = state.config.telephony_auth_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing telephony signature".to_string()))?;

    let url = request.uri().to_string();
    if !verify(secret, &url, provided) {
        tracing::warn!(path = %request.uri().path(), "Rejected request with bad signature");
        return Err(AppError::Unauthorized(
            "Invalid telephony signature".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let secret = "shhh";
        let url = "/call-stream?from=%2B15550100100&to=%2B15550100199";
        let signature = compute_signature(secret, url);
        assert!(verify(secret, url, &signature));
    }

    #[test]
    fn test_hex_digest_accepted() {
        let secret = "shhh";
        let url = "/call-stream";
        let signature = hex::encode(digest(secret, url));
        assert!(verify(secret, url, &signature));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let url = "/call-stream";
        let signature = compute_signature("right", url);
        assert!(!verify("wrong", url, &signature));
    }

    #[test]
    fn test_tampered_url_fails() {
        let secret = "shhh";
        let signature = compute_signature(secret, "/call-stream?to=%2B1555");
        assert!(!verify(secret, "/call-stream?to=%2B1556", &signature));
    }
}
