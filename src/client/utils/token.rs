//! Local inspection of the backend's JWT bearer tokens. Signatures are not
//! verified here, the backend does that.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
}

pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// True when the token carries an `exp` claim at or before `now` (unix seconds).
/// Tokens without a readable expiry are left for the backend to judge.
pub fn is_expired_at(token: &str, now: i64) -> bool {
    match decode_claims(token).and_then(|c| c.exp) {
        Some(exp) => exp <= now,
        None => false,
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, chrono::Utc::now().timestamp())
}

#[cfg(test)]
pub(crate) fn make_token(claims: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.as_bytes());
    format!("{}.{}.signature", header, payload)
}
