// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token expiration decoding.
//!
//! The JWT payload is decoded **without signature verification**. The
//! result only schedules client-side refreshes; it is not an authorization
//! check and must never be used as one.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value as JsonValue;

/// Sentinel for an unknown or undecodable expiration.
pub const UNKNOWN_EXPIRATION: i64 = -1;

/// Decode the `exp` claim of a JWT and return it in epoch milliseconds.
///
/// Returns [`UNKNOWN_EXPIRATION`] for anything that is not a three-part
/// token with a base64url JSON payload carrying a numeric `exp`.
pub fn decode_expiration(token: &str) -> i64 {
    match payload_claims(token) {
        Some(claims) => claims
            .get("exp")
            .and_then(JsonValue::as_f64)
            .filter(|exp| exp.is_finite())
            .map(|exp| (exp * 1000.0) as i64)
            .unwrap_or(UNKNOWN_EXPIRATION),
        None => UNKNOWN_EXPIRATION,
    }
}

fn payload_claims(token: &str) -> Option<JsonValue> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    let _signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JsonValue = serde_json::from_slice(&bytes).ok()?;
    claims.is_object().then_some(claims)
}

/// Return current epoch millis.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
