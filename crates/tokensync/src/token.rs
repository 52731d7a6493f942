// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token types.

use serde::{Deserialize, Serialize};

use crate::clock::{decode_expiration, UNKNOWN_EXPIRATION};

/// An access/refresh token pair as persisted and broadcast.
///
/// Both values are opaque. The access token is expected to be a JWT whose
/// `exp` claim schedules the next refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }
}

// Tokens are credentials; keep them out of logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> String {
    format!("<{} bytes>", token.len())
}

/// In-memory session state of one coordinator.
///
/// `expiration_epoch_ms` is `-1` when unknown; it is always derived from
/// the access token and never read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub tokens: Option<TokenPair>,
    pub expiration_epoch_ms: i64,
}

impl SessionState {
    pub fn empty() -> Self {
        Self { tokens: None, expiration_epoch_ms: UNKNOWN_EXPIRATION }
    }

    /// Build a state from a pair, decoding its expiration.
    pub fn from_pair(pair: TokenPair) -> Self {
        let expiration_epoch_ms = decode_expiration(&pair.access_token);
        Self { tokens: Some(pair), expiration_epoch_ms }
    }

    /// True iff tokens exist, the expiration is known, and `now_ms` is past it.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.tokens.is_some()
            && self.expiration_epoch_ms > UNKNOWN_EXPIRATION
            && now_ms - self.expiration_epoch_ms > 0
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
