// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders, doubles, and assertion helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value as JsonValue;

use crate::bus::{BroadcastBus, BroadcastMessage, Listener};
use crate::clock::epoch_ms;
use crate::error::RefreshError;
use crate::refresh::RefreshEndpoint;
use crate::token::TokenPair;
use crate::BoxFuture;

/// Build an unsigned JWT carrying `claims` as its payload.
pub fn jwt_with_claims(claims: &JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// Build an unsigned JWT expiring `secs` from now (negative for the past).
///
/// Each call carries a distinct `jti`, so two tokens with the same expiry
/// still compare unequal.
pub fn jwt_expiring_in(secs: i64) -> String {
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let exp = epoch_ms() / 1000 + secs;
    let jti = SEQ.fetch_add(1, Ordering::Relaxed);
    jwt_with_claims(&serde_json::json!({ "exp": exp, "jti": jti }))
}

/// Token pair whose access token expires `secs` from now.
pub fn pair_expiring_in(secs: i64, refresh_token: &str) -> TokenPair {
    TokenPair::new(jwt_expiring_in(secs), refresh_token)
}

/// [`RefreshEndpoint`] that replays scripted outcomes and counts calls.
///
/// Once the script is exhausted the last outcome repeats.
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<Result<TokenPair, RefreshError>>>,
    last: Mutex<Option<Result<TokenPair, RefreshError>>>,
    delay: Duration,
    calls: Arc<AtomicU32>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedEndpoint {
    pub fn new(script: Vec<Result<TokenPair, RefreshError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Endpoint that always succeeds with `pair`.
    pub fn succeeding(pair: TokenPair) -> Self {
        Self::new(vec![Ok(pair)])
    }

    /// Endpoint that always fails with `err`.
    pub fn failing(err: RefreshError) -> Self {
        Self::new(vec![Err(err)])
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented so far, in call order.
    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_outcome(&self) -> Result<TokenPair, RefreshError> {
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match scripted {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(RefreshError::Unknown("script exhausted".into()))),
        }
    }
}

impl RefreshEndpoint for ScriptedEndpoint {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair, RefreshError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(refresh_token.to_owned());
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.next_outcome()
        })
    }
}

/// Bus that records every outgoing message and lets tests inject incoming ones.
#[derive(Default)]
pub struct RecordingBus {
    sent: Mutex<Vec<BroadcastMessage>>,
    listeners: Mutex<Vec<Listener<BroadcastMessage>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages broadcast so far.
    pub fn sent(&self) -> Vec<BroadcastMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Deliver `msg` to registered listeners as if another context sent it.
    pub fn deliver(&self, msg: BroadcastMessage) {
        let listeners = self.listeners.lock().map(|l| l.clone()).unwrap_or_default();
        for listener in listeners {
            listener(msg.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or_default()
    }
}

impl BroadcastBus<BroadcastMessage> for RecordingBus {
    fn add_message_listener(&self, listener: Listener<BroadcastMessage>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    fn broadcast_message(&self, message: &BroadcastMessage) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
