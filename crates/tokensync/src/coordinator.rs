// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-context refresh coordinator.
//!
//! One coordinator owns the in-memory session of one context. Concurrent
//! callers in the same context are coalesced behind a single refresh through
//! the waiter queue; other contexts are kept in step through the broadcast
//! bus, with the durable store as the fallback when the bus drops messages.
//!
//! The state lock is a `std::sync::Mutex` and is never held across an
//! `.await`. Checking `is_refreshing` and enqueueing a waiter happen under
//! that lock, so no caller can slip between a refresh starting and its
//! waiters being registered.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{BroadcastAction, BroadcastBus, BroadcastMessage, Listener};
use crate::clock::epoch_ms;
use crate::error::SessionError;
use crate::queue::{Rejected, Settlement, WaiterQueue};
use crate::refresh::RefreshEndpoint;
use crate::store::TokenStore;
use crate::token::{SessionState, TokenPair};
use crate::BoxFuture;

/// Invoked once per terminal refresh failure. Must be idempotent.
pub type LogoutCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`LogoutCallback`].
pub fn logout_callback<F, Fut>(f: F) -> LogoutCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Tuning knobs for a [`RefreshCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Upper bound of the random delay before the first refresh check, so
    /// contexts started together do not all refresh at once.
    pub cold_start_window: Duration,
    /// How long a caller waits on a refresh before giving up. A refresh
    /// announced by another context that stays silent this long is forced
    /// closed; this context's own refresh is left to finish. `None` waits
    /// forever.
    pub waiter_timeout: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            cold_start_window: Duration::from_millis(500),
            waiter_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Point-in-time view of a coordinator's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: SessionState,
    pub is_refreshing: bool,
}

#[derive(Default)]
struct Inner {
    is_refreshing: bool,
    // Set while this context's own endpoint call is outstanding.
    local_refresh: bool,
    session: SessionState,
    logout: Option<LogoutCallback>,
    initialized: bool,
}

enum Step<W> {
    Wait(W),
    Idle,
    Refresh(String),
}

pub struct RefreshCoordinator {
    store: Arc<dyn TokenStore>,
    bus: Arc<dyn BroadcastBus<BroadcastMessage>>,
    endpoint: Arc<dyn RefreshEndpoint>,
    options: CoordinatorOptions,
    inner: Mutex<Inner>,
    queue: WaiterQueue<TokenPair>,
    shutdown: CancellationToken,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        bus: Arc<dyn BroadcastBus<BroadcastMessage>>,
        endpoint: Arc<dyn RefreshEndpoint>,
        options: CoordinatorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            endpoint,
            options,
            inner: Mutex::new(Inner::default()),
            queue: WaiterQueue::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the session: listen to other contexts, restore the stored pair,
    /// wait a random cold-start delay, then refresh if the token is expired.
    ///
    /// Never fails. Only the first call has any effect.
    pub async fn initialize(self: &Arc<Self>, logout: LogoutCallback) {
        {
            let mut inner = self.lock();
            if inner.initialized {
                tracing::warn!("coordinator already initialized; ignoring");
                return;
            }
            inner.initialized = true;
            inner.logout = Some(logout);
        }

        self.spawn_listener();
        self.restore_tokens_from_storage().await;

        let window_ms = self.options.cold_start_window.as_millis() as u64;
        if window_ms > 0 {
            let jitter = rand::rng().random_range(0..=window_ms);
            tracing::debug!(jitter_ms = jitter, "cold-start delay");
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        if let Err(e) = self.maybe_refresh_access_token().await {
            tracing::warn!(err = %e, code = e.as_str(), "initial refresh failed");
        }
    }

    /// Replace the session with `pair` and persist it.
    pub async fn set_tokens(&self, pair: TokenPair) -> anyhow::Result<()> {
        let state = SessionState::from_pair(pair.clone());
        tracing::debug!(expires_at_ms = state.expiration_epoch_ms, "session tokens set");
        self.lock().session = state;
        self.store.set(Some(pair)).await
    }

    /// Drop the session from memory and storage.
    pub async fn clear_tokens(&self) -> anyhow::Result<()> {
        self.lock().session = SessionState::empty();
        tracing::debug!("session tokens cleared");
        self.store.clear().await
    }

    /// Adopt the stored pair if it expires strictly later than the one in
    /// memory. Absent or malformed storage changes nothing.
    pub async fn restore_tokens_from_storage(&self) {
        let Some(stored) = self.store.get().await else {
            return;
        };
        let candidate = SessionState::from_pair(stored);
        let mut inner = self.lock();
        if candidate.expiration_epoch_ms > inner.session.expiration_epoch_ms {
            tracing::debug!(
                from_ms = inner.session.expiration_epoch_ms,
                to_ms = candidate.expiration_epoch_ms,
                "adopted newer stored session"
            );
            inner.session = candidate;
        }
    }

    pub fn access_token_is_expired(&self) -> bool {
        self.lock().session.is_expired_at(epoch_ms())
    }

    /// Refresh the session if its access token has expired.
    ///
    /// While a refresh is in flight, here or in another context, the caller
    /// waits for its outcome instead of starting another. Only the caller
    /// that started a failed refresh sees the [`SessionError::Refresh`].
    pub async fn maybe_refresh_access_token(&self) -> Result<(), SessionError> {
        let step = {
            let mut inner = self.lock();
            if inner.is_refreshing || inner.local_refresh {
                Step::Wait(self.queue.enqueue())
            } else if !inner.session.is_expired_at(epoch_ms()) {
                Step::Idle
            } else {
                let refresh_token = inner.session.tokens.as_ref().map(|t| t.refresh_token.clone());
                match refresh_token {
                    Some(refresh_token) => {
                        inner.is_refreshing = true;
                        inner.local_refresh = true;
                        Step::Refresh(refresh_token)
                    }
                    None => Step::Idle,
                }
            }
        };

        match step {
            Step::Wait(waiter) => self.wait_for_cycle(waiter).await,
            Step::Idle => Ok(()),
            Step::Refresh(refresh_token) => self.run_refresh(&refresh_token).await,
        }
    }

    /// Apply a message from another context.
    pub async fn handle_broadcast_message(&self, msg: BroadcastMessage) {
        if msg.action == BroadcastAction::Unknown {
            tracing::trace!("ignoring unknown broadcast action");
            return;
        }
        tracing::debug!(action = ?msg.action, has_tokens = msg.tokens.is_some(), "broadcast received");

        {
            let mut inner = self.lock();
            if let Some(ref tokens) = msg.tokens {
                inner.session = SessionState::from_pair(tokens.clone());
            }
            inner.is_refreshing = msg.action == BroadcastAction::Refreshing;
        }
        if let Some(ref tokens) = msg.tokens {
            if let Err(e) = self.store.set(Some(tokens.clone())).await {
                tracing::warn!(err = %e, "failed to persist broadcast tokens");
            }
        }

        match msg.action {
            BroadcastAction::Resolved => self.queue.resolve(msg.tokens).await,
            BroadcastAction::Rejected => {
                self.queue.reject(Rejected::new("refresh failed in another context")).await;
            }
            BroadcastAction::Refreshing | BroadcastAction::Unknown => {}
        }
    }

    /// Return a usable access token, refreshing first if needed.
    ///
    /// Refresh errors are logged, not returned; the stored session is always
    /// re-read afterwards.
    pub async fn get_access_token(&self) -> Option<String> {
        if let Err(e) = self.maybe_refresh_access_token().await {
            tracing::debug!(err = %e, "refresh did not complete; falling back to storage");
        }
        self.restore_tokens_from_storage().await;
        self.lock().session.access_token().map(str::to_owned)
    }

    pub async fn get_access_token_or_throw(&self) -> Result<String, SessionError> {
        self.get_access_token().await.ok_or(SessionError::MissingAccessToken)
    }

    pub fn session_state(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot { session: inner.session.clone(), is_refreshing: inner.is_refreshing }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().is_refreshing
    }

    /// Number of callers waiting on the current refresh cycle.
    pub fn pending_waiters(&self) -> usize {
        self.queue.len()
    }

    /// Stop listening to other contexts.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.bus.close();
    }

    fn spawn_listener(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Listener<BroadcastMessage> = Arc::new(move |msg| {
            let _ = tx.send(msg);
        });
        self.bus.add_message_listener(listener);

        // Messages are applied in arrival order, one at a time.
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        let Some(this) = weak.upgrade() else { break };
                        this.handle_broadcast_message(msg).await;
                    }
                }
            }
            tracing::debug!("broadcast listener stopped");
        });
    }

    async fn wait_for_cycle(
        &self,
        waiter: impl Future<Output = Settlement<TokenPair>>,
    ) -> Result<(), SessionError> {
        let settled = match self.options.waiter_timeout {
            Some(limit) => match tokio::time::timeout(limit, waiter).await {
                Ok(settled) => settled,
                Err(_) => {
                    let timeout_ms = limit.as_millis() as u64;
                    let force_close = {
                        let mut inner = self.lock();
                        // Our own refresh settles the cycle itself; only a
                        // remote one that went silent is forced closed.
                        if inner.local_refresh {
                            false
                        } else {
                            inner.is_refreshing = false;
                            true
                        }
                    };
                    if force_close {
                        tracing::warn!(timeout_ms, "remote refresh went silent; closing cycle");
                        self.queue.reject(Rejected::new("timed out waiting for refresh")).await;
                    } else {
                        tracing::warn!(timeout_ms, "refresh wait timed out");
                    }
                    return Err(SessionError::WaitTimedOut);
                }
            },
            None => waiter.await,
        };
        settled.map(|_| ()).map_err(SessionError::from)
    }

    async fn run_refresh(&self, refresh_token: &str) -> Result<(), SessionError> {
        let mut guard = CycleGuard { coordinator: self, armed: true };
        tracing::debug!("access token expired; refreshing");
        self.bus.broadcast_message(&BroadcastMessage::refreshing());

        match self.endpoint.refresh(refresh_token).await {
            Ok(pair) => {
                if let Err(e) = self.set_tokens(pair.clone()).await {
                    tracing::warn!(err = %e, "failed to persist refreshed tokens");
                }
                guard.armed = false;
                self.end_local_cycle();
                self.bus.broadcast_message(&BroadcastMessage::resolved(pair.clone()));
                self.queue.resolve(Some(pair)).await;
                tracing::info!("access token refreshed");
                Ok(())
            }
            Err(err) => {
                if err.is_terminal() {
                    tracing::warn!(err = %err, "refresh token invalidated; logging out");
                    if let Err(e) = self.clear_tokens().await {
                        tracing::warn!(err = %e, "failed to clear stored session");
                    }
                    self.invoke_logout().await;
                } else {
                    tracing::warn!(err = %err, code = err.as_str(), "token refresh failed");
                }
                guard.armed = false;
                self.end_local_cycle();
                self.bus.broadcast_message(&BroadcastMessage::rejected());
                self.queue.reject(Rejected::new(err.to_string())).await;
                Err(SessionError::Refresh(err))
            }
        }
    }

    async fn invoke_logout(&self) {
        let Some(logout) = self.lock().logout.clone() else {
            tracing::debug!("no logout callback registered");
            return;
        };
        if let Err(e) = logout().await {
            tracing::warn!(err = %e, "logout callback failed");
        }
    }

    fn end_local_cycle(&self) {
        let mut inner = self.lock();
        inner.is_refreshing = false;
        inner.local_refresh = false;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Closes the cycle if the refreshing caller is dropped before settling it,
/// so local and remote waiters are not left hanging.
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!("refresh cancelled before completion");
        self.coordinator.end_local_cycle();
        self.coordinator.bus.broadcast_message(&BroadcastMessage::rejected());
        self.coordinator.queue.reject_now(Rejected::new("refresh cancelled"));
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
