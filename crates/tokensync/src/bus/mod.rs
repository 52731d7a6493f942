// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort pub/sub between contexts sharing one session.
//!
//! Delivery is unordered across contexts and never reaches the sender.
//! Nothing here is relied on for correctness: the durable store is always
//! re-read after a refresh cycle.

pub mod local;
#[cfg(feature = "nats")]
pub mod nats;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::token::TokenPair;

pub use local::{LocalBus, LocalHub};
#[cfg(feature = "nats")]
pub use nats::{NatsBus, NatsBusConfig};

/// Callback invoked for every message received from another context.
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Pub/sub channel shared by every context of a deployment.
pub trait BroadcastBus<T>: Send + Sync {
    /// Register a handler for messages published by other contexts.
    fn add_message_listener(&self, listener: Listener<T>);

    /// Publish to every other context. Fire-and-forget.
    fn broadcast_message(&self, message: &T);

    /// Stop delivering to registered listeners.
    fn close(&self) {}
}

/// Refresh lifecycle step announced to other contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastAction {
    Refreshing,
    Resolved,
    Rejected,
    #[serde(other)]
    Unknown,
}

/// Wire body exchanged between contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub action: BroadcastAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
}

impl BroadcastMessage {
    pub fn refreshing() -> Self {
        Self { action: BroadcastAction::Refreshing, tokens: None }
    }

    pub fn resolved(tokens: TokenPair) -> Self {
        Self { action: BroadcastAction::Resolved, tokens: Some(tokens) }
    }

    pub fn rejected() -> Self {
        Self { action: BroadcastAction::Rejected, tokens: None }
    }
}

/// Bus for environments without a shared channel. Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

impl<T> BroadcastBus<T> for NullBus {
    fn add_message_listener(&self, _listener: Listener<T>) {}

    fn broadcast_message(&self, _message: &T) {}
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
