// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process bus for contexts living in one process.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BroadcastBus, Listener};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Clone)]
struct Envelope<T> {
    origin: Uuid,
    body: T,
}

/// Shared channel; every [`LocalBus`] from one hub sees the others' messages.
#[derive(Clone)]
pub struct LocalHub<T> {
    tx: broadcast::Sender<Envelope<T>>,
}

impl<T: Clone + Send + 'static> LocalHub<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Receivers lagging more than `capacity` messages drop the oldest.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Open a new endpoint, one per context.
    pub fn connect(&self) -> LocalBus<T> {
        LocalBus { id: Uuid::new_v4(), tx: self.tx.clone(), shutdown: CancellationToken::new() }
    }
}

impl<T: Clone + Send + 'static> Default for LocalHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One context's endpoint on a [`LocalHub`].
pub struct LocalBus<T> {
    id: Uuid,
    tx: broadcast::Sender<Envelope<T>>,
    shutdown: CancellationToken,
}

impl<T> LocalBus<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T: Clone + Send + 'static> BroadcastBus<T> for LocalBus<T> {
    fn add_message_listener(&self, listener: Listener<T>) {
        let mut rx = self.tx.subscribe();
        let own_id = self.id;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    recv = rx.recv() => match recv {
                        Ok(envelope) if envelope.origin == own_id => continue,
                        Ok(envelope) => listener(envelope.body),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(bus = %own_id, skipped = n, "local bus listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn broadcast_message(&self, message: &T) {
        // No receivers is not an error on a best-effort channel.
        let _ = self.tx.send(Envelope { origin: self.id, body: message.clone() });
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

impl<T> Drop for LocalBus<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
