// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS-backed bus for contexts in separate processes.
//!
//! All contexts of a deployment share one subject. The connection is opened
//! with `no_echo`, so a process never receives its own publications.
//! Publications go through one outbox task, so a sender's messages reach the
//! server in the order they were broadcast.

use std::future::Future;
use std::marker::PhantomData;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{BroadcastBus, Listener};

/// Connection settings for [`NatsBus`].
#[derive(Debug, Clone)]
pub struct NatsBusConfig {
    pub url: String,
    pub token: Option<String>,
    pub subject: String,
}

pub struct NatsBus<T> {
    client: async_nats::Client,
    subject: String,
    outbox: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
    _marker: PhantomData<fn() -> T>,
}

impl<T> NatsBus<T> {
    /// Connect to the NATS server.
    pub async fn connect(config: &NatsBusConfig) -> anyhow::Result<Self> {
        let mut opts = async_nats::ConnectOptions::new().no_echo();
        if let Some(ref token) = config.token {
            opts = opts.token(token.clone());
        }

        tracing::info!(url = %config.url, subject = %config.subject, "connecting NATS bus");
        let client = opts.connect(&config.url).await?;
        tracing::info!("NATS bus connected");

        let shutdown = CancellationToken::new();
        let (outbox, rx) = mpsc::unbounded_channel();
        let publisher = client.clone();
        let subject = config.subject.clone();
        tokio::spawn(run_outbox(rx, shutdown.clone(), move |payload| {
            let client = publisher.clone();
            let subject = subject.clone();
            async move { client.publish(subject, payload).await.map_err(anyhow::Error::from) }
        }));

        Ok(Self { client, subject: config.subject.clone(), outbox, shutdown, _marker: PhantomData })
    }
}

impl<T> BroadcastBus<T> for NatsBus<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn add_message_listener(&self, listener: Listener<T>) {
        let client = self.client.clone();
        let subject = self.subject.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut sub = match client.subscribe(subject.clone()).await {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::warn!(subject = %subject, err = %e, "NATS subscribe failed");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = sub.next() => {
                        let Some(msg) = msg else { break };
                        match serde_json::from_slice::<T>(&msg.payload) {
                            Ok(body) => listener(body),
                            Err(e) => {
                                tracing::debug!(subject = %subject, err = %e, "skipping undecodable bus message");
                            }
                        }
                    }
                }
            }
            tracing::debug!(subject = %subject, "NATS bus listener shutting down");
        });
    }

    fn broadcast_message(&self, message: &T) {
        let payload = match serde_json::to_vec(message) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode bus message");
                return;
            }
        };
        if self.outbox.send(payload).is_err() {
            tracing::debug!("NATS bus closed; dropping message");
        }
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Publish queued payloads one at a time until shutdown or until every
/// sender is gone. Payloads already queued at shutdown are still flushed.
async fn run_outbox<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
    mut publish: F,
) where
    F: FnMut(Bytes) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        tokio::select! {
            biased;
            payload = rx.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = publish(payload).await {
                    tracing::warn!("NATS publish failed: {e}");
                }
            }
            _ = shutdown.cancelled() => {
                while let Ok(payload) = rx.try_recv() {
                    if let Err(e) = publish(payload).await {
                        tracing::warn!("NATS publish failed: {e}");
                    }
                }
                break;
            }
        }
    }
    tracing::debug!("NATS bus outbox shutting down");
}

impl<T> Drop for NatsBus<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "nats_tests.rs"]
mod tests;
