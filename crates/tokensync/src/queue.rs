// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Waiter queue: coalesces concurrent callers behind one pending outcome.
//!
//! Every waiter present when [`WaiterQueue::resolve`] or
//! [`WaiterQueue::reject`] runs observes that outcome; waiters enqueued
//! afterwards wait for the next one. The queue is a single-shot barrier per
//! refresh cycle, not a subscription.

use std::future::Future;
use std::sync::Mutex;

use tokio::sync::oneshot;

/// Outcome delivered to a waiter.
pub type Settlement<T> = Result<Option<T>, Rejected>;

/// Rejection delivered to every waiter of a failed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub reason: Option<String>,
}

impl Rejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: Some(reason.into()) }
    }
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            Some(ref reason) => write!(f, "rejected: {reason}"),
            None => f.write_str("rejected"),
        }
    }
}

impl std::error::Error for Rejected {}

/// Pending set of waiters settled together.
pub struct WaiterQueue<T> {
    waiters: Mutex<Vec<oneshot::Sender<Settlement<T>>>>,
}

impl<T: Clone + Send + 'static> WaiterQueue<T> {
    pub fn new() -> Self {
        Self { waiters: Mutex::new(Vec::new()) }
    }

    /// Register a waiter now and return a future for its outcome.
    ///
    /// Registration happens at call time, not at first poll, so a waiter
    /// created before a `resolve` is always settled by it.
    pub fn enqueue(&self) -> impl Future<Output = Settlement<T>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.lock().push(tx);
        async move {
            match rx.await {
                Ok(settlement) => settlement,
                Err(_) => Err(Rejected::new("waiter queue dropped")),
            }
        }
    }

    /// Settle every queued waiter with `data` and empty the queue.
    pub async fn resolve(&self, data: Option<T>) {
        self.settle(Ok(data)).await;
    }

    /// Reject every queued waiter and empty the queue.
    pub async fn reject(&self, reason: Rejected) {
        self.settle(Err(reason)).await;
    }

    /// Number of pending waiters.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject every queued waiter without yielding.
    ///
    /// For synchronous contexts such as `Drop`, where the woken
    /// continuations run whenever the runtime next schedules them.
    pub fn reject_now(&self, reason: Rejected) {
        self.settle_now(Err(reason));
    }

    async fn settle(&self, outcome: Settlement<T>) {
        if self.settle_now(outcome) > 0 {
            // Let woken continuations run before returning to the caller.
            tokio::task::yield_now().await;
        }
    }

    fn settle_now(&self, outcome: Settlement<T>) -> usize {
        let waiters = std::mem::take(&mut *self.lock());
        let count = waiters.len();
        if count == 0 {
            return 0;
        }
        for tx in waiters {
            // A dropped waiter is not an error for the settling side.
            let _ = tx.send(outcome.clone());
        }
        tracing::trace!(count, ok = outcome.is_ok(), "settled waiters");
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<oneshot::Sender<Settlement<T>>>> {
        self.waiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send + 'static> Default for WaiterQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
