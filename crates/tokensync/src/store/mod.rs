// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable token pair persistence.
//!
//! Only the pair is stored. Expiration is always re-derived from the access
//! token by the reader, never trusted from storage.

pub mod backend;

use std::sync::Arc;

use crate::token::TokenPair;
use crate::BoxFuture;

pub use backend::{FileBackend, KeyValueBackend, MemoryBackend};

/// Default storage key for the session.
pub const DEFAULT_STORAGE_KEY: &str = "auth";

/// Persistence contract for the session token pair.
pub trait TokenStore: Send + Sync {
    /// Read the stored pair. Absent or malformed data yields `None`.
    fn get(&self) -> BoxFuture<'_, Option<TokenPair>>;

    /// Store a pair; `None` clears.
    fn set(&self, pair: Option<TokenPair>) -> BoxFuture<'_, anyhow::Result<()>>;

    fn clear(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        self.set(None)
    }
}

/// [`TokenStore`] that keeps the pair as JSON under one key of a backend.
pub struct StorageTokenStore {
    backend: Arc<dyn KeyValueBackend>,
    key: String,
}

impl StorageTokenStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, key: impl Into<String>) -> Self {
        Self { backend, key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl TokenStore for StorageTokenStore {
    fn get(&self) -> BoxFuture<'_, Option<TokenPair>> {
        Box::pin(async move {
            let raw = match self.backend.get_item(&self.key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(key = %self.key, err = %e, "failed to read stored session");
                    return None;
                }
            };
            match serde_json::from_str::<TokenPair>(&raw) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    tracing::debug!(key = %self.key, err = %e, "ignoring malformed stored session");
                    None
                }
            }
        })
    }

    fn set(&self, pair: Option<TokenPair>) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            match pair {
                Some(pair) => {
                    let json = serde_json::to_string(&pair)?;
                    self.backend.set_item(&self.key, json).await
                }
                None => self.backend.remove_item(&self.key).await,
            }
        })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
