// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tokensync: keeps one access/refresh token pair alive for a session shared
//! by several contexts (processes or in-process instances).

pub mod bus;
pub mod clock;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod refresh;
pub mod store;
pub mod test_support;
pub mod token;

use std::future::Future;
use std::pin::Pin;

pub use bus::{BroadcastAction, BroadcastBus, BroadcastMessage, LocalBus, LocalHub, NullBus};
pub use coordinator::{
    logout_callback, CoordinatorOptions, LogoutCallback, RefreshCoordinator, SessionSnapshot,
};
pub use error::{RefreshError, SessionError};
pub use queue::{Rejected, WaiterQueue};
pub use refresh::{HttpRefreshEndpoint, RefreshEndpoint};
pub use store::{FileBackend, KeyValueBackend, MemoryBackend, StorageTokenStore, TokenStore};
pub use token::{SessionState, TokenPair};

/// Boxed future returned by the crate's object-safe async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Install the process-wide rustls provider used by the refresh client.
///
/// Safe to call more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
