// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tokensync` subcommands.
//!
//! Each invocation is one context: it shares the file-backed session with
//! every other process using the same state directory, and the NATS subject
//! when one is configured.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::{BroadcastBus, BroadcastMessage, NullBus};
use crate::clock::epoch_ms;
use crate::config::SyncConfig;
use crate::coordinator::{logout_callback, RefreshCoordinator};
use crate::refresh::HttpRefreshEndpoint;
use crate::store::{FileBackend, StorageTokenStore, TokenStore};
use crate::token::{SessionState, TokenPair};

#[derive(Debug, clap::Parser)]
#[command(name = "tokensync", version, about = "Keep one session token pair alive across processes")]
pub struct Cli {
    #[command(flatten)]
    pub config: SyncConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Store a token pair as the current session.
    Login(LoginArgs),
    /// Print a valid access token, refreshing it first if expired.
    Token,
    /// Show the stored session without refreshing it.
    Status,
    /// Clear the stored session.
    Logout,
    /// Keep the session alive until interrupted.
    Watch(WatchArgs),
}

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    /// Access token (a JWT carrying an `exp` claim).
    #[arg(long, env = "TOKENSYNC_ACCESS_TOKEN")]
    pub access_token: String,
    /// Refresh token.
    #[arg(long, env = "TOKENSYNC_REFRESH_TOKEN")]
    pub refresh_token: String,
}

#[derive(Debug, clap::Args)]
pub struct WatchArgs {
    /// How often to check the session, in milliseconds.
    #[arg(long, default_value_t = 60000)]
    pub interval_ms: u64,
}

/// Run a parsed command line. Returns a process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config;
    let store = open_store(&config)?;
    match cli.command {
        Command::Login(args) => login(&store, args).await,
        Command::Token => token(&config, store).await,
        Command::Status => status(&store).await,
        Command::Logout => {
            store.clear().await?;
            println!("session cleared");
            Ok(0)
        }
        Command::Watch(args) => watch(&config, store, args).await,
    }
}

fn open_store(config: &SyncConfig) -> anyhow::Result<Arc<StorageTokenStore>> {
    let dir = config.state_dir()?;
    tracing::debug!(dir = %dir.display(), key = %config.storage_key, "using file-backed session store");
    Ok(Arc::new(StorageTokenStore::new(Arc::new(FileBackend::new(dir)), config.storage_key.clone())))
}

/// Connect the broadcast bus. A bus that cannot connect degrades to storage-only sync.
#[cfg(feature = "nats")]
async fn open_bus(config: &SyncConfig) -> Arc<dyn BroadcastBus<BroadcastMessage>> {
    if let Some(nats) = config.nats_config() {
        match crate::bus::NatsBus::connect(&nats).await {
            Ok(bus) => return Arc::new(bus),
            Err(e) => tracing::warn!(err = %e, "NATS bus unavailable; syncing through storage only"),
        }
    }
    Arc::new(NullBus)
}

#[cfg(not(feature = "nats"))]
async fn open_bus(config: &SyncConfig) -> Arc<dyn BroadcastBus<BroadcastMessage>> {
    if config.nats_url.is_some() {
        tracing::warn!("built without NATS support; ignoring --nats-url");
    }
    Arc::new(NullBus)
}

async fn open_coordinator(
    config: &SyncConfig,
    store: Arc<StorageTokenStore>,
) -> anyhow::Result<Arc<RefreshCoordinator>> {
    let endpoint = HttpRefreshEndpoint::new(
        config.require_api_url()?,
        &config.refresh_path,
        config.http_timeout(),
    )?;
    let bus = open_bus(config).await;
    Ok(RefreshCoordinator::new(store, bus, Arc::new(endpoint), config.coordinator_options()))
}

async fn login(store: &StorageTokenStore, args: LoginArgs) -> anyhow::Result<i32> {
    let pair = TokenPair::new(args.access_token, args.refresh_token);
    let state = SessionState::from_pair(pair.clone());
    store.set(Some(pair)).await?;
    if state.expiration_epoch_ms < 0 {
        eprintln!("warning: access token carries no readable expiry; it will never be refreshed");
    }
    println!("session stored");
    Ok(0)
}

async fn token(config: &SyncConfig, store: Arc<StorageTokenStore>) -> anyhow::Result<i32> {
    let coordinator = open_coordinator(config, store).await?;
    coordinator
        .initialize(logout_callback(|| async {
            eprintln!("session invalidated by the server; log in again");
            Ok(())
        }))
        .await;

    let result = coordinator.get_access_token_or_throw().await;
    coordinator.shutdown();
    match result {
        Ok(token) => {
            println!("{token}");
            Ok(0)
        }
        Err(e) => {
            eprintln!("error: {e} ({})", e.as_str());
            Ok(1)
        }
    }
}

/// Report the stored session. Never refreshes.
async fn status(store: &StorageTokenStore) -> anyhow::Result<i32> {
    let session = match store.get().await {
        Some(pair) => SessionState::from_pair(pair),
        None => SessionState::empty(),
    };
    let now = epoch_ms();
    let report = serde_json::json!({
        "session": session.tokens.is_some(),
        "expiresAtMs": session.expiration_epoch_ms,
        "expired": session.is_expired_at(now),
        "remainingMs": (session.expiration_epoch_ms >= 0).then(|| session.expiration_epoch_ms - now),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if session.tokens.is_some() { 0 } else { 1 })
}

async fn watch(
    config: &SyncConfig,
    store: Arc<StorageTokenStore>,
    args: WatchArgs,
) -> anyhow::Result<i32> {
    let coordinator = open_coordinator(config, store).await?;
    let ended = CancellationToken::new();
    let on_logout = ended.clone();
    coordinator
        .initialize(logout_callback(move || {
            let on_logout = on_logout.clone();
            async move {
                on_logout.cancel();
                Ok(())
            }
        }))
        .await;

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut current = coordinator.session_state().session.access_token().map(str::to_owned);
    tracing::info!(interval_ms = args.interval_ms, has_session = current.is_some(), "watching session");

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break 0;
            }
            _ = ended.cancelled() => {
                tracing::warn!("session ended by the server");
                break 1;
            }
            _ = interval.tick() => {
                let token = coordinator.get_access_token().await;
                if token.is_none() {
                    tracing::warn!("no session to keep alive");
                    break 1;
                }
                if token != current {
                    let expires_at_ms = coordinator.session_state().session.expiration_epoch_ms;
                    tracing::info!(expires_at_ms, "access token renewed");
                    current = token;
                }
            }
        }
    };

    coordinator.shutdown();
    Ok(code)
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
