// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::CoordinatorOptions;
use crate::refresh::DEFAULT_REFRESH_PATH;
use crate::store::DEFAULT_STORAGE_KEY;

/// Configuration shared by every `tokensync` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct SyncConfig {
    /// Directory holding the persisted session.
    #[arg(long, global = true, env = "TOKENSYNC_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Storage key of the session inside the state directory.
    #[arg(long, global = true, default_value = DEFAULT_STORAGE_KEY, env = "TOKENSYNC_STORAGE_KEY")]
    pub storage_key: String,

    /// Base URL of the API serving the refresh endpoint.
    #[arg(long, global = true, env = "TOKENSYNC_API_URL")]
    pub api_url: Option<String>,

    /// Path of the refresh endpoint under the API URL.
    #[arg(long, global = true, default_value = DEFAULT_REFRESH_PATH, env = "TOKENSYNC_REFRESH_PATH")]
    pub refresh_path: String,

    /// Broadcast channel (NATS subject) shared by all contexts.
    #[arg(long, global = true, default_value = "tokensync", env = "TOKENSYNC_CHANNEL")]
    pub channel: String,

    /// NATS server URL. Without it, contexts sync through storage only.
    #[arg(long, global = true, env = "TOKENSYNC_NATS_URL")]
    pub nats_url: Option<String>,

    /// NATS auth token.
    #[arg(long, global = true, env = "TOKENSYNC_NATS_TOKEN")]
    pub nats_token: Option<String>,

    /// Upper bound of the random delay before the first refresh, in milliseconds.
    #[arg(long, global = true, default_value_t = 500, env = "TOKENSYNC_COLD_START_MS")]
    pub cold_start_ms: u64,

    /// How long to wait on another context's refresh, in milliseconds (0 waits forever).
    #[arg(long, global = true, default_value_t = 30000, env = "TOKENSYNC_WAITER_TIMEOUT_MS")]
    pub waiter_timeout_ms: u64,

    /// Refresh request timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 30000, env = "TOKENSYNC_HTTP_TIMEOUT_MS")]
    pub http_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "TOKENSYNC_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, global = true, default_value = "text", env = "TOKENSYNC_LOG_FORMAT")]
    pub log_format: String,
}

impl SyncConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage_key.is_empty() {
            anyhow::bail!("--storage-key must not be empty");
        }
        if self.channel.is_empty() {
            anyhow::bail!("--channel must not be empty");
        }
        if self.http_timeout_ms == 0 {
            anyhow::bail!("--http-timeout-ms must be greater than zero");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("unknown log format: {other} (expected json or text)"),
        }
        if let Some(ref url) = self.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("--api-url must be an http(s) URL: {url}");
            }
        }
        Ok(())
    }

    /// API URL, required by subcommands that may refresh.
    pub fn require_api_url(&self) -> anyhow::Result<&str> {
        self.api_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--api-url (or TOKENSYNC_API_URL) is required"))
    }

    pub fn state_dir(&self) -> anyhow::Result<PathBuf> {
        resolve_state_dir(
            self.state_dir.as_deref(),
            std::env::var_os("XDG_STATE_HOME").as_deref().map(Path::new),
            std::env::var_os("HOME").as_deref().map(Path::new),
        )
    }

    pub fn cold_start_window(&self) -> Duration {
        Duration::from_millis(self.cold_start_ms)
    }

    pub fn waiter_timeout(&self) -> Option<Duration> {
        (self.waiter_timeout_ms > 0).then(|| Duration::from_millis(self.waiter_timeout_ms))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            cold_start_window: self.cold_start_window(),
            waiter_timeout: self.waiter_timeout(),
        }
    }

    #[cfg(feature = "nats")]
    pub fn nats_config(&self) -> Option<crate::bus::NatsBusConfig> {
        self.nats_url.as_ref().map(|url| crate::bus::NatsBusConfig {
            url: url.clone(),
            token: self.nats_token.clone(),
            subject: self.channel.clone(),
        })
    }
}

/// Pick the state directory: explicit, then `$XDG_STATE_HOME`, then `$HOME/.local/state`.
pub fn resolve_state_dir(
    explicit: Option<&Path>,
    xdg_state_home: Option<&Path>,
    home: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(xdg) = xdg_state_home.filter(|p| p.is_absolute()) {
        return Ok(xdg.join("tokensync"));
    }
    match home {
        Some(home) => Ok(home.join(".local/state/tokensync")),
        None => anyhow::bail!("cannot determine state directory; pass --state-dir"),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
