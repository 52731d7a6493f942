// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `tokensync` binary as a subprocess against a mock refresh
//! API, with each test isolated in its own state directory.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};

use tokensync::refresh::DEFAULT_REFRESH_PATH;
use tokensync::test_support::jwt_expiring_in;

/// Resolve the path to the compiled `tokensync` binary.
pub fn tokensync_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tokensync")
}

/// How the mock API answers refresh requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Accept only the latest refresh token and rotate it.
    Rotate,
    /// Reject every refresh token as invalidated.
    Revoke,
}

/// A mock refresh API served on a random local port.
pub struct MockApi {
    addr: SocketAddr,
    calls: Arc<AtomicU32>,
}

impl MockApi {
    pub async fn start(mode: RefreshMode, initial_refresh: &str) -> anyhow::Result<Self> {
        let calls = Arc::new(AtomicU32::new(0));
        let current = Arc::new(Mutex::new(initial_refresh.to_owned()));

        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            DEFAULT_REFRESH_PATH,
            post(move |Json(body): Json<serde_json::Value>| {
                let counter = Arc::clone(&counter);
                let current = Arc::clone(&current);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if mode == RefreshMode::Revoke {
                        return Json(serde_json::json!({
                            "errors": ["Refresh token is expired or does not exist"]
                        }));
                    }
                    let presented = body["refreshToken"].as_str().unwrap_or_default().to_owned();
                    let mut current = match current.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if presented != *current {
                        return Json(serde_json::json!({ "errors": ["refresh token already used"] }));
                    }
                    *current = format!("r{n}");
                    Json(serde_json::json!({
                        "errors": [],
                        "responseData": { "jwt": jwt_expiring_in(3600), "refreshToken": *current }
                    }))
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, calls })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// An isolated state directory plus the API the binary talks to.
pub struct Workspace {
    dir: tempfile::TempDir,
    api_url: String,
}

impl Workspace {
    pub fn new(api_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self { dir: tempfile::tempdir()?, api_url: api_url.into() })
    }

    pub fn state_dir(&self) -> &Path {
        self.dir.path()
    }

    fn command(&self, args: &[&str]) -> anyhow::Result<Command> {
        let binary = tokensync_binary();
        anyhow::ensure!(binary.exists(), "tokensync binary not found at {}", binary.display());

        let mut cmd = Command::new(&binary);
        cmd.args(args)
            .env("TOKENSYNC_STATE_DIR", self.dir.path())
            .env("TOKENSYNC_API_URL", &self.api_url)
            .env("TOKENSYNC_COLD_START_MS", "0")
            .env("TOKENSYNC_LOG_LEVEL", "warn")
            .env_remove("TOKENSYNC_NATS_URL")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }

    /// Access token currently persisted in the state directory.
    pub fn stored_access_token(&self) -> anyhow::Result<Option<String>> {
        let path = self.dir.path().join("auth.json");
        if !path.exists() {
            return Ok(None);
        }
        let stored: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Ok(stored["accessToken"].as_str().map(str::to_owned))
    }

    /// Run one subcommand to completion.
    pub async fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        let output = self.command(args)?.output().await?;
        Ok(output)
    }

    /// Spawn a long-running subcommand; it is killed on drop.
    pub fn spawn(&self, args: &[&str]) -> anyhow::Result<Child> {
        let child = self.command(args)?.stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;
        Ok(child)
    }

    /// Seed the session with an access token expiring `secs` from now.
    pub async fn login(&self, secs: i64, refresh_token: &str) -> anyhow::Result<String> {
        let access = jwt_expiring_in(secs);
        let output = self
            .run(&["login", "--access-token", access.as_str(), "--refresh-token", refresh_token])
            .await?;
        anyhow::ensure!(output.status.success(), "login failed: {}", stderr(&output));
        Ok(access)
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}

pub const TIMEOUT: Duration = Duration::from_secs(10);
