// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `tokensync` binary.

use tokensync_specs::{stderr, stdout, MockApi, RefreshMode, Workspace, TIMEOUT};

#[tokio::test]
async fn token_prints_valid_session_without_refreshing() -> anyhow::Result<()> {
    let api = MockApi::start(RefreshMode::Rotate, "r0").await?;
    let ws = Workspace::new(api.url())?;
    let access = ws.login(3600, "r0").await?;

    let output = ws.run(&["token"]).await?;

    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), access);
    assert_eq!(api.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn token_refreshes_expired_session_and_persists_it() -> anyhow::Result<()> {
    let api = MockApi::start(RefreshMode::Rotate, "r0").await?;
    let ws = Workspace::new(api.url())?;
    let stale = ws.login(-60, "r0").await?;

    let first = ws.run(&["token"]).await?;
    assert!(first.status.success(), "{}", stderr(&first));
    assert_ne!(stdout(&first), stale);
    assert_eq!(api.calls(), 1);

    // A second process finds the refreshed session on disk.
    let second = ws.run(&["token"]).await?;
    assert_eq!(stdout(&second), stdout(&first));
    assert_eq!(api.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn revoked_session_is_cleared() -> anyhow::Result<()> {
    let api = MockApi::start(RefreshMode::Revoke, "r0").await?;
    let ws = Workspace::new(api.url())?;
    ws.login(-60, "r0").await?;

    let output = ws.run(&["token"]).await?;
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("MISSING_ACCESS_TOKEN"), "{}", stderr(&output));

    let status = ws.run(&["status"]).await?;
    assert_eq!(status.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_str(&stdout(&status))?;
    assert_eq!(report["session"], false);
    Ok(())
}

#[tokio::test]
async fn status_reports_expiry_and_logout_clears() -> anyhow::Result<()> {
    let api = MockApi::start(RefreshMode::Rotate, "r0").await?;
    let ws = Workspace::new(api.url())?;
    ws.login(-60, "r0").await?;

    let status = ws.run(&["status"]).await?;
    assert!(status.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&status))?;
    assert_eq!(report["session"], true);
    assert_eq!(report["expired"], true);
    assert_eq!(api.calls(), 0);

    assert!(ws.run(&["logout"]).await?.status.success());
    assert!(!ws.state_dir().join("auth.json").exists());
    Ok(())
}

#[tokio::test]
async fn concurrent_processes_converge_on_one_session() -> anyhow::Result<()> {
    let api = MockApi::start(RefreshMode::Rotate, "r0").await?;
    let ws = Workspace::new(api.url())?;
    ws.login(-60, "r0").await?;

    let (a, b) = tokio::join!(ws.run(&["token"]), ws.run(&["token"]));
    let (a, b) = (a?, b?);
    assert!(a.status.success(), "{}", stderr(&a));
    assert!(b.status.success(), "{}", stderr(&b));
    // Without a bus the two processes do not coordinate. The loser's
    // startup refresh is refused, and so is the retry from the token request
    // that precedes its storage re-read: up to three calls in total.
    let calls = api.calls();
    assert!((1..=3).contains(&calls), "calls = {calls}");

    // Exactly one rotation landed on disk and later processes reuse it.
    let stored = ws.stored_access_token()?;
    assert!(stored.is_some());
    assert!(stored.as_deref() == Some(stdout(&a).as_str()) || stored.as_deref() == Some(stdout(&b).as_str()));

    let settled = ws.run(&["token"]).await?;
    assert!(settled.status.success(), "{}", stderr(&settled));
    assert_eq!(Some(stdout(&settled)), stored);
    assert_eq!(api.calls(), calls);
    Ok(())
}

#[tokio::test]
async fn watch_exits_when_session_is_revoked() -> anyhow::Result<()> {
    let api = MockApi::start(RefreshMode::Revoke, "r0").await?;
    let ws = Workspace::new(api.url())?;
    ws.login(-60, "r0").await?;

    let mut child = ws.spawn(&["watch", "--interval-ms", "50"])?;
    let status = tokio::time::timeout(TIMEOUT, child.wait()).await??;

    assert_eq!(status.code(), Some(1));
    Ok(())
}
