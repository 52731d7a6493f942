// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;

fn memory_store() -> (MemoryBackend, StorageTokenStore) {
    let backend = MemoryBackend::new();
    let store = StorageTokenStore::new(Arc::new(backend.clone()), DEFAULT_STORAGE_KEY);
    (backend, store)
}

#[tokio::test]
async fn get_on_empty_backend_is_none() {
    let (_backend, store) = memory_store();
    assert_eq!(store.get().await, None);
}

#[tokio::test]
async fn set_then_get_returns_pair() -> anyhow::Result<()> {
    let (_backend, store) = memory_store();
    let pair = TokenPair::new("access-1", "refresh-1");
    store.set(Some(pair.clone())).await?;
    assert_eq!(store.get().await, Some(pair));
    Ok(())
}

#[tokio::test]
async fn stored_json_uses_camel_case_keys() -> anyhow::Result<()> {
    let (backend, store) = memory_store();
    store.set(Some(TokenPair::new("a", "r"))).await?;

    let raw = backend.get_item("auth").await?.unwrap_or_default();
    let json: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(json["accessToken"], "a");
    assert_eq!(json["refreshToken"], "r");
    Ok(())
}

#[tokio::test]
async fn set_none_clears() -> anyhow::Result<()> {
    let (backend, store) = memory_store();
    store.set(Some(TokenPair::new("a", "r"))).await?;
    store.set(None).await?;
    assert_eq!(store.get().await, None);
    assert_eq!(backend.get_item("auth").await?, None);
    Ok(())
}

#[tokio::test]
async fn clear_removes_pair() -> anyhow::Result<()> {
    let (_backend, store) = memory_store();
    store.set(Some(TokenPair::new("a", "r"))).await?;
    store.clear().await?;
    assert_eq!(store.get().await, None);
    Ok(())
}

#[yare::parameterized(
    not_json        = { "not json" },
    wrong_shape     = { r#"{"jwt":"a"}"# },
    missing_refresh = { r#"{"accessToken":"a"}"# },
    null            = { "null" },
    empty           = { "" },
)]
#[test_macro(tokio::test)]
async fn malformed_data_reads_as_none(raw: &str) -> anyhow::Result<()> {
    let (backend, store) = memory_store();
    backend.set_item("auth", raw.to_owned()).await?;
    assert_eq!(store.get().await, None);
    Ok(())
}

#[tokio::test]
async fn memory_backend_clones_share_storage() -> anyhow::Result<()> {
    let (backend, store_a) = memory_store();
    let store_b = StorageTokenStore::new(Arc::new(backend.clone()), DEFAULT_STORAGE_KEY);

    store_a.set(Some(TokenPair::new("shared", "r"))).await?;
    assert_eq!(store_b.get().await.map(|p| p.access_token), Some("shared".to_owned()));
    Ok(())
}

#[tokio::test]
async fn stores_with_different_keys_are_isolated() -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let a = StorageTokenStore::new(backend.clone(), "auth");
    let b = StorageTokenStore::new(backend, "other");

    a.set(Some(TokenPair::new("a", "r"))).await?;
    assert_eq!(b.get().await, None);
    Ok(())
}

// -- FileBackend ---------------------------------------------------------------

#[tokio::test]
async fn file_backend_round_trips_through_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = Arc::new(FileBackend::new(dir.path().join("nested")));
    let store = StorageTokenStore::new(backend.clone(), "auth");

    store.set(Some(TokenPair::new("disk-a", "disk-r"))).await?;
    assert!(dir.path().join("nested/auth.json").is_file());

    // A second store over the same directory sees the write.
    let other = StorageTokenStore::new(Arc::new(FileBackend::new(dir.path().join("nested"))), "auth");
    assert_eq!(other.get().await, Some(TokenPair::new("disk-a", "disk-r")));
    Ok(())
}

#[tokio::test]
async fn file_backend_leaves_no_temp_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = FileBackend::new(dir.path());
    for i in 0..5 {
        backend.set_item("auth", format!("{{\"n\":{i}}}")).await?;
    }

    let names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["auth.json".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn failed_rename_removes_temp_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // A non-empty directory where the key's file belongs makes the rename fail.
    std::fs::create_dir(dir.path().join("auth.json"))?;
    std::fs::write(dir.path().join("auth.json").join("occupied"), "x")?;
    let backend = FileBackend::new(dir.path());

    assert!(backend.set_item("auth", "{}".to_owned()).await.is_err());

    let leftovers: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
    Ok(())
}

#[tokio::test]
async fn file_backend_missing_file_is_none_and_remove_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = FileBackend::new(dir.path());
    assert_eq!(backend.get_item("auth").await?, None);
    backend.remove_item("auth").await?;
    backend.remove_item("auth").await?;
    Ok(())
}

#[tokio::test]
async fn file_backend_sanitizes_key_into_file_name() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = FileBackend::new(dir.path());
    backend.set_item("../escape/key", "{}".to_owned()).await?;
    assert!(dir.path().join("___escape_key.json").is_file());
    Ok(())
}
