// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-value backends shared by every context of a deployment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::BoxFuture;

/// String key-value storage with no locking or transactions.
///
/// Reads of a missing key return `Ok(None)`. Last write wins.
pub trait KeyValueBackend: Send + Sync {
    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>>;
    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, anyhow::Result<()>>;
    fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// In-process backend. Clones share the same map, so every clone behaves
/// like another context on the same origin storage.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.items.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        let value = self.read().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, anyhow::Result<()>> {
        self.write().insert(key.to_owned(), value);
        Box::pin(async { Ok(()) })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        self.write().remove(key);
        Box::pin(async { Ok(()) })
    }
}

/// Directory-backed storage: one `<key>.json` file per key.
///
/// Writes go to a unique temp file that is then renamed over the target, so
/// concurrent processes never read a torn file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueBackend for FileBackend {
    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(self.path_for(key)).await {
                Ok(contents) => Ok(Some(contents)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            use std::sync::atomic::{AtomicU32, Ordering};
            static COUNTER: AtomicU32 = AtomicU32::new(0);

            tokio::fs::create_dir_all(&self.dir).await?;
            let path = self.path_for(key);
            let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
            let tmp_name = format!(
                "{}.{}.{}.tmp",
                path.file_name().unwrap_or_default().to_string_lossy(),
                std::process::id(),
                seq,
            );
            let tmp_path = path.with_file_name(tmp_name);
            let written = match tokio::fs::write(&tmp_path, value).await {
                Ok(()) => tokio::fs::rename(&tmp_path, &path).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::debug!(path = %tmp_path.display(), err = %cleanup, "failed to remove temp file");
                    }
                }
                return Err(e.into());
            }
            Ok(())
        })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
