//! Artifact storage backends
//!
//! Job outputs are written through the [`ArtifactStore`] trait so the engine
//! never depends on where artifacts end up. Writes go through
//! [`put_with_retry`], which retries transient failures with exponential
//! backoff before giving up.

use crate::error::{Error, InternalError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Trait for artifact storage implementations
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under a relative key, returning a reference clients can fetch
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    /// Read an artifact back
    ///
    /// Returns `Ok(None)` when nothing is stored under the key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Short description used in logs
    fn describe(&self) -> String;
}

/// Write an artifact, retrying transient failures
///
/// The first retry waits `backoff`, each later one twice as long as the
/// previous. Non-transient errors are returned immediately.
pub async fn put_with_retry(
    store: &dyn ArtifactStore,
    key: &str,
    bytes: Vec<u8>,
    attempts: u32,
    backoff: Duration,
) -> Result<String> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match store.put(key, bytes.clone()).await {
            Ok(reference) => return Ok(reference),
            Err(e) if e.is_transient() && attempt < attempts => {
                log::warn!(
                    "Storing '{key}' in {} failed (attempt {attempt}/{attempts}): {e}; retrying in {}ms",
                    store.describe(),
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reject keys that would escape the store root
fn check_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let safe = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(InternalError::storage("put", format!("invalid artifact key '{key}'"), false).into())
    }
}

/// Artifacts stored as files below a root directory
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FileSystemStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        check_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // write then rename so readers never see a partial artifact
        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(path.display().to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        match tokio::fs::read(self.root.join(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

/// In-memory artifact store
///
/// [`MemoryStore::failing`] makes the first `n` writes fail with a transient
/// storage error, for exercising retry paths.
#[derive(Default)]
pub struct MemoryStore {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
    failures_left: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose first `failures` writes fail transiently
    pub fn failing(failures: u32) -> Self {
        Self {
            artifacts: RwLock::new(HashMap::new()),
            failures_left: AtomicU32::new(failures),
        }
    }

    /// Keys currently stored, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.artifacts.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        check_key(key)?;
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(InternalError::storage("put", "simulated outage", true).into());
        }
        self.artifacts.write().await.insert(key.to_string(), bytes);
        Ok(format!("memory://{key}"))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.artifacts.read().await.get(key).cloned())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
