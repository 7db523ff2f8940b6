//! Key-Value Store
//!
//! Persistence boundary for connector state, most importantly the
//! shim-disconnect flag that simulates a disconnected state for wallets
//! without a programmatic disconnect. The interface is deliberately a
//! string-to-string async map so hosts can back it with whatever storage
//! they already have.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors raised by a [`KeyValueStore`] backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(String),

    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Async string-keyed storage used by connectors for state that must
/// outlive the process (or at least the connector instance)
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value, `None` when the key has never been set or was removed
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite a value
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

/// Convenience alias for the shared trait-object form connectors hold
pub type SharedStore = Arc<dyn KeyValueStore>;

// =========================================================================
// In-Memory Store
// =========================================================================

/// Process-local store. The default backend for tests and short-lived
/// tools; contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: std::sync::RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

// =========================================================================
// File-Backed Store
// =========================================================================

/// On-disk document format for [`FileStore`]
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    /// RFC 3339 timestamp of the last write
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    entries: HashMap<String, String>,
}

/// JSON-file backed store. Every write rewrites the whole document;
/// fine for the handful of keys connectors keep.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles against the same file.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreDocument, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(StoreDocument::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn flush(&self, mut doc: StoreDocument) -> Result<(), StoreError> {
        doc.updated_at = Some(Utc::now().to_rfc3339());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let raw = serde_json::to_string_pretty(&doc)?;
        tokio::fs::write(&self.path, raw).await?;
        debug!("Flushed {} store entries to {:?}", doc.entries.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let doc = self.load().await?;
        Ok(doc.entries.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        doc.entries.insert(key.to_string(), value.to_string());
        self.flush(doc).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        if doc.entries.remove(key).is_none() {
            return Ok(());
        }
        self.flush(doc).await
    }
}
