//! Durable key/value store shared by every open instance.
//!
//! The host keeps one store for the whole extension; instances stay out of
//! each other's way purely through key prefixes, so there is no locking
//! across instances.
//!
//! Two implementations ship with the crate:
//! - `MemoryStateStore`: process-local, for tests and embedders.
//! - `JsonFileStateStore`: a single JSON object on disk, rewritten atomically.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// One persisted `(id, value)` pair as returned by `StateStore::list`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub id: String,
    pub value: Value,
}

/// Asynchronous durable store. Every call may fail independently.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, id: &str, value: Value) -> Result<(), StoreError>;

    async fn fetch(&self, id: &str) -> Result<Option<Value>, StoreError>;

    /// Removing an absent id succeeds.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Entries whose id is `namespace` or starts with `namespace:`, sorted by id.
    async fn list(&self, namespace: &str) -> Result<Vec<StateEntry>, StoreError>;
}

pub(crate) fn in_namespace(id: &str, namespace: &str) -> bool {
    match id.strip_prefix(namespace) {
        Some(rest) => rest.is_empty() || rest.starts_with(':'),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, Value>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, id: &str, value: Value) -> Result<(), StoreError> {
        self.entries.insert(id.to_string(), value);
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(id).map(|v| v.value().clone()))
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.entries.remove(id);
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<StateEntry>, StoreError> {
        let mut entries: Vec<StateEntry> = self
            .entries
            .iter()
            .filter(|e| in_namespace(e.key(), namespace))
            .map(|e| StateEntry {
                id: e.key().clone(),
                value: e.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Durable store backed by one JSON object file.
///
/// The file is read once at open; each mutation rewrites it through a temp
/// file + rename so a crash leaves either the old or the new contents.
pub struct JsonFileStateStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStateStore {
    /// Open (or lazily create) the store at `path`.
    /// A missing file starts empty; a corrupt file is logged and treated as empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Corrupt state file, starting empty: {e}"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state.json".to_string());
        let temp = self
            .path
            .with_file_name(format!("{file_name}.tmp.{}", std::process::id()));

        tokio::fs::write(&temp, &json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn save(&self, id: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(id.to_string(), value);
        if let Err(e) = self.persist(&entries).await {
            // Keep memory and disk in step when the write fails
            match previous {
                Some(old) => entries.insert(id.to_string(), old),
                None => entries.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().await.get(id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(id) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries).await {
            entries.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<StateEntry>, StoreError> {
        // BTreeMap iteration is already sorted by id
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(id, _)| in_namespace(id, namespace))
            .map(|(id, value)| StateEntry {
                id: id.clone(),
                value: value.clone(),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
