use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use companion_proto::CompanionData;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("preferences io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preferences encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Namespaced string preferences, the shape of the platform's persistent
/// key/value store.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError>;

    async fn put_string(&self, namespace: &str, key: &str, value: String)
        -> Result<(), CacheError>;

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), CacheError>;
}

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

/// In-memory adapter for tests and the simulator.
#[derive(Default)]
pub struct InMemoryPreferences {
    values: RwLock<Namespaces>,
}

impl InMemoryPreferences {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferences {
    async fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .values
            .read()
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put_string(
        &self,
        namespace: &str,
        key: &str,
        value: String,
    ) -> Result<(), CacheError> {
        self.values
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        if let Some(entries) = self.values.write().get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Preferences kept in a single JSON document on disk. Writes go through a
/// temp file and a rename; a missing or unreadable document reads as empty.
pub struct FilePreferences {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Namespaces, CacheError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Namespaces::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(values) => Ok(values),
            Err(err) => {
                warn!(
                    target = "companion.cache",
                    path = %self.path.display(),
                    error = %err,
                    "preferences file is corrupt; treating as empty"
                );
                Ok(Namespaces::new())
            }
        }
    }

    async fn write_all(&self, values: &Namespaces) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(values)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferences {
    async fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        let values = self.read_all().await?;
        Ok(values
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put_string(
        &self,
        namespace: &str,
        key: &str,
        value: String,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.read_all().await?;
        values
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.write_all(&values).await
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.read_all().await?;
        let removed = values
            .get_mut(namespace)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            self.write_all(&values).await?;
        }
        Ok(())
    }
}

/// The one preference slot holding the last-known snapshot.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn PreferenceStore>,
    namespace: String,
    key: String,
}

impl SnapshotCache {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Last persisted snapshot, or the empty default when nothing usable is
    /// stored. Never fails.
    pub async fn load(&self) -> CompanionData {
        let raw = match self.store.get_string(&self.namespace, &self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(target = "companion.cache", "no cached snapshot");
                return CompanionData::empty();
            }
            Err(err) => {
                warn!(target = "companion.cache", error = %err, "failed to read cached snapshot");
                return CompanionData::empty();
            }
        };
        match CompanionData::from_json(&raw) {
            Ok(data) => data,
            Err(err) => {
                warn!(target = "companion.cache", error = %err, "cached snapshot is corrupt");
                CompanionData::empty()
            }
        }
    }

    /// Persists `data`; failures are logged and dropped.
    pub async fn store(&self, data: &CompanionData) {
        let json = match data.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(target = "companion.cache", error = %err, "failed to encode snapshot");
                return;
            }
        };
        if let Err(err) = self.store.put_string(&self.namespace, &self.key, json).await {
            warn!(target = "companion.cache", error = %err, "failed to persist snapshot");
        }
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.store.remove(&self.namespace, &self.key).await
    }
}
