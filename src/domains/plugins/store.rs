//! Persistence of installed plugin records.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::PluginError;
use super::manifest::PluginManifest;

/// Persisted record of an installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
    pub backend_id: String,
    /// Name of the source the manifest came from.
    pub source: String,
    pub manifest: PluginManifest,
}

#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn load(&self) -> Result<Vec<InstalledPlugin>, PluginError>;

    /// Replace the stored set.
    async fn save(&self, plugins: &[InstalledPlugin]) -> Result<(), PluginError>;
}

/// Records kept for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryStore {
    plugins: Mutex<Vec<InstalledPlugin>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginStore for MemoryStore {
    async fn load(&self) -> Result<Vec<InstalledPlugin>, PluginError> {
        Ok(self.plugins.lock().clone())
    }

    async fn save(&self, plugins: &[InstalledPlugin]) -> Result<(), PluginError> {
        *self.plugins.lock() = plugins.to_vec();
        Ok(())
    }
}

/// JSON file, replaced atomically on every save.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PluginStore for FileStore {
    async fn load(&self) -> Result<Vec<InstalledPlugin>, PluginError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                PluginError::store(format!("parsing {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(PluginError::store(format!(
                "reading {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn save(&self, plugins: &[InstalledPlugin]) -> Result<(), PluginError> {
        let raw = serde_json::to_vec_pretty(plugins).map_err(|e| PluginError::store(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PluginError::store(e.to_string()))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|e| PluginError::store(format!("writing {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PluginError::store(format!("replacing {}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), count = plugins.len(), "Saved plugin records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::plugins::manifest::BackendDescriptor;

    fn record(name: &str) -> InstalledPlugin {
        InstalledPlugin {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            enabled: true,
            installed_at: Utc::now(),
            backend_id: name.to_string(),
            source: "static".to_string(),
            manifest: PluginManifest {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                main: "echo".to_string(),
                category: String::new(),
                backend: BackendDescriptor {
                    backend_type: "echo".to_string(),
                    auth_methods: Vec::new(),
                    capabilities: Vec::new(),
                    id: Some(name.to_string()),
                },
            },
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("plugins.json");

        let store = FileStore::new(&path);
        assert!(store.load().await.unwrap().is_empty());
        store.save(&[record("a"), record("b")]).await.unwrap();

        let reopened = FileStore::new(&path);
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], record_with_time("a", loaded[0].installed_at));
        assert!(!path.with_extension("json.tmp").exists());
    }

    fn record_with_time(name: &str, at: DateTime<Utc>) -> InstalledPlugin {
        InstalledPlugin {
            installed_at: at,
            ..record(name)
        }
    }

    #[tokio::test]
    async fn test_file_store_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        std::fs::write(&path, b"[{").unwrap();
        assert!(matches!(
            FileStore::new(&path).load().await,
            Err(PluginError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.save(&[record("a")]).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);
        store.save(&[]).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
