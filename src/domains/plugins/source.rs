//! Places plugin manifests are loaded from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::error::PluginError;
use super::manifest::PluginManifest;

/// File name of a manifest inside a package directory.
pub const MANIFEST_FILE: &str = "plugin.json";

/// A place plugin manifests can be resolved from.
#[async_trait]
pub trait PluginSource: Send + Sync {
    /// Short name recorded on installed plugins.
    fn name(&self) -> &str;

    /// `Ok(None)` when this source does not carry the package (or version).
    async fn resolve(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<Option<PluginManifest>, PluginError>;

    /// Remove source-side artifacts for a package.
    async fn remove(&self, _package: &str) -> Result<(), PluginError> {
        Ok(())
    }
}

fn version_matches(manifest: &PluginManifest, version: Option<&str>) -> bool {
    version.is_none_or(|v| manifest.version == v)
}

// ============================================================================
// Static catalog
// ============================================================================

/// Manifests compiled into the binary or registered by the embedder.
#[derive(Default)]
pub struct StaticSource {
    manifests: HashMap<String, PluginManifest>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(mut self, manifest: PluginManifest) -> Self {
        self.manifests.insert(manifest.name.clone(), manifest);
        self
    }
}

#[async_trait]
impl PluginSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn resolve(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<Option<PluginManifest>, PluginError> {
        Ok(self
            .manifests
            .get(package)
            .filter(|m| version_matches(m, version))
            .cloned())
    }
}

// ============================================================================
// Local directory
// ============================================================================

/// `<dir>/<package>/plugin.json` manifests on disk.
pub struct LocalDirSource {
    dir: PathBuf,
}

impl LocalDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn package_dir(&self, package: &str) -> Result<PathBuf, PluginError> {
        let valid = !package.is_empty()
            && package
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@'));
        if !valid {
            return Err(PluginError::invalid_manifest(
                package,
                "package name contains invalid characters",
            ));
        }
        Ok(self.dir.join(package))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl PluginSource for LocalDirSource {
    fn name(&self) -> &str {
        "local"
    }

    async fn resolve(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<Option<PluginManifest>, PluginError> {
        let path = self.package_dir(package)?.join(MANIFEST_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PluginError::load_failed(
                    package,
                    format!("reading {}: {}", path.display(), e),
                ));
            }
        };
        let manifest: PluginManifest = serde_json::from_slice(&raw)
            .map_err(|e| PluginError::invalid_manifest(package, e.to_string()))?;
        debug!(package = %package, path = %path.display(), "Loaded local manifest");
        Ok(Some(manifest).filter(|m| version_matches(m, version)))
    }

    async fn remove(&self, package: &str) -> Result<(), PluginError> {
        let dir = self.package_dir(package)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(package = %package, "Removed local plugin directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PluginError::store(format!(
                "removing {}: {}",
                dir.display(),
                e
            ))),
        }
    }
}

// ============================================================================
// Remote registry
// ============================================================================

/// Manifests served over HTTP at `<base>/<package>` or
/// `<base>/<package>/<version>`.
pub struct RegistrySource {
    base_url: String,
    client: reqwest::Client,
}

impl RegistrySource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn manifest_url(&self, package: &str, version: Option<&str>) -> String {
        match version {
            Some(v) => format!("{}/{}/{}", self.base_url, package, v),
            None => format!("{}/{}", self.base_url, package),
        }
    }
}

#[async_trait]
impl PluginSource for RegistrySource {
    fn name(&self) -> &str {
        "registry"
    }

    async fn resolve(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<Option<PluginManifest>, PluginError> {
        let url = self.manifest_url(package, version);
        debug!(url = %url, "Fetching manifest");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PluginError::load_failed(package, e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| PluginError::load_failed(package, e.to_string()))?;

        let manifest: PluginManifest = response
            .json()
            .await
            .map_err(|e| PluginError::invalid_manifest(package, e.to_string()))?;
        Ok(Some(manifest).filter(|m| version_matches(m, version)))
    }
}
