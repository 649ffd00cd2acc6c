//! Runtime plugin lifecycle.
//!
//! Install resolves a manifest from the configured sources, resolves its
//! `main` entry against the module catalog, verifies the capability surface,
//! and registers the adapter. Lifecycle operations on the same package are
//! serialized; different packages proceed concurrently.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::capability::{CapabilityReport, verify_capabilities};
use super::error::PluginError;
use super::manifest::{BackendDescriptor, PluginManifest};
use super::module::{ModuleCatalog, ModuleFactory, PluginModule};
use super::source::{LocalDirSource, PluginSource, RegistrySource, StaticSource};
use super::store::{FileStore, InstalledPlugin, MemoryStore, PluginStore};
use crate::core::config::PluginsConfig;
use crate::domains::adapters::builtin::EchoAdapter;
use crate::domains::adapters::{AdapterRegistry, RegistryError, panic_message};
use crate::domains::monitor::PerformanceMonitor;

/// Bound on resolving a manifest from a single source.
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Package name of the bundled echo plugin.
pub const ECHO_PLUGIN: &str = "gateway-echo";

/// Plugin lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PluginEvent {
    Installed {
        name: String,
        version: String,
        backend_id: String,
    },
    InstallFailed {
        name: String,
        message: String,
    },
    Uninstalled {
        name: String,
    },
    Enabled {
        name: String,
    },
    Disabled {
        name: String,
    },
}

struct PluginEntry {
    record: InstalledPlugin,
    module: Arc<dyn PluginModule>,
}

pub struct PluginManager {
    allow_runtime_install: bool,
    registry: Arc<AdapterRegistry>,
    monitor: Arc<PerformanceMonitor>,
    catalog: ModuleCatalog,
    sources: Vec<Arc<dyn PluginSource>>,
    store: Arc<dyn PluginStore>,
    plugins: RwLock<BTreeMap<String, PluginEntry>>,
    name_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<PluginEvent>,
}

/// Manifest of the bundled echo plugin.
pub fn echo_manifest() -> PluginManifest {
    PluginManifest {
        name: ECHO_PLUGIN.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        main: EchoAdapter::TYPE.to_string(),
        category: "diagnostics".to_string(),
        backend: BackendDescriptor {
            backend_type: EchoAdapter::TYPE.to_string(),
            auth_methods: Vec::new(),
            capabilities: vec!["echo".to_string()],
            id: None,
        },
    }
}

/// Sources in lookup order: bundled catalog, local directory, remote registry.
pub fn sources_from_config(config: &PluginsConfig) -> Vec<Arc<dyn PluginSource>> {
    let mut sources: Vec<Arc<dyn PluginSource>> =
        vec![Arc::new(StaticSource::new().with_manifest(echo_manifest()))];
    if let Some(dir) = &config.local_dir {
        sources.push(Arc::new(LocalDirSource::new(dir.clone())));
    }
    if let Some(url) = &config.registry_url {
        sources.push(Arc::new(RegistrySource::new(url.clone())));
    }
    sources
}

pub fn store_from_config(config: &PluginsConfig) -> Arc<dyn PluginStore> {
    match &config.store_path {
        Some(path) => Arc::new(FileStore::new(path.clone())),
        None => Arc::new(MemoryStore::new()),
    }
}

impl PluginManager {
    pub fn new(
        config: &PluginsConfig,
        registry: Arc<AdapterRegistry>,
        monitor: Arc<PerformanceMonitor>,
        catalog: ModuleCatalog,
        sources: Vec<Arc<dyn PluginSource>>,
        store: Arc<dyn PluginStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!(
            sources = sources.len(),
            modules = catalog.entries().len(),
            allow_runtime_install = config.allow_runtime_install,
            "Initializing PluginManager"
        );
        Self {
            allow_runtime_install: config.allow_runtime_install,
            registry,
            monitor,
            catalog,
            sources,
            store,
            plugins: RwLock::new(BTreeMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: PluginEvent) {
        debug!(?event, "Plugin event");
        let _ = self.events.send(event);
    }

    fn ensure_allowed(&self) -> Result<(), PluginError> {
        if self.allow_runtime_install {
            Ok(())
        } else {
            Err(PluginError::InstallDisabled)
        }
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.name_locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Write the current record set. Failures are logged; the in-memory
    /// state stays authoritative.
    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let records: Vec<InstalledPlugin> = self
            .plugins
            .read()
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        if let Err(err) = self.store.save(&records).await {
            error!(error = %err, "Failed to persist plugin records");
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Ask each source in turn; the first one carrying the package wins.
    /// Source code runs on its own task so a panic cannot escape.
    async fn resolve_manifest(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<(PluginManifest, String), PluginError> {
        for source in &self.sources {
            let task_source = Arc::clone(source);
            let task_package = package.to_string();
            let task_version = version.map(str::to_string);
            let handle = tokio::spawn(async move {
                task_source
                    .resolve(&task_package, task_version.as_deref())
                    .await
            });

            let resolved = match tokio::time::timeout(LOAD_TIMEOUT, handle).await {
                Ok(Ok(result)) => result?,
                Ok(Err(join_err)) if join_err.is_panic() => {
                    return Err(PluginError::load_failed(
                        package,
                        format!(
                            "source '{}' panicked: {}",
                            source.name(),
                            panic_message(join_err.into_panic())
                        ),
                    ));
                }
                Ok(Err(join_err)) => {
                    return Err(PluginError::load_failed(package, join_err.to_string()));
                }
                Err(_) => {
                    return Err(PluginError::load_failed(
                        package,
                        format!("source '{}' timed out", source.name()),
                    ));
                }
            };

            if let Some(manifest) = resolved {
                debug!(package = %package, source = %source.name(), "Resolved manifest");
                return Ok((manifest, source.name().to_string()));
            }
        }

        Err(PluginError::not_found(match version {
            Some(v) => format!("{}@{}", package, v),
            None => package.to_string(),
        }))
    }

    fn load_module(&self, manifest: &PluginManifest) -> Result<Arc<dyn PluginModule>, PluginError> {
        let module = self.catalog.get(&manifest.main).ok_or_else(|| {
            PluginError::load_failed(
                &manifest.name,
                format!("unknown entry point '{}'", manifest.main),
            )
        })?;

        let report = Self::verify_module(&manifest.name, module.as_ref())?;
        if !report.valid {
            return Err(PluginError::Validation {
                name: manifest.name.clone(),
                missing: report.missing_capabilities,
            });
        }
        Ok(module)
    }

    fn verify_module(
        name: &str,
        module: &dyn PluginModule,
    ) -> Result<CapabilityReport, PluginError> {
        let declared = catch_unwind(AssertUnwindSafe(|| module.capabilities())).map_err(|payload| {
            PluginError::load_failed(name, format!("panicked: {}", panic_message(payload)))
        })?;
        Ok(verify_capabilities(&declared))
    }

    async fn activate(&self, entry: &PluginEntry) -> Result<(), PluginError> {
        let config = entry.record.manifest.backend_config();
        self.registry
            .register_backend(config, &ModuleFactory(Arc::clone(&entry.module)))
            .await?;
        self.monitor
            .register_backend(&entry.record.backend_id, &entry.record.name);
        Ok(())
    }

    async fn deactivate(&self, record: &InstalledPlugin) {
        match self.registry.unregister_backend(&record.backend_id).await {
            Ok(()) | Err(RegistryError::BackendNotFound(_)) => {}
            Err(err) => {
                warn!(plugin = %record.name, error = %err, "Unregistering backend failed");
            }
        }
        self.monitor.unregister_backend(&record.backend_id);
    }

    // ========================================================================
    // Lifecycle operations
    // ========================================================================

    /// Install a package, replacing any installed instance of the same name.
    #[instrument(skip(self))]
    pub async fn install_plugin(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<InstalledPlugin, PluginError> {
        self.ensure_allowed()?;
        let lock = self.name_lock(package);
        let _guard = lock.lock().await;

        if self.plugins.read().contains_key(package) {
            info!(plugin = %package, "Reinstalling: removing previous instance");
            self.uninstall_locked(package, false).await?;
        }

        match self.install_locked(package, version).await {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(plugin = %package, error = %err, "Plugin install failed");
                self.publish(PluginEvent::InstallFailed {
                    name: package.to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn install_locked(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<InstalledPlugin, PluginError> {
        let (manifest, source) = self.resolve_manifest(package, version).await?;
        manifest.validate(package)?;
        let module = self.load_module(&manifest)?;

        let entry = PluginEntry {
            record: InstalledPlugin {
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                enabled: true,
                installed_at: Utc::now(),
                backend_id: manifest.backend_id().to_string(),
                source,
                manifest,
            },
            module,
        };
        self.activate(&entry).await?;

        let record = entry.record.clone();
        self.plugins.write().insert(package.to_string(), entry);
        self.persist().await;

        info!(
            plugin = %record.name,
            version = %record.version,
            backend_id = %record.backend_id,
            "Plugin installed"
        );
        self.publish(PluginEvent::Installed {
            name: record.name.clone(),
            version: record.version.clone(),
            backend_id: record.backend_id.clone(),
        });
        Ok(record)
    }

    /// Remove a package. Source-side cleanup is best-effort.
    #[instrument(skip(self))]
    pub async fn uninstall_plugin(&self, package: &str) -> Result<(), PluginError> {
        self.ensure_allowed()?;
        let lock = self.name_lock(package);
        let _guard = lock.lock().await;
        self.uninstall_locked(package, true).await
    }

    async fn uninstall_locked(&self, package: &str, remove_artifacts: bool) -> Result<(), PluginError> {
        let entry = self
            .plugins
            .write()
            .remove(package)
            .ok_or_else(|| PluginError::not_found(package))?;

        if entry.record.enabled {
            self.deactivate(&entry.record).await;
        }
        self.persist().await;

        if remove_artifacts {
            let source = self
                .sources
                .iter()
                .find(|s| s.name() == entry.record.source);
            if let Some(source) = source {
                if let Err(err) = source.remove(package).await {
                    warn!(plugin = %package, error = %err, "Source cleanup failed");
                }
            }
        }

        info!(plugin = %package, "Plugin uninstalled");
        self.publish(PluginEvent::Uninstalled {
            name: package.to_string(),
        });
        Ok(())
    }

    /// Register the adapter of an installed, disabled plugin.
    #[instrument(skip(self))]
    pub async fn enable_plugin(&self, package: &str) -> Result<InstalledPlugin, PluginError> {
        self.ensure_allowed()?;
        let lock = self.name_lock(package);
        let _guard = lock.lock().await;

        let (record, module) = {
            let plugins = self.plugins.read();
            let entry = plugins
                .get(package)
                .ok_or_else(|| PluginError::not_found(package))?;
            (entry.record.clone(), Arc::clone(&entry.module))
        };
        if record.enabled {
            return Ok(record);
        }

        let entry = PluginEntry { record, module };
        self.activate(&entry).await?;
        let record = self.set_enabled(package, true);
        self.persist().await;

        info!(plugin = %package, "Plugin enabled");
        self.publish(PluginEvent::Enabled {
            name: package.to_string(),
        });
        record.ok_or_else(|| PluginError::not_found(package))
    }

    /// Unregister the adapter but keep the record.
    #[instrument(skip(self))]
    pub async fn disable_plugin(&self, package: &str) -> Result<InstalledPlugin, PluginError> {
        self.ensure_allowed()?;
        let lock = self.name_lock(package);
        let _guard = lock.lock().await;

        let record = self
            .plugins
            .read()
            .get(package)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| PluginError::not_found(package))?;
        if !record.enabled {
            return Ok(record);
        }

        self.deactivate(&record).await;
        let record = self.set_enabled(package, false);
        self.persist().await;

        info!(plugin = %package, "Plugin disabled");
        self.publish(PluginEvent::Disabled {
            name: package.to_string(),
        });
        record.ok_or_else(|| PluginError::not_found(package))
    }

    fn set_enabled(&self, package: &str, enabled: bool) -> Option<InstalledPlugin> {
        let mut plugins = self.plugins.write();
        plugins.get_mut(package).map(|entry| {
            entry.record.enabled = enabled;
            entry.record.clone()
        })
    }

    /// Reload persisted records at startup. Enabled plugins are registered.
    ///
    /// Runs regardless of the runtime install policy. Returns the number of
    /// records restored; records whose module cannot be loaded are skipped.
    pub async fn restore(&self) -> Result<usize, PluginError> {
        let records = self.store.load().await?;
        let mut restored = 0;

        for record in records {
            let lock = self.name_lock(&record.name);
            let _guard = lock.lock().await;

            let module = match self.load_module(&record.manifest) {
                Ok(module) => module,
                Err(err) => {
                    warn!(plugin = %record.name, error = %err, "Skipping plugin on restore");
                    continue;
                }
            };
            let mut entry = PluginEntry { record, module };
            if entry.record.enabled {
                if let Err(err) = self.activate(&entry).await {
                    warn!(
                        plugin = %entry.record.name,
                        error = %err,
                        "Restored plugin failed to start; keeping it disabled"
                    );
                    entry.record.enabled = false;
                }
            }
            self.plugins
                .write()
                .insert(entry.record.name.clone(), entry);
            restored += 1;
        }

        if restored > 0 {
            self.persist().await;
        }
        info!(count = restored, "Restored plugins");
        Ok(restored)
    }

    /// Read-only snapshot, ordered by name.
    pub fn get_installed_plugins(&self) -> Vec<InstalledPlugin> {
        self.plugins
            .read()
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    pub fn get_plugin(&self, package: &str) -> Option<InstalledPlugin> {
        self.plugins
            .read()
            .get(package)
            .map(|entry| entry.record.clone())
    }

    pub fn allow_runtime_install(&self) -> bool {
        self.allow_runtime_install
    }
}
