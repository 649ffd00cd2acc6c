//! Plugin modules and the catalog that `main` entries resolve against.

use std::collections::HashMap;
use std::sync::Arc;

use super::capability::Capability;
use crate::domains::adapters::builtin::EchoAdapter;
use crate::domains::adapters::{AdapterFactory, AdapterResult, BackendAdapter, BackendConfig};

/// A loadable plugin: an adapter factory plus its declared surface.
pub trait PluginModule: Send + Sync {
    /// Contract operations the adapters of this module implement.
    fn capabilities(&self) -> Vec<Capability> {
        Capability::REQUIRED.to_vec()
    }

    fn create(&self, config: &BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>>;
}

/// Module built from a constructor closure.
pub struct FnModule<F> {
    capabilities: Vec<Capability>,
    create: F,
}

impl<F> FnModule<F>
where
    F: Fn(&BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>> + Send + Sync,
{
    pub fn new(create: F) -> Self {
        Self {
            capabilities: Capability::REQUIRED.to_vec(),
            create,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl<F> PluginModule for FnModule<F>
where
    F: Fn(&BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>> + Send + Sync,
{
    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    fn create(&self, config: &BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>> {
        (self.create)(config)
    }
}

/// Registry-facing view of a module.
pub(crate) struct ModuleFactory(pub Arc<dyn PluginModule>);

impl AdapterFactory for ModuleFactory {
    fn create(&self, config: &BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>> {
        self.0.create(config)
    }
}

/// Statically linked modules keyed by entry point.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: HashMap<String, Arc<dyn PluginModule>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the adapters shipped with the gateway.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.insert(
            EchoAdapter::TYPE,
            Arc::new(FnModule::new(|_: &BackendConfig| Ok(EchoAdapter::shared()))),
        );
        catalog
    }

    pub fn insert(&mut self, entry: impl Into<String>, module: Arc<dyn PluginModule>) {
        self.modules.insert(entry.into(), module);
    }

    pub fn get(&self, entry: &str) -> Option<Arc<dyn PluginModule>> {
        self.modules.get(entry).cloned()
    }

    pub fn entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.modules.keys().cloned().collect();
        entries.sort();
        entries
    }
}
