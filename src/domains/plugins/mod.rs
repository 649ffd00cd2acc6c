//! Plugins domain module.
//!
//! Plugins package backend adapters so they can be installed, enabled,
//! disabled and removed while the gateway is serving.
//!
//! ## Architecture
//!
//! - `manager.rs` - PluginManager: install/uninstall/enable/disable/restore
//! - `source.rs` - PluginSource trait with static, local and remote sources
//! - `module.rs` - PluginModule trait and the statically linked module catalog
//! - `manifest.rs` - `plugin.json` format
//! - `capability.rs` - Capability surface verification
//! - `store.rs` - Persisted plugin records
//! - `error.rs` - Plugin error types

mod capability;
mod error;
mod manager;
mod manifest;
mod module;
mod source;
mod store;

pub use capability::{Capability, CapabilityReport, verify_capabilities};
pub use error::PluginError;
pub use manager::{
    ECHO_PLUGIN, PluginEvent, PluginManager, echo_manifest, sources_from_config,
    store_from_config,
};
pub use manifest::{BackendDescriptor, PluginManifest};
pub use module::{FnModule, ModuleCatalog, PluginModule};
pub use source::{LocalDirSource, MANIFEST_FILE, PluginSource, RegistrySource, StaticSource};
pub use store::{FileStore, InstalledPlugin, MemoryStore, PluginStore};
