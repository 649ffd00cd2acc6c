//! Plugin lifecycle error types.

use thiserror::Error;

use super::capability::Capability;
use crate::domains::adapters::RegistryError;

/// Errors that can occur while installing or managing plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No source knows the package, or it is not installed.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// The plugin does not expose the full adapter surface.
    #[error("Plugin '{name}' is missing capabilities: {}", format_missing(.missing))]
    Validation {
        name: String,
        missing: Vec<Capability>,
    },

    /// The manifest is malformed or does not match the request.
    #[error("Invalid manifest for '{name}': {message}")]
    InvalidManifest { name: String, message: String },

    /// Loading the plugin failed or panicked.
    #[error("Failed to load plugin '{name}': {message}")]
    LoadFailed { name: String, message: String },

    /// The adapter could not be registered.
    #[error("Backend error: {0}")]
    Backend(#[from] RegistryError),

    /// Runtime install is disabled by configuration.
    #[error("Runtime plugin management is disabled")]
    InstallDisabled,

    /// Reading or writing plugin records failed.
    #[error("Plugin store error: {0}")]
    Store(String),
}

fn format_missing(missing: &[Capability]) -> String {
    missing
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PluginError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn load_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_manifest(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
