//! Plugin manifest format.

use serde::{Deserialize, Serialize};

use super::error::PluginError;
use crate::domains::adapters::BackendConfig;

/// Backend section of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    #[serde(rename = "type")]
    pub backend_type: String,

    #[serde(default)]
    pub auth_methods: Vec<String>,

    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Backend id; defaults to the backend type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// `plugin.json` contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    /// Entry point, resolved against the module catalog.
    pub main: String,
    #[serde(default)]
    pub category: String,
    pub backend: BackendDescriptor,
}

impl PluginManifest {
    pub fn backend_id(&self) -> &str {
        self.backend
            .id
            .as_deref()
            .unwrap_or(&self.backend.backend_type)
    }

    /// Structural checks that do not depend on the module.
    pub fn validate(&self, package_name: &str) -> Result<(), PluginError> {
        let fail = |msg: &str| Err(PluginError::invalid_manifest(package_name, msg));
        if self.name != package_name {
            return fail(&format!("manifest name '{}' does not match", self.name));
        }
        if self.version.trim().is_empty() {
            return fail("version is empty");
        }
        if self.main.trim().is_empty() {
            return fail("main is empty");
        }
        if self.backend.backend_type.trim().is_empty() {
            return fail("backend.type is empty");
        }
        let id = self.backend_id();
        if id.is_empty() || id.contains('.') {
            return fail("backend id must be non-empty and contain no '.'");
        }
        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.backend_id(), &self.name, &self.backend.backend_type)
            .with_capabilities(self.backend.capabilities.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> PluginManifest {
        serde_json::from_value(json!({
            "name": "slack-adapter",
            "version": "1.2.0",
            "main": "echo",
            "category": "messaging",
            "backend": {
                "type": "slack",
                "authMethods": ["oauth2"],
                "capabilities": ["messages"]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_backend_id_defaults_to_type() {
        let m = manifest();
        assert_eq!(m.backend_id(), "slack");
        assert_eq!(m.backend.auth_methods, vec!["oauth2"]);
        let config = m.backend_config();
        assert_eq!(config.id, "slack");
        assert_eq!(config.capabilities, vec!["messages"]);
    }

    #[test]
    fn test_explicit_backend_id() {
        let mut m = manifest();
        m.backend.id = Some("slack-eu".to_string());
        assert_eq!(m.backend_id(), "slack-eu");
    }

    #[test]
    fn test_validate_rejects_mismatched_name() {
        let m = manifest();
        assert!(m.validate("slack-adapter").is_ok());
        assert!(matches!(
            m.validate("github-adapter"),
            Err(PluginError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_dotted_backend_id() {
        let mut m = manifest();
        m.backend.id = Some("a.b".to_string());
        assert!(m.validate("slack-adapter").is_err());
    }
}
