//! Backend adapter contract.
//!
//! An adapter wraps one third-party API and exposes it to the gateway as a
//! set of [`ToolSpec`]s. Adapters are created by an [`AdapterFactory`] (in
//! practice, a plugin module) and are driven through their lifecycle by the
//! [`AdapterRegistry`](super::AdapterRegistry).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{AdapterResult, RegistryError};

/// Lifecycle status of a registered backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterStatus {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl AdapterStatus {
    /// Whether moving from `self` to `next` is a legal single step.
    ///
    /// CONNECTING → {CONNECTED, ERROR}, CONNECTED → {DISCONNECTED, ERROR},
    /// ERROR → CONNECTING. Nothing else.
    pub fn can_transition_to(self, next: AdapterStatus) -> bool {
        use AdapterStatus::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Connecting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool as declared by an adapter, before it is bound to a backend id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool owned by a registered backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Tool name, unique within its backend.
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Id of the backend that owns this tool.
    pub backend_id: String,
}

impl Tool {
    pub fn from_spec(spec: ToolSpec, backend_id: &str) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            input_schema: spec.input_schema,
            backend_id: backend_id.to_string(),
        }
    }

    /// Name exposed to callers: `<backend>.<tool>`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.backend_id, self.name)
    }
}

/// Static configuration used to create and initialize one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub name: String,
    pub backend_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Adapter-specific settings passed to `initialize`.
    #[serde(default)]
    pub settings: Value,
}

impl BackendConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            backend_type: backend_type.into(),
            capabilities: Vec::new(),
            settings: Value::Null,
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Contract every backend adapter implements.
///
/// Network-backed adapters override `connect`/`disconnect`; the defaults are
/// no-ops for adapters that hold no session.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn initialize(&self, config: &BackendConfig) -> AdapterResult<()>;

    async fn connect(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        Ok(())
    }

    /// Tools in the adapter's declared order.
    async fn get_tools(&self) -> AdapterResult<Vec<ToolSpec>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> AdapterResult<Value>;

    async fn health_check(&self) -> bool;

    async fn cleanup(&self) -> AdapterResult<()>;
}

/// Creates adapter instances for a backend configuration.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>> + Send + Sync,
{
    fn create(&self, config: &BackendConfig) -> AdapterResult<Arc<dyn BackendAdapter>> {
        self(config)
    }
}

/// Status holder enforcing the legal transition graph.
#[derive(Debug)]
pub(crate) struct StatusCell {
    backend_id: String,
    status: Mutex<AdapterStatus>,
}

impl StatusCell {
    pub(crate) fn new(backend_id: &str) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            status: Mutex::new(AdapterStatus::Connecting),
        }
    }

    pub(crate) fn get(&self) -> AdapterStatus {
        *self.status.lock()
    }

    /// Move to `next`, returning the previous status.
    pub(crate) fn transition(&self, next: AdapterStatus) -> Result<AdapterStatus, RegistryError> {
        let mut status = self.status.lock();
        let from = *status;
        if !from.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                backend_id: self.backend_id.clone(),
                from,
                to: next,
            });
        }
        *status = next;
        Ok(from)
    }
}
