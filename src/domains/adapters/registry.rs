//! Adapter Registry - holds backend adapters keyed by backend id.
//!
//! The registry owns each backend's lifecycle (initialize, connect,
//! disconnect, cleanup), aggregates their tools, and dispatches tool calls.
//!
//! ## Consistency
//!
//! The registry contents live in an immutable snapshot behind an
//! `Arc`. Mutations build a new snapshot and swap it in while holding the
//! writer lock, so readers (`list_tools`, `dispatch`) see either the state
//! before a mutation or the state after it, never a mix.
//!
//! A call already dispatched to a backend that is then unregistered keeps
//! its own `Arc` to the adapter and completes or fails on its own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};

use super::adapter::{
    AdapterFactory, AdapterStatus, BackendAdapter, BackendConfig, StatusCell, Tool, ToolSpec,
};
use super::error::RegistryError;
use super::events::RegistryEvent;
use super::isolation::{isolate, isolate_sync};
use crate::core::config::RegistryConfig;

/// A backend registered in the gateway.
pub struct RegisteredBackend {
    config: BackendConfig,
    adapter: Arc<dyn BackendAdapter>,
    status: StatusCell,
    tools: Vec<Tool>,
}

impl RegisteredBackend {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn backend_type(&self) -> &str {
        &self.config.backend_type
    }

    pub fn status(&self) -> AdapterStatus {
        self.status.get()
    }

    pub fn capabilities(&self) -> &[String] {
        &self.config.capabilities
    }

    /// Tools in the adapter's declared order.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn summary(&self) -> BackendSummary {
        BackendSummary {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            backend_type: self.config.backend_type.clone(),
            status: self.status(),
            capabilities: self.config.capabilities.clone(),
            tool_count: self.tools.len(),
        }
    }
}

/// Read-only view of a backend for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: String,
    pub status: AdapterStatus,
    pub capabilities: Vec<String>,
    pub tool_count: usize,
}

/// Filter applied by [`AdapterRegistry::list_tools`].
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    /// Only include tools of these backends.
    pub backend_ids: Option<HashSet<String>>,
    /// Only include tools whose name contains this substring.
    pub name_contains: Option<String>,
}

impl ToolFilter {
    pub fn backends<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backend_ids: Some(ids.into_iter().map(Into::into).collect()),
            name_contains: None,
        }
    }

    fn matches(&self, tool: &Tool) -> bool {
        if let Some(ids) = &self.backend_ids {
            if !ids.contains(&tool.backend_id) {
                return false;
            }
        }
        match &self.name_contains {
            Some(needle) => tool.name.contains(needle.as_str()),
            None => true,
        }
    }
}

/// Bind declared tools to their backend, rejecting duplicate names.
fn bind_tools(backend_id: &str, specs: Vec<ToolSpec>) -> Result<Vec<Tool>, RegistryError> {
    let mut seen = HashSet::new();
    let mut tools = Vec::with_capacity(specs.len());
    for spec in specs {
        if !seen.insert(spec.name.clone()) {
            return Err(RegistryError::DuplicateTool {
                backend_id: backend_id.to_string(),
                tool: spec.name,
            });
        }
        tools.push(Tool::from_spec(spec, backend_id));
    }
    Ok(tools)
}

#[derive(Clone, Default)]
struct Snapshot {
    /// Backend ids in registration order.
    order: Vec<String>,
    backends: HashMap<String, Arc<RegisteredBackend>>,
}

impl Snapshot {
    fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredBackend>> {
        self.order.iter().filter_map(|id| self.backends.get(id))
    }

    fn with_backend(&self, backend: Arc<RegisteredBackend>) -> Self {
        let mut next = self.clone();
        next.order.push(backend.id().to_string());
        next.backends.insert(backend.id().to_string(), backend);
        next
    }

    fn without_backend(&self, id: &str) -> Self {
        let mut next = self.clone();
        next.order.retain(|existing| existing != id);
        next.backends.remove(id);
        next
    }
}

/// Registry of backend adapters.
pub struct AdapterRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serializes snapshot writers.
    write_lock: Mutex<()>,
    events: broadcast::Sender<RegistryEvent>,
    call_timeout: Duration,
    lifecycle_timeout: Duration,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        info!("Initializing AdapterRegistry");
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            write_lock: Mutex::new(()),
            events,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            lifecycle_timeout: Duration::from_millis(config.lifecycle_timeout_ms),
        }
    }

    /// Default per-call timeout used when a dispatch does not carry one.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    fn publish(&self, event: RegistryEvent) {
        debug!(?event, "Registry event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_status(&self, backend: &RegisteredBackend, next: AdapterStatus) -> Result<(), RegistryError> {
        let from = backend.status.transition(next)?;
        self.publish(RegistryEvent::StatusChanged {
            backend_id: backend.id().to_string(),
            from,
            to: next,
        });
        Ok(())
    }

    /// Instantiate, initialize, and connect a backend, then publish it.
    ///
    /// On any failure the backend is left out of the registry and a
    /// `RegistrationFailed` event is published.
    #[instrument(skip(self, config, factory), fields(backend_id = %config.id))]
    pub async fn register_backend(
        &self,
        config: BackendConfig,
        factory: &dyn AdapterFactory,
    ) -> Result<BackendSummary, RegistryError> {
        let backend_id = config.id.clone();

        if self.current().backends.contains_key(&backend_id) {
            return Err(RegistryError::AlreadyRegistered(backend_id));
        }

        match self.connect_new(config, factory).await {
            Ok(backend) => {
                let guard = self.write_lock.lock().await;
                if self.current().backends.contains_key(&backend_id) {
                    drop(guard);
                    self.discard(&backend).await;
                    return Err(RegistryError::AlreadyRegistered(backend_id));
                }

                let summary = backend.summary();
                let next = self.current().with_backend(backend);
                *self.snapshot.write() = Arc::new(next);

                info!(
                    backend_id = %backend_id,
                    tools = summary.tool_count,
                    "Registered backend"
                );
                self.publish(RegistryEvent::Registered {
                    backend_id,
                    tool_count: summary.tool_count,
                });
                Ok(summary)
            }
            Err(err) => {
                warn!(backend_id = %backend_id, error = %err, "Backend registration failed");
                self.publish(RegistryEvent::RegistrationFailed {
                    backend_id,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn connect_new(
        &self,
        config: BackendConfig,
        factory: &dyn AdapterFactory,
    ) -> Result<Arc<RegisteredBackend>, RegistryError> {
        let backend_id = config.id.clone();
        let adapter = isolate_sync(&backend_id, || factory.create(&config))?;
        let status = StatusCell::new(&backend_id);

        let outcome = match self.bring_up(&backend_id, &adapter, &config).await {
            Ok(specs) => bind_tools(&backend_id, specs),
            Err(err) => Err(err),
        };

        let tools = match outcome {
            Ok(tools) => tools,
            Err(err) => {
                status.transition(AdapterStatus::Error)?;
                self.publish(RegistryEvent::StatusChanged {
                    backend_id: backend_id.clone(),
                    from: AdapterStatus::Connecting,
                    to: AdapterStatus::Error,
                });
                let cleanup = adapter.clone();
                if let Err(cleanup_err) =
                    isolate(&backend_id, self.lifecycle_timeout, async move { cleanup.cleanup().await }).await
                {
                    debug!(backend_id = %backend_id, error = %cleanup_err, "Cleanup after failed connect also failed");
                }
                return Err(err);
            }
        };

        status.transition(AdapterStatus::Connected)?;
        self.publish(RegistryEvent::StatusChanged {
            backend_id,
            from: AdapterStatus::Connecting,
            to: AdapterStatus::Connected,
        });

        Ok(Arc::new(RegisteredBackend {
            config,
            adapter,
            status,
            tools,
        }))
    }

    async fn bring_up(
        &self,
        backend_id: &str,
        adapter: &Arc<dyn BackendAdapter>,
        config: &BackendConfig,
    ) -> Result<Vec<ToolSpec>, RegistryError> {
        let a = adapter.clone();
        let c = config.clone();
        isolate(backend_id, self.lifecycle_timeout, async move { a.initialize(&c).await }).await?;

        let a = adapter.clone();
        isolate(backend_id, self.lifecycle_timeout, async move { a.connect().await }).await?;

        let a = adapter.clone();
        isolate(backend_id, self.lifecycle_timeout, async move { a.get_tools().await }).await
    }

    /// Disconnect and clean up an adapter that never made it into a snapshot.
    async fn discard(&self, backend: &RegisteredBackend) {
        let id = backend.id();

        let adapter = backend.adapter.clone();
        if let Err(err) =
            isolate(id, self.lifecycle_timeout, async move { adapter.disconnect().await }).await
        {
            warn!(backend_id = %id, error = %err, "Disconnect of discarded adapter failed");
        }

        let adapter = backend.adapter.clone();
        if let Err(err) =
            isolate(id, self.lifecycle_timeout, async move { adapter.cleanup().await }).await
        {
            warn!(backend_id = %id, error = %err, "Cleanup of discarded adapter failed");
        }
    }

    /// Look up a backend without blocking on writers.
    pub fn get_backend(&self, id: &str) -> Option<Arc<RegisteredBackend>> {
        self.current().backends.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.current().backends.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.current().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summaries of every backend, in registration order.
    pub fn backends(&self) -> Vec<BackendSummary> {
        self.current().iter().map(|b| b.summary()).collect()
    }

    /// Merge tools of CONNECTED backends.
    ///
    /// Order is registration order, then each adapter's own declared order.
    pub fn list_tools(&self, filter: &ToolFilter) -> Vec<Tool> {
        let snapshot = self.current();
        snapshot
            .iter()
            .filter(|b| b.status() == AdapterStatus::Connected)
            .flat_map(|b| b.tools.iter())
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }

    /// Invoke a tool on a backend under a deadline.
    ///
    /// Adapter failures of any kind come back as
    /// [`RegistryError::BackendExecution`].
    #[instrument(skip(self, arguments), fields(backend_id = %backend_id, tool = %tool_name))]
    pub async fn dispatch(
        &self,
        backend_id: &str,
        tool_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RegistryError> {
        let backend = self
            .get_backend(backend_id)
            .ok_or_else(|| RegistryError::not_found(backend_id))?;

        let status = backend.status();
        if status != AdapterStatus::Connected {
            return Err(RegistryError::BackendUnavailable {
                backend_id: backend_id.to_string(),
                status,
            });
        }

        if !backend.tools.iter().any(|t| t.name == tool_name) {
            return Err(RegistryError::ToolNotFound {
                backend_id: backend_id.to_string(),
                tool: tool_name.to_string(),
            });
        }

        let adapter = backend.adapter.clone();
        let tool = tool_name.to_string();
        let deadline = timeout.unwrap_or(self.call_timeout);
        debug!("Dispatching tool call");

        isolate(backend_id, deadline, async move {
            adapter.call_tool(&tool, arguments).await
        })
        .await
    }

    /// Disconnect, clean up, and remove a backend.
    #[instrument(skip(self))]
    pub async fn unregister_backend(&self, id: &str) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;

        let backend = self
            .current()
            .backends
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(id))?;

        if backend.status() == AdapterStatus::Connected {
            self.set_status(&backend, AdapterStatus::Disconnected)?;
        }

        let adapter = backend.adapter.clone();
        if let Err(err) =
            isolate(id, self.lifecycle_timeout, async move { adapter.disconnect().await }).await
        {
            warn!(backend_id = %id, error = %err, "Disconnect failed, continuing removal");
        }

        let adapter = backend.adapter.clone();
        if let Err(err) =
            isolate(id, self.lifecycle_timeout, async move { adapter.cleanup().await }).await
        {
            warn!(backend_id = %id, error = %err, "Cleanup failed, continuing removal");
        }

        let next = self.current().without_backend(id);
        *self.snapshot.write() = Arc::new(next);

        info!(backend_id = %id, "Unregistered backend");
        self.publish(RegistryEvent::Unregistered {
            backend_id: id.to_string(),
        });
        Ok(())
    }

    /// Health-check every CONNECTED backend; unhealthy ones move to ERROR.
    ///
    /// Returns `(backend_id, healthy)` for each checked backend.
    pub async fn health_check_all(&self) -> Vec<(String, bool)> {
        let snapshot = self.current();
        let mut results = Vec::new();

        for backend in snapshot.iter() {
            if backend.status() != AdapterStatus::Connected {
                continue;
            }

            let adapter = backend.adapter.clone();
            let healthy = isolate(backend.id(), self.lifecycle_timeout, async move {
                Ok(adapter.health_check().await)
            })
            .await
            .unwrap_or(false);

            if !healthy {
                warn!(backend_id = %backend.id(), "Health check failed");
                if let Err(err) = self.set_status(backend, AdapterStatus::Error) {
                    debug!(error = %err, "Backend changed state during health check");
                }
            }
            results.push((backend.id().to_string(), healthy));
        }

        results
    }

    /// Retry a backend in the ERROR state: ERROR → CONNECTING → CONNECTED/ERROR.
    #[instrument(skip(self))]
    pub async fn reconnect_backend(&self, id: &str) -> Result<AdapterStatus, RegistryError> {
        let backend = self
            .get_backend(id)
            .ok_or_else(|| RegistryError::not_found(id))?;

        self.set_status(&backend, AdapterStatus::Connecting)?;

        let adapter = backend.adapter.clone();
        match isolate(id, self.lifecycle_timeout, async move { adapter.connect().await }).await {
            Ok(()) => {
                self.set_status(&backend, AdapterStatus::Connected)?;
                info!(backend_id = %id, "Backend reconnected");
                Ok(AdapterStatus::Connected)
            }
            Err(err) => {
                self.set_status(&backend, AdapterStatus::Error)?;
                warn!(backend_id = %id, error = %err, "Reconnect failed");
                Err(err)
            }
        }
    }
}
