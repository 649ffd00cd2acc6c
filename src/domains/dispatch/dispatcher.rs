//! Request dispatcher.
//!
//! Every request follows the same path: validate the bearer token, run the
//! security pipeline, route the method, record the outcome with the
//! monitor, and wrap the result or error in the envelope. The request id is
//! echoed on every response, including failures before routing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::envelope::{JSONRPC_VERSION, JsonRpcRequest, JsonRpcResponse};
use crate::core::config::ServerConfig;
use crate::core::security::{
    IncidentType, RequestContext, SecurityError, SecurityIncident, SecurityManager, Severity,
};
use crate::core::{Error, Result};
use crate::domains::adapters::{AdapterRegistry, RegistryError, ToolFilter};
use crate::domains::auth::{AuthService, GatewayToken};
use crate::domains::monitor::{PerformanceMonitor, RequestOutcome};
use crate::domains::plugins::PluginManager;

/// Backend type that accepts `workflows/execute`.
pub const WORKFLOW_BACKEND_TYPE: &str = "workflow";

/// Tool invoked on workflow backends.
pub const EXECUTE_WORKFLOW_TOOL: &str = "execute_workflow";

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// Params
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsListParams {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl ToolCallParams {
    /// `{backend, name}` or `{name: "<backend>.<tool>"}`.
    fn target(&self) -> Option<(&str, &str)> {
        match &self.backend {
            Some(backend) => Some((backend.as_str(), self.name.as_str())),
            None => self.name.split_once('.'),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginParams {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowParams {
    backend: String,
    workflow_id: String,
    #[serde(default)]
    input: Value,
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let value = match params {
        None | Some(Value::Null) => json!({}),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|e| Error::invalid_params(e.to_string()))
}

/// Backend a request targets, read leniently so the scope check can run
/// before strict parameter parsing.
fn target_backend(method: &str, params: Option<&Value>) -> Option<String> {
    let params = params?;
    match method {
        "tools/call" => {
            if let Some(backend) = params.get("backend").and_then(Value::as_str) {
                return Some(backend.to_string());
            }
            params
                .get("name")
                .and_then(Value::as_str)
                .and_then(|name| name.split_once('.'))
                .map(|(backend, _)| backend.to_string())
        }
        "workflows/execute" => params
            .get("backend")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    server: ServerConfig,
    auth: Arc<AuthService>,
    security: Arc<SecurityManager>,
    registry: Arc<AdapterRegistry>,
    plugins: Arc<PluginManager>,
    monitor: Arc<PerformanceMonitor>,
    sequence: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        server: ServerConfig,
        auth: Arc<AuthService>,
        security: Arc<SecurityManager>,
        registry: Arc<AdapterRegistry>,
        plugins: Arc<PluginManager>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            server,
            auth,
            security,
            registry,
            plugins,
            monitor,
            sequence: AtomicU64::new(0),
        }
    }

    /// Handle a raw request body. Unparsable bodies yield a parse error
    /// with a `null` id.
    pub async fn handle_raw(&self, body: &[u8], bearer: Option<&str>) -> JsonRpcResponse {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => return JsonRpcResponse::from_error(None, &Error::Parse(e.to_string())),
        };
        let id = value.get("id").cloned();
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request, bearer).await,
            Err(e) => JsonRpcResponse::from_error(id, &Error::invalid_request(e.to_string())),
        }
    }

    /// Handle one request on behalf of the bearer.
    #[instrument(skip_all, fields(method = %request.method))]
    pub async fn handle(&self, request: JsonRpcRequest, bearer: Option<&str>) -> JsonRpcResponse {
        let id = request.id.clone();

        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::from_error(
                id,
                &Error::invalid_request("jsonrpc must be \"2.0\""),
            );
        }

        let token = match self.authenticate(bearer) {
            Ok(token) => token,
            Err(err) => return JsonRpcResponse::from_error(id, &err),
        };

        let backend = target_backend(&request.method, request.params.as_ref());
        let context = RequestContext {
            method: &request.method,
            backend_id: backend.as_deref(),
            params: request.params.as_ref(),
        };
        if let Err(err) = self.security.validate_request(&context, &token) {
            debug!(token_id = %token.id, error = %err, "Request rejected");
            return JsonRpcResponse::from_error(id, &Error::from(err));
        }

        let request_key = format!("req-{}", self.sequence.fetch_add(1, Ordering::Relaxed));
        let tracked = self.monitor.track(&request_key, &request.method, &token.id);
        if let Some(backend) = &backend {
            tracked.set_backend(backend);
        }

        let outcome = self.route(&request.method, request.params, &token).await;
        tracked.finish(RequestOutcome::from_success(outcome.is_ok()));

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                if err.is_internal() {
                    self.security.log_incident(
                        SecurityIncident::new(
                            IncidentType::InternalError,
                            Severity::High,
                            err.to_string(),
                        )
                        .with_metadata("method", request.method.as_str())
                        .with_metadata("tokenId", token.id.as_str()),
                    );
                }
                debug!(error = %err, "Request failed");
                JsonRpcResponse::from_error(id, &err)
            }
        }
    }

    fn authenticate(&self, bearer: Option<&str>) -> Result<GatewayToken> {
        let bearer = bearer.unwrap_or_default();
        self.auth.validate_token(bearer).map_err(|err| {
            if err.is_credential_failure() {
                let key = if bearer.is_empty() {
                    "anonymous".to_string()
                } else {
                    AuthService::fingerprint(bearer)
                };
                warn!(caller = %key, error = %err, "Authentication failed");
                self.security.record_auth_failure(&key);
            }
            Error::from(err)
        })
    }

    async fn route(&self, method: &str, params: Option<Value>, token: &GatewayToken) -> Result<Value> {
        match method {
            "ping" => Ok(json!({})),
            "initialize" => Ok(self.initialize(token)),
            "tools/list" => self.tools_list(params, token),
            "tools/call" => self.tools_call(params).await,
            "backends/list" => Ok(self.backends_list(token)),
            "plugins/list" => Ok(json!({ "plugins": self.plugins.get_installed_plugins() })),
            "plugins/install" => {
                let p: PluginParams = parse_params(params)?;
                let record = self
                    .plugins
                    .install_plugin(&p.name, p.version.as_deref())
                    .await?;
                Ok(json!({ "plugin": record }))
            }
            "plugins/uninstall" => {
                let p: PluginParams = parse_params(params)?;
                self.plugins.uninstall_plugin(&p.name).await?;
                Ok(json!({ "uninstalled": p.name }))
            }
            "plugins/enable" => {
                let p: PluginParams = parse_params(params)?;
                Ok(json!({ "plugin": self.plugins.enable_plugin(&p.name).await? }))
            }
            "plugins/disable" => {
                let p: PluginParams = parse_params(params)?;
                Ok(json!({ "plugin": self.plugins.disable_plugin(&p.name).await? }))
            }
            "workflows/execute" => self.workflows_execute(params).await,
            other => {
                warn!("Unknown method: {}", other);
                Err(Error::MethodNotFound(other.to_string()))
            }
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    fn initialize(&self, token: &GatewayToken) -> Value {
        info!(token_id = %token.id, "Processing initialize request");
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.server.name,
                "version": self.server.version,
            },
            "session": {
                "tenantId": token.tenant_id,
                "identityId": token.identity_id,
                "tokenId": token.id,
                "expiresAt": token.expires_at(),
            },
        })
    }

    fn tools_list(&self, params: Option<Value>, token: &GatewayToken) -> Result<Value> {
        let p: ToolsListParams = parse_params(params)?;

        let filter = match &p.backend {
            Some(backend) if !token.allows_backend(backend) => {
                return Err(SecurityError::scope_denied(backend).into());
            }
            Some(backend) => ToolFilter::backends([backend.clone()]),
            None if token.is_wildcard() => ToolFilter::default(),
            None => ToolFilter::backends(token.scoped_backend_ids.iter().cloned()),
        };
        let filter = ToolFilter {
            name_contains: p.query,
            ..filter
        };

        let tools: Vec<Value> = self
            .registry
            .list_tools(&filter)
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.qualified_name(),
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                    "backendId": tool.backend_id,
                })
            })
            .collect();
        Ok(json!({ "tools": tools }))
    }

    async fn tools_call(&self, params: Option<Value>) -> Result<Value> {
        let p: ToolCallParams = parse_params(params)?;
        let (backend, tool) = p.target().ok_or_else(|| {
            Error::invalid_params("tool name must be '<backend>.<tool>' or carry a backend")
        })?;
        let timeout = p
            .timeout_ms
            .map(Duration::from_millis)
            .map(|t| t.min(self.registry.call_timeout()));
        let arguments = p.arguments.clone().unwrap_or_else(|| json!({}));

        info!(backend_id = %backend, tool = %tool, "Processing tools/call request");
        Ok(self
            .registry
            .dispatch(backend, tool, arguments, timeout)
            .await?)
    }

    fn backends_list(&self, token: &GatewayToken) -> Value {
        let backends: Vec<_> = self
            .registry
            .backends()
            .into_iter()
            .filter(|b| token.allows_backend(&b.id))
            .collect();
        json!({ "backends": backends })
    }

    async fn workflows_execute(&self, params: Option<Value>) -> Result<Value> {
        let p: WorkflowParams = parse_params(params)?;

        let backend = self
            .registry
            .get_backend(&p.backend)
            .ok_or_else(|| RegistryError::not_found(&p.backend))?;
        if backend.backend_type() != WORKFLOW_BACKEND_TYPE {
            return Err(Error::WorkflowBackendInvalid {
                backend_id: p.backend.clone(),
                reason: format!("backend type is '{}'", backend.backend_type()),
            });
        }

        info!(backend_id = %p.backend, workflow_id = %p.workflow_id, "Executing workflow");
        let arguments = json!({ "workflowId": p.workflow_id, "input": p.input });
        match self
            .registry
            .dispatch(&p.backend, EXECUTE_WORKFLOW_TOOL, arguments, None)
            .await
        {
            Ok(result) => Ok(result),
            Err(RegistryError::ToolNotFound { backend_id, .. }) => Err(Error::WorkflowBackendInvalid {
                backend_id,
                reason: format!("no '{}' tool", EXECUTE_WORKFLOW_TOOL),
            }),
            Err(RegistryError::BackendExecution {
                backend_id,
                message,
                ..
            }) => Err(Error::WorkflowExecution {
                backend_id,
                message,
            }),
            Err(err) => Err(err.into()),
        }
    }
}
