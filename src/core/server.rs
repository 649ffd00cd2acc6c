//! MCP server handler.
//!
//! Serves the gateway as an MCP server for the stdio transport. Tool
//! listing and tool calls go through the same dispatcher as every other
//! transport, authenticated with the session bearer, so scope checks, rate
//! limits, and monitoring apply unchanged.

use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorCode as McpErrorCode, JsonObject,
        ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, instrument};

use super::error::ErrorCode;
use super::gateway::Gateway;
use crate::domains::dispatch::{JsonRpcRequest, JsonRpcResponse};

/// The MCP server handler.
///
/// Each handler is bound to one bearer token; every request it forwards is
/// evaluated against that token.
#[derive(Clone)]
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    bearer: Arc<str>,
}

impl GatewayServer {
    pub fn new(gateway: Arc<Gateway>, bearer: impl Into<Arc<str>>) -> Self {
        Self {
            gateway,
            bearer: bearer.into(),
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.gateway.config().server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.gateway.config().server.version
    }

    async fn forward(&self, method: &str, params: Value) -> JsonRpcResponse {
        let request = JsonRpcRequest::new(0, method, Some(params));
        self.gateway
            .dispatcher()
            .handle(request, Some(&self.bearer))
            .await
    }

    /// Tools visible to the session, qualified as `<backend>.<tool>`.
    pub async fn tools(&self) -> Result<Vec<Tool>, McpError> {
        let response = self.forward("tools/list", json!({})).await;
        let result = into_result(response)?;

        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| tools.iter().filter_map(to_mcp_tool).collect())
            .unwrap_or_default();
        Ok(tools)
    }

    /// Call a qualified tool on behalf of the session.
    ///
    /// Backend failures are reported as tool errors so the client sees
    /// them as results; every other failure is a protocol error carrying
    /// the gateway code.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = Value::Object(arguments.unwrap_or_default());
        let response = self
            .forward("tools/call", json!({ "name": name, "arguments": arguments }))
            .await;

        if let Some(error) = &response.error {
            if error.code == ErrorCode::BackendExecution.as_i32() {
                return Ok(CallToolResult::error(vec![Content::text(
                    error.message.clone(),
                )]));
            }
        }

        let result = into_result(response)?;
        let summary = serde_json::to_string_pretty(&result)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let structured_content = result.is_object().then_some(result);
        Ok(CallToolResult {
            content: vec![Content::text(summary)],
            structured_content,
            is_error: Some(false),
            meta: None,
        })
    }
}

fn into_result(response: JsonRpcResponse) -> Result<Value, McpError> {
    match response.error {
        Some(error) => Err(McpError::new(
            McpErrorCode(error.code),
            error.message,
            error.data,
        )),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

fn to_mcp_tool(value: &Value) -> Option<Tool> {
    let name = value.get("name")?.as_str()?.to_string();
    let description = value
        .get("description")
        .and_then(Value::as_str)
        .map(|d| d.to_string().into());
    let input_schema = match value.get("inputSchema") {
        Some(Value::Object(schema)) => schema.clone(),
        _ => JsonObject::new(),
    };
    Some(Tool {
        name: name.into(),
        description,
        input_schema: Arc::new(input_schema),
        annotations: None,
        output_schema: None,
        icons: None,
        meta: None,
        title: None,
    })
}

impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Tool gateway. Tools are named '<backend>.<tool>' and routed to the backend \
                 adapter that provides them."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    #[instrument(skip(self, _request, _context))]
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        info!("Listing tools");
        Ok(ListToolsResult {
            tools: self.tools().await?,
            next_cursor: None,
            meta: None,
        })
    }

    #[instrument(skip(self, request, _context), fields(tool = %request.name))]
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!("Calling tool");
        self.invoke(&request.name, request.arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::domains::adapters::BackendConfig;
    use crate::domains::adapters::testing::{MockAdapter, factory_for};
    use tokio_test::assert_ok;

    async fn server_with(scopes: &[&str]) -> GatewayServer {
        let mut config = Config::default();
        config.registry.call_timeout_ms = 200;
        config.auth.session_scopes = scopes.iter().map(|s| s.to_string()).collect();
        let gateway = Arc::new(Gateway::new(config));

        for (id, adapter) in [
            ("slack", MockAdapter::echo(&["post"])),
            ("github", MockAdapter::echo(&["issue"])),
            ("broken", MockAdapter::failing_call("upstream 500")),
        ] {
            let config = BackendConfig::new(id, id, "mock");
            assert_ok!(
                gateway
                    .registry()
                    .register_backend(config, &factory_for(adapter))
                    .await
            );
        }

        let session = gateway.issue_session_token().unwrap();
        GatewayServer::new(gateway, session.bearer)
    }

    #[tokio::test]
    async fn test_tools_are_qualified_and_scoped() {
        let server = server_with(&["slack"]).await;
        let tools = assert_ok!(server.tools().await);
        let names: Vec<_> = tools.iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec!["slack.post"]);
        assert_eq!(tools[0].input_schema.get("type"), Some(&json!("object")));
    }

    #[tokio::test]
    async fn test_invoke_returns_structured_content() {
        let server = server_with(&[]).await;
        let mut arguments = JsonObject::new();
        arguments.insert("text".to_string(), json!("hi"));

        let result = assert_ok!(server.invoke("slack.post", Some(arguments)).await);
        assert_eq!(result.is_error, Some(false));
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["arguments"]["text"], "hi");
    }

    #[tokio::test]
    async fn test_backend_failure_is_a_tool_error() {
        let server = server_with(&[]).await;
        let result = assert_ok!(server.invoke("broken.run", None).await);
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_scope_denial_is_a_protocol_error() {
        let server = server_with(&["slack"]).await;
        let err = server.invoke("github.issue", None).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode(1005));
    }

    #[tokio::test]
    async fn test_server_info() {
        let server = server_with(&[]).await;
        assert_eq!(server.name(), "tool-gateway");
        assert!(server.get_info().capabilities.tools.is_some());
    }
}
