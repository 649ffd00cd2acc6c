//! Statically linked adapters shipped with the gateway.
//!
//! These exist so a freshly started gateway has something to route to and
//! so deployments can smoke-test auth and dispatch end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::adapter::{BackendAdapter, BackendConfig, ToolSpec};
use super::error::{AdapterError, AdapterResult};

/// Parameters for the `echo` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoParams {
    /// Text to send back.
    pub message: String,
}

/// Diagnostic adapter: `echo` returns its input, `time` returns the clock.
#[derive(Default)]
pub struct EchoAdapter {
    connected: AtomicBool,
}

impl EchoAdapter {
    pub const TYPE: &'static str = "echo";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn BackendAdapter> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl BackendAdapter for EchoAdapter {
    async fn initialize(&self, config: &BackendConfig) -> AdapterResult<()> {
        info!(backend_id = %config.id, "Echo adapter initialized");
        Ok(())
    }

    async fn connect(&self) -> AdapterResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get_tools(&self) -> AdapterResult<Vec<ToolSpec>> {
        let echo_schema = serde_json::to_value(schema_for!(EchoParams))
            .map_err(|e| AdapterError::new(e.to_string()))?;
        Ok(vec![
            ToolSpec::new("echo", "Return the given message unchanged", echo_schema),
            ToolSpec::new(
                "time",
                "Return the gateway's current UTC time",
                json!({"type": "object", "properties": {}}),
            ),
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> AdapterResult<Value> {
        debug!(tool = %name, "Echo adapter call");
        match name {
            "echo" => {
                let params: EchoParams = serde_json::from_value(arguments)
                    .map_err(|e| AdapterError::new(format!("invalid arguments: {}", e)))?;
                Ok(json!({ "message": params.message }))
            }
            "time" => Ok(json!({ "now": chrono::Utc::now().to_rfc3339() })),
            other => Err(AdapterError::new(format!("unknown tool: {}", other))),
        }
    }

    async fn health_check(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn cleanup(&self) -> AdapterResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
