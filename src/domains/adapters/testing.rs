//! Test adapters with scripted behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::adapter::{AdapterFactory, BackendAdapter, BackendConfig, ToolSpec};
use super::error::{AdapterError, AdapterResult};

#[derive(Debug, Clone)]
enum Behavior {
    Echo,
    FailCall(String),
    PanicCall,
    HangCall,
    SlowCall(Duration),
    FailConnect,
    FailDisconnect,
    PanicInitialize,
}

/// Scripted adapter used across the crate's tests.
pub struct MockAdapter {
    tools: Vec<String>,
    behavior: Behavior,
    calls: AtomicUsize,
    healthy: AtomicBool,
    disconnected: AtomicBool,
    cleaned_up: AtomicBool,
}

impl MockAdapter {
    fn build(tools: &[&str], behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            behavior,
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
        })
    }

    /// Returns `{"tool": name, "arguments": args}` for each call.
    pub fn echo(tools: &[&str]) -> Arc<Self> {
        Self::build(tools, Behavior::Echo)
    }

    pub fn failing_call(message: &str) -> Arc<Self> {
        Self::build(&["run"], Behavior::FailCall(message.to_string()))
    }

    /// Failing adapter exposing the given tools.
    pub fn failing_tools(tools: &[&str], message: &str) -> Arc<Self> {
        Self::build(tools, Behavior::FailCall(message.to_string()))
    }

    pub fn panicking_call() -> Arc<Self> {
        Self::build(&["run"], Behavior::PanicCall)
    }

    pub fn hanging_call() -> Arc<Self> {
        Self::build(&["run"], Behavior::HangCall)
    }

    pub fn slow_call(delay: Duration) -> Arc<Self> {
        Self::build(&["run"], Behavior::SlowCall(delay))
    }

    pub fn failing_connect() -> Arc<Self> {
        Self::build(&["run"], Behavior::FailConnect)
    }

    /// Echo adapter whose disconnect always fails.
    pub fn failing_disconnect(tools: &[&str]) -> Arc<Self> {
        Self::build(tools, Behavior::FailDisconnect)
    }

    pub fn panicking_initialize() -> Arc<Self> {
        Self::build(&["run"], Behavior::PanicInitialize)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn was_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    async fn initialize(&self, _config: &BackendConfig) -> AdapterResult<()> {
        if let Behavior::PanicInitialize = self.behavior {
            panic!("initialize blew up");
        }
        Ok(())
    }

    async fn connect(&self) -> AdapterResult<()> {
        match self.behavior {
            Behavior::FailConnect => Err(AdapterError::new("connection refused")),
            _ if !self.healthy.load(Ordering::SeqCst) => Err(AdapterError::new("still down")),
            _ => Ok(()),
        }
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        match self.behavior {
            Behavior::FailDisconnect => Err(AdapterError::new("socket already closed")),
            _ => Ok(()),
        }
    }

    async fn get_tools(&self) -> AdapterResult<Vec<ToolSpec>> {
        Ok(self
            .tools
            .iter()
            .map(|name| {
                ToolSpec::new(
                    name.as_str(),
                    format!("Mock tool {}", name),
                    json!({"type": "object"}),
                )
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> AdapterResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::FailCall(message) => Err(AdapterError::new(message.clone())),
            Behavior::PanicCall => panic!("tool call blew up"),
            Behavior::HangCall => {
                futures::future::pending::<()>().await;
                Ok(Value::Null)
            }
            Behavior::SlowCall(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(json!({"tool": name, "slow": true}))
            }
            _ => Ok(json!({"tool": name, "arguments": arguments})),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn cleanup(&self) -> AdapterResult<()> {
        self.cleaned_up.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that always hands out the same adapter instance.
pub fn factory_for(adapter: Arc<MockAdapter>) -> impl AdapterFactory {
    move |_config: &BackendConfig| -> AdapterResult<Arc<dyn BackendAdapter>> {
        Ok(adapter.clone() as Arc<dyn BackendAdapter>)
    }
}
