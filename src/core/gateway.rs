//! The gateway instance.
//!
//! A `Gateway` owns one of every component and wires them together. There
//! is no global state: transports receive a `Gateway` and tests build as
//! many independent ones as they need.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::Config;
use super::error::{Error, Result};
use super::security::{SecurityLevel, SecurityManager, verify_admin_key};
use crate::domains::adapters::{AdapterRegistry, AdapterStatus};
use crate::domains::auth::{AuthError, AuthService, IssuedToken, WILDCARD_PERMISSION};
use crate::domains::dispatch::Dispatcher;
use crate::domains::monitor::PerformanceMonitor;
use crate::domains::plugins::{
    ModuleCatalog, PluginManager, PluginSource, PluginStore, sources_from_config,
    store_from_config,
};

/// Tenant that owns the stdio session.
pub const LOCAL_TENANT: &str = "local";

/// Identity of the stdio session.
pub const STDIO_IDENTITY: &str = "stdio";

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Backends run through the health check.
    pub checked: usize,
    /// Checked backends that failed and moved to ERROR.
    pub unhealthy: usize,
    /// ERROR backends brought back to CONNECTED.
    pub reconnected: usize,
    /// Expired tokens dropped.
    pub purged_tokens: usize,
}

pub struct Gateway {
    config: Arc<Config>,
    auth: Arc<AuthService>,
    security: Arc<SecurityManager>,
    registry: Arc<AdapterRegistry>,
    plugins: Arc<PluginManager>,
    monitor: Arc<PerformanceMonitor>,
    dispatcher: Arc<Dispatcher>,
    started_at: Instant,
}

impl Gateway {
    /// Build a gateway with the bundled module catalog and the plugin
    /// sources and store named in the configuration.
    pub fn new(config: Config) -> Self {
        let sources = sources_from_config(&config.plugins);
        let store = store_from_config(&config.plugins);
        Self::with_plugins(config, ModuleCatalog::with_builtins(), sources, store)
    }

    pub fn with_plugins(
        config: Config,
        catalog: ModuleCatalog,
        sources: Vec<Arc<dyn PluginSource>>,
        store: Arc<dyn PluginStore>,
    ) -> Self {
        let config = Arc::new(config);

        let auth = Arc::new(AuthService::new(config.auth.clone()));
        let security = Arc::new(SecurityManager::new(config.security.clone()));
        let registry = Arc::new(AdapterRegistry::new(config.registry.clone()));
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone()));
        let plugins = Arc::new(PluginManager::new(
            &config.plugins,
            Arc::clone(&registry),
            Arc::clone(&monitor),
            catalog,
            sources,
            store,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            config.server.clone(),
            Arc::clone(&auth),
            Arc::clone(&security),
            Arc::clone(&registry),
            Arc::clone(&plugins),
            Arc::clone(&monitor),
        ));

        info!(name = %config.server.name, "Gateway initialized");

        Self {
            config,
            auth,
            security,
            registry,
            plugins,
            monitor,
            dispatcher,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Re-install the plugins recorded in the plugin store.
    pub async fn restore_plugins(&self) -> Result<usize> {
        Ok(self.plugins.restore().await?)
    }

    /// Issue the bearer used by the stdio session.
    ///
    /// Scoped to `auth.session_scopes`; an empty list yields a wildcard
    /// token.
    pub fn issue_session_token(&self) -> Result<IssuedToken> {
        match self.auth.create_tenant(LOCAL_TENANT, "Local session") {
            Ok(_) | Err(AuthError::TenantExists(_)) => {}
            Err(err) => return Err(err.into()),
        }
        match self
            .auth
            .create_identity(LOCAL_TENANT, STDIO_IDENTITY, "stdio client")
        {
            Ok(_) | Err(AuthError::IdentityExists(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let scopes = self.config.auth.session_scopes.clone();
        let permissions = if scopes.is_empty() {
            vec![WILDCARD_PERMISSION.to_string()]
        } else {
            Vec::new()
        };
        Ok(self
            .auth
            .issue_token(LOCAL_TENANT, STDIO_IDENTITY, scopes, permissions, None)?)
    }

    /// One housekeeping pass.
    ///
    /// Backends already in ERROR are retried first, then every CONNECTED
    /// backend is health-checked, so a backend that fails now waits one
    /// interval before its first retry.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        if self.config.maintenance.reconnect_failed {
            for backend in self.registry.backends() {
                if backend.status != AdapterStatus::Error {
                    continue;
                }
                match self.registry.reconnect_backend(&backend.id).await {
                    Ok(_) => report.reconnected += 1,
                    Err(err) => debug!(backend_id = %backend.id, error = %err, "Backend still down"),
                }
            }
        }

        for (_, healthy) in self.registry.health_check_all().await {
            report.checked += 1;
            if !healthy {
                report.unhealthy += 1;
            }
        }

        report.purged_tokens = self.auth.purge_expired(chrono::Utc::now());
        self.security.prune();

        debug!(?report, "Maintenance pass finished");
        report
    }

    /// Run [`Gateway::run_maintenance`] every `maintenance.interval_secs`.
    ///
    /// The task holds a weak reference and exits once the gateway is
    /// dropped. Returns `None` when the interval is zero.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let secs = self.config.maintenance.interval_secs;
        if secs == 0 {
            return None;
        }
        info!(interval_secs = secs, "Starting maintenance task");

        let weak = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gateway) = weak.upgrade() else {
                    break;
                };
                gateway.run_maintenance().await;
            }
        }))
    }

    /// Check a presented admin credential.
    ///
    /// Failures count towards the repeated-auth-failure incident threshold.
    pub fn verify_admin(&self, presented: Option<&str>) -> Result<()> {
        if verify_admin_key(self.config.auth.admin_key.as_deref(), presented) {
            Ok(())
        } else {
            warn!("Admin credential rejected");
            self.security.record_auth_failure("admin");
            Err(Error::AdminRequired)
        }
    }

    /// Health summary: `{status, uptime, services}`.
    pub fn health(&self) -> Value {
        let backends = self.registry.backends();
        let connected = backends
            .iter()
            .filter(|b| b.status == AdapterStatus::Connected)
            .count();
        let security = self.security.get_security_status();
        let global = self.monitor.get_global_metrics();

        let status = if security.level == SecurityLevel::Critical {
            "critical"
        } else if connected < backends.len() || security.level == SecurityLevel::Elevated {
            "degraded"
        } else {
            "healthy"
        };

        json!({
            "status": status,
            "uptime": self.started_at.elapsed().as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "services": {
                "registry": {
                    "backends": backends.len(),
                    "connected": connected,
                },
                "auth": self.auth.stats(),
                "security": {
                    "level": security.level,
                    "recentIncidents": security.recent_incidents,
                },
                "plugins": {
                    "installed": self.plugins.get_installed_plugins().len(),
                    "runtimeInstall": self.plugins.allow_runtime_install(),
                },
                "monitor": {
                    "requests": global.metrics.request_count,
                    "inFlight": global.in_flight,
                },
            },
        })
    }

    /// Aggregated statistics for the admin surface.
    pub fn admin_stats(&self) -> Value {
        json!({
            "uptime": self.started_at.elapsed().as_secs(),
            "auth": self.auth.stats(),
            "security": self.security.get_security_status(),
            "backends": self.registry.backends(),
            "plugins": self.plugins.get_installed_plugins(),
            "metrics": {
                "global": self.monitor.get_global_metrics(),
                "backends": self.monitor.all_backend_metrics(),
            },
            "alerts": self.monitor.recent_alerts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RateLimitRule;
    use crate::domains::adapters::BackendConfig;
    use crate::domains::adapters::testing::{MockAdapter, factory_for};
    use crate::domains::auth::PLUGINS_MANAGE_PERMISSION;
    use crate::domains::dispatch::{JsonRpcRequest, JsonRpcResponse};
    use crate::domains::plugins::{ECHO_PLUGIN, MemoryStore, StaticSource, echo_manifest};
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.registry.call_timeout_ms = 200;
        config.registry.lifecycle_timeout_ms = 500;
        config.auth.admin_key = Some("admin-secret".to_string());
        config
    }

    fn gateway_with(config: Config) -> Gateway {
        let sources: Vec<Arc<dyn PluginSource>> =
            vec![Arc::new(StaticSource::new().with_manifest(echo_manifest()))];
        Gateway::with_plugins(
            config,
            ModuleCatalog::with_builtins(),
            sources,
            Arc::new(MemoryStore::new()),
        )
    }

    async fn register(gateway: &Gateway, id: &str, backend_type: &str, adapter: Arc<MockAdapter>) {
        let config = BackendConfig::new(id, id, backend_type);
        assert_ok!(
            gateway
                .registry()
                .register_backend(config, &factory_for(adapter))
                .await
        );
    }

    fn bearer(gateway: &Gateway, scopes: &[&str], permissions: &[&str]) -> String {
        let _ = gateway.auth().create_tenant("acme", "Acme");
        let _ = gateway.auth().create_identity("acme", "alice", "Alice");
        gateway
            .auth()
            .issue_token(
                "acme",
                "alice",
                scopes.iter().map(|s| s.to_string()),
                permissions.iter().map(|p| p.to_string()),
                None,
            )
            .unwrap()
            .bearer
    }

    async fn call(
        gateway: &Gateway,
        bearer: &str,
        id: i64,
        method: &str,
        params: Value,
    ) -> JsonRpcResponse {
        gateway
            .dispatcher()
            .handle(JsonRpcRequest::new(id, method, Some(params)), Some(bearer))
            .await
    }

    fn code(response: &JsonRpcResponse) -> i32 {
        response.error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_scoped_dispatch_succeeds() {
        let gateway = gateway_with(test_config());
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;
        let token = bearer(&gateway, &["slack"], &[]);

        let response = call(
            &gateway,
            &token,
            7,
            "tools/call",
            json!({"name": "slack.post", "arguments": {"text": "hi"}}),
        )
        .await;

        assert!(!response.is_error(), "{:?}", response.error);
        assert_eq!(response.id, Some(json!(7)));
        let result = response.result.unwrap();
        assert_eq!(result["tool"], "post");
        assert_eq!(result["arguments"]["text"], "hi");
    }

    #[tokio::test]
    async fn test_out_of_scope_dispatch_is_denied() {
        let gateway = gateway_with(test_config());
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;
        register(&gateway, "github", "mock", MockAdapter::echo(&["issue"])).await;
        let token = bearer(&gateway, &["slack"], &[]);

        let response = call(
            &gateway,
            &token,
            1,
            "tools/call",
            json!({"backend": "github", "name": "issue"}),
        )
        .await;

        assert_eq!(code(&response), 1005);
        assert_eq!(response.id, Some(json!(1)));
        assert_eq!(response.error.unwrap().data.unwrap()["backendId"], "github");
    }

    #[tokio::test]
    async fn test_tools_list_is_scope_filtered() {
        let gateway = gateway_with(test_config());
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post", "read"])).await;
        register(&gateway, "github", "mock", MockAdapter::echo(&["issue"])).await;
        let token = bearer(&gateway, &["slack"], &[]);

        let response = call(&gateway, &token, 1, "tools/list", json!({})).await;
        let names: Vec<String> = response.result.unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["slack.post", "slack.read"]);

        let denied = call(&gateway, &token, 2, "tools/list", json!({"backend": "github"})).await;
        assert_eq!(code(&denied), 1005);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_bearer() {
        let gateway = gateway_with(test_config());

        let anonymous = gateway
            .dispatcher()
            .handle(JsonRpcRequest::new(1, "ping", None), None)
            .await;
        assert_eq!(code(&anonymous), 1001);

        let unknown = call(&gateway, "gw_not-a-token", 2, "ping", json!({})).await;
        assert_eq!(code(&unknown), 1002);
        assert_eq!(unknown.id, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_revoked_token_is_rejected() {
        let gateway = gateway_with(test_config());
        let token = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);
        let validated = gateway.auth().validate_token(&token).unwrap();

        assert!(!call(&gateway, &token, 1, "ping", json!({})).await.is_error());
        assert_ok!(gateway.auth().revoke_token(&validated.id));
        assert_eq!(code(&call(&gateway, &token, 2, "ping", json!({})).await), 1004);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let mut config = test_config();
        config.security.rate_limits.tool_call = RateLimitRule::new(3, 60_000);
        let gateway = gateway_with(config);
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;
        let token = bearer(&gateway, &["slack"], &[]);

        for i in 0..3 {
            let response = call(&gateway, &token, i, "tools/call", json!({"name": "slack.post"})).await;
            assert!(!response.is_error());
        }
        let limited = call(&gateway, &token, 3, "tools/call", json!({"name": "slack.post"})).await;

        assert_eq!(code(&limited), 1006);
        let data = limited.error.unwrap().data.unwrap();
        assert!(data["retryAfter"].as_u64().unwrap() > 0);
        assert_eq!(data["category"], "tool_call");
    }

    #[tokio::test]
    async fn test_misbehaving_backends_yield_execution_errors() {
        let gateway = gateway_with(test_config());
        register(&gateway, "failing", "mock", MockAdapter::failing_call("upstream 500")).await;
        register(&gateway, "panicky", "mock", MockAdapter::panicking_call()).await;
        register(&gateway, "hanging", "mock", MockAdapter::hanging_call()).await;
        let token = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);

        for (i, backend) in ["failing", "panicky", "hanging"].iter().enumerate() {
            let response = call(
                &gateway,
                &token,
                i as i64,
                "tools/call",
                json!({"backend": backend, "name": "run"}),
            )
            .await;
            assert_eq!(code(&response), 2006, "backend {backend}");
            assert_eq!(response.id, Some(json!(i as i64)));
            assert_eq!(response.error.unwrap().data.unwrap()["backendId"], *backend);
        }

        // The gateway keeps serving after a panic.
        assert!(!call(&gateway, &token, 9, "ping", json!({})).await.is_error());
    }

    #[tokio::test]
    async fn test_unknown_backend_and_tool() {
        let gateway = gateway_with(test_config());
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;
        let token = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);

        let missing = call(&gateway, &token, 1, "tools/call", json!({"name": "nope.post"})).await;
        assert_eq!(code(&missing), 2004);

        let bad_tool = call(&gateway, &token, 2, "tools/call", json!({"name": "slack.delete"})).await;
        assert_eq!(code(&bad_tool), -32602);

        let unqualified = call(&gateway, &token, 3, "tools/call", json!({"name": "post"})).await;
        assert_eq!(code(&unqualified), -32602);
    }

    #[tokio::test]
    async fn test_envelope_errors() {
        let gateway = gateway_with(test_config());
        let token = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);

        let parse = gateway.dispatcher().handle_raw(b"{not json", Some(&token)).await;
        assert_eq!(code(&parse), -32700);
        assert_eq!(parse.id, None);

        let invalid = gateway
            .dispatcher()
            .handle_raw(br#"{"jsonrpc":"2.0","id":5}"#, Some(&token))
            .await;
        assert_eq!(code(&invalid), -32600);
        assert_eq!(invalid.id, Some(json!(5)));

        let unknown = call(&gateway, &token, 6, "resources/list", json!({})).await;
        assert_eq!(code(&unknown), -32601);

        let not_object = call(&gateway, &token, 8, "tools/list", json!([1, 2])).await;
        assert_eq!(code(&not_object), -32602);
    }

    #[tokio::test]
    async fn test_workflow_execution() {
        let gateway = gateway_with(test_config());
        register(&gateway, "flows", "workflow", MockAdapter::echo(&["execute_workflow"])).await;
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;
        register(&gateway, "broken", "workflow", MockAdapter::failing_call("step 3 failed")).await;
        let token = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);

        let ok = call(
            &gateway,
            &token,
            1,
            "workflows/execute",
            json!({"backend": "flows", "workflowId": "wf-1", "input": {"n": 1}}),
        )
        .await;
        let result = ok.result.unwrap();
        assert_eq!(result["tool"], "execute_workflow");
        assert_eq!(result["arguments"]["workflowId"], "wf-1");

        let wrong_type = call(
            &gateway,
            &token,
            2,
            "workflows/execute",
            json!({"backend": "slack", "workflowId": "wf-1"}),
        )
        .await;
        assert_eq!(code(&wrong_type), 3001);

        // `broken` only exposes `run`.
        let no_tool = call(
            &gateway,
            &token,
            3,
            "workflows/execute",
            json!({"backend": "broken", "workflowId": "wf-1"}),
        )
        .await;
        assert_eq!(code(&no_tool), 3001);
    }

    #[tokio::test]
    async fn test_workflow_failure_maps_to_execution_error() {
        let gateway = gateway_with(test_config());
        register(
            &gateway,
            "flows",
            "workflow",
            MockAdapter::failing_tools(&["execute_workflow"], "step 3 failed"),
        )
        .await;
        let token = bearer(&gateway, &["flows"], &[]);

        let response = call(
            &gateway,
            &token,
            1,
            "workflows/execute",
            json!({"backend": "flows", "workflowId": "wf-9"}),
        )
        .await;
        assert_eq!(code(&response), 3002);
        let error = response.error.unwrap();
        assert!(error.message.contains("step 3 failed"));
        assert_eq!(error.data.unwrap()["backendId"], "flows");
    }

    #[tokio::test]
    async fn test_plugin_management_requires_permission() {
        let gateway = gateway_with(test_config());
        let plain = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);
        let scoped = bearer(&gateway, &["echo"], &[]);
        let manager = bearer(&gateway, &["echo"], &[PLUGINS_MANAGE_PERMISSION]);

        let denied = call(&gateway, &scoped, 1, "plugins/install", json!({"name": ECHO_PLUGIN})).await;
        assert_eq!(code(&denied), 1008);

        let installed =
            call(&gateway, &manager, 2, "plugins/install", json!({"name": ECHO_PLUGIN})).await;
        assert!(!installed.is_error(), "{:?}", installed.error);

        let echoed = call(
            &gateway,
            &plain,
            3,
            "tools/call",
            json!({"name": "echo.echo", "arguments": {"message": "hello"}}),
        )
        .await;
        assert_eq!(echoed.result.unwrap()["message"], "hello");

        let listed = call(&gateway, &scoped, 4, "plugins/list", json!({})).await;
        assert_eq!(listed.result.unwrap()["plugins"][0]["name"], ECHO_PLUGIN);
    }

    #[tokio::test]
    async fn test_install_then_uninstall_restores_tool_list() {
        let gateway = gateway_with(test_config());
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;
        let token = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);

        let before = call(&gateway, &token, 1, "tools/list", json!({})).await.result;
        assert!(
            !call(&gateway, &token, 2, "plugins/install", json!({"name": ECHO_PLUGIN}))
                .await
                .is_error()
        );
        let during = call(&gateway, &token, 3, "tools/list", json!({})).await.result;
        assert_ne!(before, during);
        assert!(
            !call(&gateway, &token, 4, "plugins/uninstall", json!({"name": ECHO_PLUGIN}))
                .await
                .is_error()
        );
        let after = call(&gateway, &token, 5, "tools/list", json!({})).await.result;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_not_found() {
        let gateway = gateway_with(test_config());
        let token = bearer(&gateway, &[], &[WILDCARD_PERMISSION]);
        let response = call(&gateway, &token, 1, "plugins/install", json!({"name": "ghost"})).await;
        assert_eq!(code(&response), 2001);
    }

    #[tokio::test]
    async fn test_incident_buffer_stays_bounded() {
        let mut config = test_config();
        config.security.incident_capacity = 5;
        config.security.elevated_threshold = 2;
        config.security.critical_threshold = 4;
        config.security.auth_failure_threshold = 1;
        let gateway = gateway_with(config);

        for i in 0..20 {
            let bogus = format!("gw_bogus-{i}");
            call(&gateway, &bogus, i, "ping", json!({})).await;
        }

        assert_eq!(gateway.security().recent_incidents(100).len(), 5);
        assert_eq!(gateway.security().get_security_status().total_incidents, 20);
    }

    #[tokio::test]
    async fn test_cancelled_request_leaves_nothing_in_flight() {
        let gateway = Arc::new(gateway_with(test_config()));
        register(&gateway, "hang", "mock", MockAdapter::hanging_call()).await;
        let token = bearer(&gateway, &["hang"], &[]);

        let g = Arc::clone(&gateway);
        let task = tokio::spawn(async move {
            call(&g, &token, 1, "tools/call", json!({"name": "hang.run"})).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gateway.monitor().in_flight(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(gateway.monitor().in_flight(), 0);
        let global = gateway.monitor().get_global_metrics().metrics;
        assert_eq!(global.request_count, 1);
        assert_eq!(global.error_count, 1);
    }

    #[tokio::test]
    async fn test_maintenance_marks_and_recovers_backends() {
        let gateway = gateway_with(test_config());
        let adapter = MockAdapter::echo(&["run"]);
        register(&gateway, "svc", "mock", adapter.clone()).await;

        adapter.set_healthy(false);
        let report = gateway.run_maintenance().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.unhealthy, 1);
        assert_eq!(gateway.health()["status"], "degraded");

        // Still down: the retry fails and the backend stays in ERROR.
        let report = gateway.run_maintenance().await;
        assert_eq!(report.reconnected, 0);
        assert_eq!(report.checked, 0);

        adapter.set_healthy(true);
        let report = gateway.run_maintenance().await;
        assert_eq!(report.reconnected, 1);
        assert_eq!(report.checked, 1);
        assert_eq!(report.unhealthy, 0);
        assert_eq!(gateway.health()["status"], "healthy");
    }

    #[tokio::test]
    async fn test_maintenance_purges_expired_tokens() {
        let gateway = gateway_with(test_config());
        let _ = gateway.auth().create_tenant("acme", "Acme");
        let _ = gateway.auth().create_identity("acme", "alice", "Alice");
        assert_ok!(
            gateway
                .auth()
                .issue_token("acme", "alice", Vec::new(), Vec::new(), Some(1))
        );
        bearer(&gateway, &[], &[]);
        assert_eq!(gateway.auth().stats().tokens, 2);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let report = gateway.run_maintenance().await;
        assert_eq!(report.purged_tokens, 1);
        assert_eq!(gateway.auth().stats().tokens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_task_stops_with_gateway() {
        let mut config = test_config();
        config.maintenance.interval_secs = 5;
        let gateway = Arc::new(gateway_with(config));
        let task = gateway.spawn_maintenance().unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!task.is_finished());

        drop(gateway);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(task.is_finished());

        let mut config = test_config();
        config.maintenance.interval_secs = 0;
        assert!(Arc::new(gateway_with(config)).spawn_maintenance().is_none());
    }

    #[tokio::test]
    async fn test_random_bearers_do_not_grow_state() {
        let mut config = test_config();
        config.security.max_tracked_keys = 50;
        let gateway = gateway_with(config);

        for i in 0..2_000 {
            let bogus = format!("gw_random_{i}");
            let response = call(&gateway, &bogus, i, "ping", json!({})).await;
            assert_eq!(code(&response), 1002);
        }

        assert!(gateway.security().tracked_keys() <= 50);
    }

    #[tokio::test]
    async fn test_monitor_records_dispatches() {
        let gateway = gateway_with(test_config());
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;
        gateway.monitor().register_backend("slack", "slack");
        let token = bearer(&gateway, &["slack"], &[]);

        call(&gateway, &token, 1, "tools/call", json!({"name": "slack.post"})).await;
        call(&gateway, &token, 2, "tools/call", json!({"name": "slack.nope"})).await;

        let metrics = gateway.monitor().get_performance_metrics("slack").unwrap();
        assert_eq!(metrics.metrics.request_count, 2);
        assert_eq!(metrics.metrics.error_count, 1);
        assert_eq!(gateway.monitor().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_session_token_defaults_to_wildcard() {
        let gateway = gateway_with(test_config());
        let issued = assert_ok!(gateway.issue_session_token());
        assert!(issued.token.is_wildcard());
        assert_eq!(issued.token.tenant_id, LOCAL_TENANT);

        // A second session token reuses the tenant and identity.
        assert_ok!(gateway.issue_session_token());
    }

    #[tokio::test]
    async fn test_session_token_honours_configured_scopes() {
        let mut config = test_config();
        config.auth.session_scopes = vec!["slack".to_string()];
        let gateway = gateway_with(config);
        let issued = assert_ok!(gateway.issue_session_token());
        assert!(!issued.token.is_wildcard());
        assert!(issued.token.allows_backend("slack"));
        assert!(!issued.token.allows_backend("github"));
    }

    #[tokio::test]
    async fn test_admin_key_verification() {
        let gateway = gateway_with(test_config());
        assert_ok!(gateway.verify_admin(Some("admin-secret")));
        assert!(matches!(
            gateway.verify_admin(Some("wrong")),
            Err(Error::AdminRequired)
        ));
        assert!(matches!(gateway.verify_admin(None), Err(Error::AdminRequired)));

        let unset = gateway_with(Config::default());
        assert!(unset.verify_admin(Some("")).is_err());
    }

    #[tokio::test]
    async fn test_health_reports_services() {
        let gateway = gateway_with(test_config());
        register(&gateway, "slack", "mock", MockAdapter::echo(&["post"])).await;

        let health = gateway.health();
        assert_eq!(health["status"], "healthy");
        assert!(health["uptime"].is_u64());
        assert_eq!(health["services"]["registry"]["backends"], 1);
        assert_eq!(health["services"]["registry"]["connected"], 1);
        for service in ["registry", "auth", "security", "plugins", "monitor"] {
            assert!(health["services"].get(service).is_some(), "{service}");
        }
    }

    #[tokio::test]
    async fn test_independent_gateways_do_not_share_state() {
        let a = gateway_with(test_config());
        let b = gateway_with(test_config());
        register(&a, "slack", "mock", MockAdapter::echo(&["post"])).await;

        assert_eq!(a.registry().len(), 1);
        assert!(b.registry().is_empty());
        let token = bearer(&a, &[], &[WILDCARD_PERMISSION]);
        assert_eq!(code(&call(&b, &token, 1, "ping", json!({})).await), 1002);
    }

    #[tokio::test]
    async fn test_per_call_timeout_is_capped() {
        let gateway = gateway_with(test_config());
        register(
            &gateway,
            "slow",
            "mock",
            MockAdapter::slow_call(Duration::from_secs(5)),
        )
        .await;
        let token = bearer(&gateway, &["slow"], &[]);

        let started = Instant::now();
        let response = call(
            &gateway,
            &token,
            1,
            "tools/call",
            json!({"backend": "slow", "name": "run", "timeoutMs": 60_000}),
        )
        .await;
        assert_eq!(code(&response), 2006);
        assert_eq!(response.error.unwrap().data.unwrap()["timedOut"], true);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
