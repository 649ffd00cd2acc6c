//! Configuration management for the gateway.
//!
//! This module provides a centralized configuration structure that can be
//! populated from environment variables or defaults. Every component of the
//! gateway reads its own section; nothing reads the environment directly.

use super::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport configuration.
    pub transport: TransportConfig,

    /// Token and admin credential configuration.
    pub auth: AuthConfig,

    /// Request validation, rate limits, and incident tracking.
    pub security: SecurityConfig,

    /// Adapter registry timeouts.
    pub registry: RegistryConfig,

    /// Plugin sources and install policy.
    pub plugins: PluginsConfig,

    /// Performance monitoring and alert thresholds.
    pub monitor: MonitorConfig,

    /// Periodic housekeeping.
    pub maintenance: MaintenanceConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tool-gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_timestamps: true,
        }
    }
}

// ============================================================================
// Auth
// ============================================================================

/// Token issuance and admin credential configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Time to live applied when a token is issued without one.
    pub default_token_ttl_secs: i64,

    /// Upper bound on any requested time to live.
    pub max_token_ttl_secs: i64,

    /// Static credential guarding the admin surface. Admin routes are
    /// refused entirely when unset.
    pub admin_key: Option<String>,

    /// Backend ids granted to the stdio session token. Empty means wildcard.
    pub session_scopes: Vec<String>,
}

/// Custom Debug implementation to redact secrets from logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("default_token_ttl_secs", &self.default_token_ttl_secs)
            .field("max_token_ttl_secs", &self.max_token_ttl_secs)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "[REDACTED]"))
            .field("session_scopes", &self.session_scopes)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_token_ttl_secs: 3600,
            max_token_ttl_secs: 30 * 24 * 3600,
            admin_key: None,
            session_scopes: Vec::new(),
        }
    }
}

// ============================================================================
// Security
// ============================================================================

/// A fixed-window limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub limit: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }
}

/// One limit per request category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    pub auth: RateLimitRule,
    pub tool_call: RateLimitRule,
    pub plugin_manage: RateLimitRule,
    pub workflow_exec: RateLimitRule,
    pub ws_events: RateLimitRule,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            auth: RateLimitRule::new(20, 60_000),
            tool_call: RateLimitRule::new(120, 60_000),
            plugin_manage: RateLimitRule::new(10, 60_000),
            workflow_exec: RateLimitRule::new(30, 60_000),
            ws_events: RateLimitRule::new(300, 60_000),
        }
    }
}

/// Configuration for the request validation pipeline and incident log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Methods accepted by the pipeline. Anything else is rejected first.
    pub allowed_methods: Vec<String>,

    /// Per-category rate limits.
    pub rate_limits: RateLimitsConfig,

    /// Maximum serialized size of `params` in bytes.
    pub max_payload_bytes: usize,

    /// Maximum nesting depth of `params`.
    pub max_payload_depth: usize,

    /// Capacity of the incident ring buffer.
    pub incident_capacity: usize,

    /// Trailing window used to derive the security level.
    pub status_window_secs: u64,

    /// Incidents in the window at which the level becomes elevated.
    pub elevated_threshold: usize,

    /// Incidents in the window at which the level becomes critical.
    pub critical_threshold: usize,

    /// Failed authentications per caller key before an incident is logged.
    pub auth_failure_threshold: u32,

    /// Window for counting failed authentications.
    pub auth_failure_window_secs: u64,

    /// Rate-limit rejections per token before an abuse incident is logged.
    pub rate_limit_abuse_threshold: u32,

    /// Window for counting rate-limit rejections.
    pub rate_limit_abuse_window_secs: u64,

    /// Upper bound on keys held by each rate-limit and failure counter map.
    pub max_tracked_keys: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_methods: [
                "ping",
                "initialize",
                "tools/list",
                "tools/call",
                "backends/list",
                "plugins/list",
                "plugins/install",
                "plugins/uninstall",
                "plugins/enable",
                "plugins/disable",
                "workflows/execute",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            rate_limits: RateLimitsConfig::default(),
            max_payload_bytes: 1024 * 1024,
            max_payload_depth: 32,
            incident_capacity: 1000,
            status_window_secs: 300,
            elevated_threshold: 10,
            critical_threshold: 50,
            auth_failure_threshold: 5,
            auth_failure_window_secs: 300,
            rate_limit_abuse_threshold: 10,
            rate_limit_abuse_window_secs: 300,
            max_tracked_keys: 10_000,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Adapter registry timeouts and channel sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Default bound on a single tool call.
    pub call_timeout_ms: u64,

    /// Bound on initialize, connect, disconnect, cleanup and health checks.
    pub lifecycle_timeout_ms: u64,

    /// Buffered registry events per subscriber.
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            lifecycle_timeout_ms: 10_000,
            event_capacity: 64,
        }
    }
}

// ============================================================================
// Plugins
// ============================================================================

/// Plugin sources, persistence, and install policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Whether plugins may be installed, removed, enabled or disabled while
    /// the gateway is running.
    pub allow_runtime_install: bool,

    /// File holding installed plugin records. In-memory when unset.
    pub store_path: Option<PathBuf>,

    /// Directory of `<package>/plugin.json` manifests.
    pub local_dir: Option<PathBuf>,

    /// Base URL of a remote manifest registry.
    pub registry_url: Option<String>,

    /// Buffered plugin events per subscriber.
    pub event_capacity: usize,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            allow_runtime_install: true,
            store_path: None,
            local_dir: None,
            registry_url: None,
            event_capacity: 64,
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Rolling window and alert thresholds for the performance monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Number of most recent requests considered by alerting.
    pub window_size: usize,

    /// Samples required in the window before alerts are evaluated.
    pub min_samples: usize,

    /// Error rate in `[0, 1]` that raises an alert.
    pub error_rate_threshold: f64,

    /// p95 latency in milliseconds that raises an alert.
    pub p95_latency_threshold_ms: u64,

    /// Alerts retained for `recent_alerts`.
    pub alert_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_samples: 10,
            error_rate_threshold: 0.5,
            p95_latency_threshold_ms: 5_000,
            alert_capacity: 100,
        }
    }
}

// ============================================================================
// Maintenance
// ============================================================================

/// Background housekeeping: backend health checks, reconnects, expired
/// token purging, and pruning of rate-limit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between passes. Zero disables the background task.
    pub interval_secs: u64,

    /// Retry backends in the ERROR state on each pass.
    pub reconnect_failed: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            reconnect_failed: true,
        }
    }
}

// ============================================================================
// Environment loading
// ============================================================================

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            None
        }
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `GATEWAY_`.
    /// For example: `GATEWAY_SERVER_NAME`, `GATEWAY_LOG_LEVEL`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = std::env::var("GATEWAY_SERVER_NAME") {
            config.server.name = name;
        }

        if let Ok(level) = std::env::var("GATEWAY_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.transport = TransportConfig::from_env();

        // Auth
        if let Ok(key) = std::env::var("GATEWAY_ADMIN_KEY") {
            config.auth.admin_key = Some(key);
            info!("Admin key loaded from environment");
        } else {
            warn!("GATEWAY_ADMIN_KEY not set - admin routes are disabled");
        }
        if let Some(ttl) = env_parse("GATEWAY_TOKEN_TTL_SECS") {
            config.auth.default_token_ttl_secs = ttl;
        }
        if let Some(ttl) = env_parse("GATEWAY_MAX_TOKEN_TTL_SECS") {
            config.auth.max_token_ttl_secs = ttl;
        }
        if let Some(scopes) = env_list("GATEWAY_SESSION_SCOPES") {
            config.auth.session_scopes = scopes;
        }

        // Security
        if let Some(methods) = env_list("GATEWAY_ALLOWED_METHODS") {
            config.security.allowed_methods = methods;
        }
        if let Some(bytes) = env_parse("GATEWAY_MAX_PAYLOAD_BYTES") {
            config.security.max_payload_bytes = bytes;
        }
        if let Some(limit) = env_parse("GATEWAY_TOOL_CALL_LIMIT") {
            config.security.rate_limits.tool_call.limit = limit;
        }
        if let Some(capacity) = env_parse("GATEWAY_INCIDENT_CAPACITY") {
            config.security.incident_capacity = capacity;
        }

        // Registry
        if let Some(timeout) = env_parse("GATEWAY_CALL_TIMEOUT_MS") {
            config.registry.call_timeout_ms = timeout;
        }

        // Plugins
        if let Some(allow) = env_parse("GATEWAY_ALLOW_RUNTIME_INSTALL") {
            config.plugins.allow_runtime_install = allow;
            info!("Runtime plugin install allowed: {}", allow);
        }
        if let Ok(path) = std::env::var("GATEWAY_PLUGIN_STORE") {
            config.plugins.store_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("GATEWAY_PLUGIN_DIR") {
            config.plugins.local_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("GATEWAY_PLUGIN_REGISTRY_URL") {
            config.plugins.registry_url = Some(url);
        }

        // Monitor
        if let Some(size) = env_parse("GATEWAY_MONITOR_WINDOW") {
            config.monitor.window_size = size;
        }

        // Maintenance
        if let Some(secs) = env_parse("GATEWAY_MAINTENANCE_INTERVAL_SECS") {
            config.maintenance.interval_secs = secs;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests run serially
    static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_admin_key_from_env() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("GATEWAY_ADMIN_KEY", "admin_12345");
        }
        let config = Config::from_env();
        assert_eq!(config.auth.admin_key.as_deref(), Some("admin_12345"));
        unsafe {
            std::env::remove_var("GATEWAY_ADMIN_KEY");
        }
    }

    #[test]
    fn test_lists_and_numbers_from_env() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("GATEWAY_SESSION_SCOPES", "slack, github,");
            std::env::set_var("GATEWAY_CALL_TIMEOUT_MS", "250");
            std::env::set_var("GATEWAY_ALLOW_RUNTIME_INSTALL", "false");
        }
        let config = Config::from_env();
        assert_eq!(config.auth.session_scopes, vec!["slack", "github"]);
        assert_eq!(config.registry.call_timeout_ms, 250);
        assert!(!config.plugins.allow_runtime_install);
        unsafe {
            std::env::remove_var("GATEWAY_SESSION_SCOPES");
            std::env::remove_var("GATEWAY_CALL_TIMEOUT_MS");
            std::env::remove_var("GATEWAY_ALLOW_RUNTIME_INSTALL");
        }
    }

    #[test]
    fn test_unparsable_value_keeps_default() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("GATEWAY_MAX_PAYLOAD_BYTES", "lots");
        }
        let config = Config::from_env();
        assert_eq!(
            config.security.max_payload_bytes,
            SecurityConfig::default().max_payload_bytes
        );
        unsafe {
            std::env::remove_var("GATEWAY_MAX_PAYLOAD_BYTES");
        }
    }

    #[test]
    fn test_admin_key_redacted_in_debug() {
        let auth = AuthConfig {
            admin_key: Some("super_secret_key".to_string()),
            ..Default::default()
        };
        let debug_str = format!("{:?}", auth);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super_secret_key"));
    }

    #[test]
    fn test_default_allow_list_covers_plugin_methods() {
        let config = Config::default();
        assert!(
            config
                .security
                .allowed_methods
                .iter()
                .any(|m| m == "plugins/install")
        );
        assert_eq!(config.registry.call_timeout_ms, 30_000);
    }
}
