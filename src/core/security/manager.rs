//! Pre-dispatch validation pipeline and incident tracking.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::SecurityError;
use super::incidents::{IncidentLog, IncidentType, SecurityIncident, Severity};
use super::rate_limit::{RateCategory, RateLimiter};
use crate::core::config::SecurityConfig;
use crate::domains::auth::{GatewayToken, PLUGINS_MANAGE_PERMISSION};

/// What the pipeline needs to know about a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub method: &'a str,
    /// Backend the request targets, if any.
    pub backend_id: Option<&'a str>,
    pub params: Option<&'a Value>,
}

impl<'a> RequestContext<'a> {
    pub fn new(method: &'a str) -> Self {
        Self {
            method,
            backend_id: None,
            params: None,
        }
    }

    pub fn with_backend(mut self, backend_id: &'a str) -> Self {
        self.backend_id = Some(backend_id);
        self
    }

    pub fn with_params(mut self, params: Option<&'a Value>) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Normal,
    Elevated,
    Critical,
}

/// Aggregated view for health and admin surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    pub level: SecurityLevel,
    /// Incidents logged since startup.
    pub total_incidents: u64,
    /// Incidents inside the trailing status window.
    pub recent_incidents: usize,
    pub incidents_by_type: BTreeMap<IncidentType, u64>,
}

/// Counts events per key inside a window; reports once per window when the
/// threshold is reached.
struct ThresholdWindow {
    started: Instant,
    count: u32,
}

fn bump_threshold(
    windows: &Mutex<HashMap<String, ThresholdWindow>>,
    key: &str,
    window: Duration,
    threshold: u32,
    max_keys: usize,
    now: Instant,
) -> bool {
    let mut windows = windows.lock();
    if !windows.contains_key(key) && windows.len() >= max_keys.max(1) {
        windows.retain(|_, w| now.saturating_duration_since(w.started) < window);
        if windows.len() >= max_keys.max(1) {
            let oldest = windows
                .iter()
                .min_by_key(|(_, w)| w.started)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                windows.remove(&oldest);
            }
        }
    }

    let entry = windows.entry(key.to_string()).or_insert(ThresholdWindow {
        started: now,
        count: 0,
    });
    if now.saturating_duration_since(entry.started) >= window {
        entry.started = now;
        entry.count = 0;
    }
    entry.count += 1;
    entry.count == threshold.max(1)
}

fn depth_exceeds(value: &Value, max: usize) -> bool {
    fn walk(value: &Value, depth: usize, max: usize) -> bool {
        if depth > max {
            return true;
        }
        match value {
            Value::Array(items) => items.iter().any(|v| walk(v, depth + 1, max)),
            Value::Object(map) => map.values().any(|v| walk(v, depth + 1, max)),
            _ => false,
        }
    }
    walk(value, 1, max)
}

/// Whether a method needs a permission beyond backend scope.
pub fn required_permission(method: &str) -> Option<&'static str> {
    match method {
        "plugins/install" | "plugins/uninstall" | "plugins/enable" | "plugins/disable" => {
            Some(PLUGINS_MANAGE_PERMISSION)
        }
        _ => None,
    }
}

pub struct SecurityManager {
    config: SecurityConfig,
    allowed_methods: HashSet<String>,
    limiter: RateLimiter,
    incidents: Mutex<IncidentLog>,
    auth_failures: Mutex<HashMap<String, ThresholdWindow>>,
    rate_violations: Mutex<HashMap<String, ThresholdWindow>>,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig) -> Self {
        // The level is derived from buffered incidents, so the buffer must be
        // able to hold enough of them to reach every threshold.
        let needed = config.critical_threshold.max(config.elevated_threshold);
        let capacity = if config.incident_capacity < needed {
            warn!(
                incident_capacity = config.incident_capacity,
                critical_threshold = config.critical_threshold,
                "Incident capacity below level thresholds, raising it"
            );
            needed
        } else {
            config.incident_capacity
        };

        Self {
            allowed_methods: config.allowed_methods.iter().cloned().collect(),
            limiter: RateLimiter::new(config.rate_limits.clone())
                .with_max_keys(config.max_tracked_keys),
            incidents: Mutex::new(IncidentLog::new(capacity)),
            auth_failures: Mutex::new(HashMap::new()),
            rate_violations: Mutex::new(HashMap::new()),
            config,
        }
    }

    // ========================================================================
    // Validation pipeline
    // ========================================================================

    /// Run the pipeline in order, stopping at the first failure:
    /// method allow-list and permission, backend scope, rate limit, payload.
    pub fn validate_request(
        &self,
        request: &RequestContext<'_>,
        token: &GatewayToken,
    ) -> Result<(), SecurityError> {
        self.validate_request_at(request, token, Instant::now())
    }

    pub fn validate_request_at(
        &self,
        request: &RequestContext<'_>,
        token: &GatewayToken,
        now: Instant,
    ) -> Result<(), SecurityError> {
        if !self.allowed_methods.contains(request.method) {
            return Err(SecurityError::MethodNotAllowed(request.method.to_string()));
        }
        if let Some(permission) = required_permission(request.method) {
            if !token.has_permission(permission) {
                return Err(SecurityError::PermissionDenied {
                    permission: permission.to_string(),
                });
            }
        }

        if let Some(backend_id) = request.backend_id {
            if !token.allows_backend(backend_id) {
                debug!(token_id = %token.id, backend_id = %backend_id, "Scope check failed");
                return Err(SecurityError::scope_denied(backend_id));
            }
        }

        let category = RateCategory::for_method(request.method);
        self.check_rate_limit_at(&token.id, category, now)?;

        if let Some(params) = request.params {
            self.check_payload(params)?;
        }

        Ok(())
    }

    /// Rate-limit check on its own, for traffic outside the method pipeline.
    pub fn check_rate_limit_at(
        &self,
        token_id: &str,
        category: RateCategory,
        now: Instant,
    ) -> Result<(), SecurityError> {
        if let Err(retry_after) = self.limiter.check_at(token_id, category, now) {
            self.record_rate_limit_violation(token_id, category, now);
            return Err(SecurityError::RateLimited {
                category,
                retry_after,
            });
        }
        Ok(())
    }

    fn check_payload(&self, params: &Value) -> Result<(), SecurityError> {
        match params {
            Value::Null => return Ok(()),
            Value::Object(_) => {}
            _ => return Err(SecurityError::InvalidParams),
        }
        let size = serde_json::to_vec(params).map(|b| b.len()).unwrap_or(usize::MAX);
        if size > self.config.max_payload_bytes {
            return Err(SecurityError::PayloadTooLarge {
                size,
                max: self.config.max_payload_bytes,
            });
        }
        if depth_exceeds(params, self.config.max_payload_depth) {
            return Err(SecurityError::PayloadTooDeep {
                max: self.config.max_payload_depth,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Incidents
    // ========================================================================

    pub fn log_incident(&self, incident: SecurityIncident) {
        warn!(
            incident_type = %incident.incident_type,
            severity = ?incident.severity,
            "Security incident: {}",
            incident.message
        );
        self.incidents.lock().push(incident);
    }

    /// Count a failed authentication for a caller key (a token fingerprint
    /// or a peer address). Logs an incident when the threshold is reached.
    pub fn record_auth_failure(&self, key: &str) {
        self.record_auth_failure_at(key, Instant::now());
    }

    pub fn record_auth_failure_at(&self, key: &str, now: Instant) {
        let window = Duration::from_secs(self.config.auth_failure_window_secs);
        if bump_threshold(
            &self.auth_failures,
            key,
            window,
            self.config.auth_failure_threshold,
            self.config.max_tracked_keys,
            now,
        ) {
            self.log_incident(
                SecurityIncident::new(
                    IncidentType::RepeatedAuthFailure,
                    Severity::High,
                    format!(
                        "{} failed authentications within {}s",
                        self.config.auth_failure_threshold, self.config.auth_failure_window_secs
                    ),
                )
                .with_metadata("callerKey", key),
            );
        }
    }

    fn record_rate_limit_violation(&self, token_id: &str, category: RateCategory, now: Instant) {
        let window = Duration::from_secs(self.config.rate_limit_abuse_window_secs);
        if bump_threshold(
            &self.rate_violations,
            token_id,
            window,
            self.config.rate_limit_abuse_threshold,
            self.config.max_tracked_keys,
            now,
        ) {
            self.log_incident(
                SecurityIncident::new(
                    IncidentType::RateLimitAbuse,
                    Severity::Medium,
                    format!(
                        "{} rate-limit rejections within {}s",
                        self.config.rate_limit_abuse_threshold,
                        self.config.rate_limit_abuse_window_secs
                    ),
                )
                .with_metadata("tokenId", token_id)
                .with_metadata("category", category.as_str()),
            );
        }
    }

    /// Newest first.
    pub fn recent_incidents(&self, limit: usize) -> Vec<SecurityIncident> {
        self.incidents.lock().recent(limit)
    }

    pub fn get_security_status(&self) -> SecurityStatus {
        self.get_security_status_at(Utc::now())
    }

    pub fn get_security_status_at(&self, now: DateTime<Utc>) -> SecurityStatus {
        let window = chrono::Duration::seconds(self.config.status_window_secs as i64);
        let log = self.incidents.lock();

        let mut recent = 0usize;
        let mut saw_critical = false;
        for incident in log.since(now - window) {
            recent += 1;
            saw_critical |= incident.severity == Severity::Critical;
        }

        let mut level = if recent >= self.config.critical_threshold {
            SecurityLevel::Critical
        } else if recent >= self.config.elevated_threshold {
            SecurityLevel::Elevated
        } else {
            SecurityLevel::Normal
        };
        if saw_critical {
            level = level.max(SecurityLevel::Elevated);
        }

        SecurityStatus {
            level,
            total_incidents: log.total(),
            recent_incidents: recent,
            incidents_by_type: log.counts().clone(),
        }
    }

    /// Drop expired rate-limit and failure-counting windows.
    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    pub fn prune_at(&self, now: Instant) {
        self.limiter.prune_at(now);
        let abuse_window = Duration::from_secs(self.config.rate_limit_abuse_window_secs);
        self.rate_violations
            .lock()
            .retain(|_, w| now.saturating_duration_since(w.started) < abuse_window);
        let auth_window = Duration::from_secs(self.config.auth_failure_window_secs);
        self.auth_failures
            .lock()
            .retain(|_, w| now.saturating_duration_since(w.started) < auth_window);
    }

    /// Keys currently held by the limiter and failure counters.
    pub fn tracked_keys(&self) -> usize {
        self.limiter.tracked_keys()
            + self.auth_failures.lock().len()
            + self.rate_violations.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{RateLimitRule, RateLimitsConfig};
    use crate::domains::auth::WILDCARD_PERMISSION;
    use serde_json::json;

    fn token(scopes: &[&str], permissions: &[&str]) -> GatewayToken {
        GatewayToken {
            id: "tok_1".to_string(),
            tenant_id: "acme".to_string(),
            identity_id: "alice".to_string(),
            scoped_backend_ids: scopes.iter().map(|s| s.to_string()).collect(),
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
            issued_at: Utc::now(),
            ttl_secs: 3600,
            revoked: false,
        }
    }

    fn manager_with(config: SecurityConfig) -> SecurityManager {
        SecurityManager::new(config)
    }

    fn manager() -> SecurityManager {
        manager_with(SecurityConfig::default())
    }

    #[test]
    fn test_pipeline_accepts_scoped_call() {
        let manager = manager();
        let params = json!({"name": "slack.send", "arguments": {}});
        let request = RequestContext::new("tools/call")
            .with_backend("slack")
            .with_params(Some(&params));
        assert!(manager.validate_request(&request, &token(&["slack"], &[])).is_ok());
    }

    #[test]
    fn test_pipeline_order_method_before_scope() {
        let manager = manager();
        let request = RequestContext::new("admin/shutdown").with_backend("github");
        assert_eq!(
            manager.validate_request(&request, &token(&["slack"], &[])),
            Err(SecurityError::MethodNotAllowed("admin/shutdown".to_string()))
        );
    }

    #[test]
    fn test_scope_denied() {
        let manager = manager();
        let request = RequestContext::new("tools/call").with_backend("github");
        assert_eq!(
            manager.validate_request(&request, &token(&["slack"], &[])),
            Err(SecurityError::scope_denied("github"))
        );
        let wildcard = token(&[], &[WILDCARD_PERMISSION]);
        assert!(manager.validate_request(&request, &wildcard).is_ok());
    }

    #[test]
    fn test_plugin_methods_need_permission() {
        let manager = manager();
        let request = RequestContext::new("plugins/install");
        assert!(matches!(
            manager.validate_request(&request, &token(&[], &[])),
            Err(SecurityError::PermissionDenied { .. })
        ));
        assert!(
            manager
                .validate_request(&request, &token(&[], &[PLUGINS_MANAGE_PERMISSION]))
                .is_ok()
        );
    }

    #[test]
    fn test_rate_limit_then_recovery() {
        let manager = manager_with(SecurityConfig {
            rate_limits: RateLimitsConfig {
                tool_call: RateLimitRule::new(2, 1_000),
                ..Default::default()
            },
            ..Default::default()
        });
        let t = token(&["slack"], &[]);
        let request = RequestContext::new("tools/call").with_backend("slack");
        let now = Instant::now();

        assert!(manager.validate_request_at(&request, &t, now).is_ok());
        assert!(manager.validate_request_at(&request, &t, now).is_ok());
        match manager.validate_request_at(&request, &t, now) {
            Err(SecurityError::RateLimited {
                category,
                retry_after,
            }) => {
                assert_eq!(category, RateCategory::ToolCall);
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        let after = now + Duration::from_millis(1_000);
        assert!(manager.validate_request_at(&request, &t, after).is_ok());
    }

    #[test]
    fn test_payload_checks() {
        let manager = manager_with(SecurityConfig {
            max_payload_bytes: 64,
            max_payload_depth: 3,
            ..Default::default()
        });
        let t = token(&[], &[WILDCARD_PERMISSION]);

        let array = json!([1, 2]);
        let req = RequestContext::new("tools/list").with_params(Some(&array));
        assert_eq!(
            manager.validate_request(&req, &t),
            Err(SecurityError::InvalidParams)
        );

        let big = json!({"blob": "x".repeat(100)});
        let req = RequestContext::new("tools/list").with_params(Some(&big));
        assert!(matches!(
            manager.validate_request(&req, &t),
            Err(SecurityError::PayloadTooLarge { .. })
        ));

        let deep = json!({"a": {"b": {"c": {}}}});
        let req = RequestContext::new("tools/list").with_params(Some(&deep));
        assert_eq!(
            manager.validate_request(&req, &t),
            Err(SecurityError::PayloadTooDeep { max: 3 })
        );

        let null = Value::Null;
        let req = RequestContext::new("tools/list").with_params(Some(&null));
        assert!(manager.validate_request(&req, &t).is_ok());
    }

    #[test]
    fn test_repeated_auth_failures_log_once_per_window() {
        let manager = manager_with(SecurityConfig {
            auth_failure_threshold: 3,
            ..Default::default()
        });
        let now = Instant::now();
        for _ in 0..5 {
            manager.record_auth_failure_at("abc123", now);
        }
        let incidents = manager.recent_incidents(10);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].incident_type, IncidentType::RepeatedAuthFailure);
    }

    #[test]
    fn test_rate_limit_abuse_incident() {
        let manager = manager_with(SecurityConfig {
            rate_limits: RateLimitsConfig {
                tool_call: RateLimitRule::new(1, 60_000),
                ..Default::default()
            },
            rate_limit_abuse_threshold: 2,
            ..Default::default()
        });
        let t = token(&[], &[WILDCARD_PERMISSION]);
        let request = RequestContext::new("tools/list");
        let now = Instant::now();
        for _ in 0..3 {
            let _ = manager.validate_request_at(&request, &t, now);
        }
        let status = manager.get_security_status();
        assert_eq!(status.incidents_by_type[&IncidentType::RateLimitAbuse], 1);
    }

    #[test]
    fn test_status_levels() {
        let manager = manager_with(SecurityConfig {
            elevated_threshold: 2,
            critical_threshold: 4,
            incident_capacity: 10,
            ..Default::default()
        });
        assert_eq!(manager.get_security_status().level, SecurityLevel::Normal);

        manager.log_incident(SecurityIncident::new(
            IncidentType::InternalError,
            Severity::Critical,
            "boom",
        ));
        assert_eq!(manager.get_security_status().level, SecurityLevel::Elevated);

        for _ in 0..3 {
            manager.log_incident(SecurityIncident::new(
                IncidentType::InternalError,
                Severity::Low,
                "minor",
            ));
        }
        assert_eq!(manager.get_security_status().level, SecurityLevel::Critical);

        // Outside the trailing window nothing counts.
        let later = Utc::now() + chrono::Duration::hours(1);
        let status = manager.get_security_status_at(later);
        assert_eq!(status.level, SecurityLevel::Normal);
        assert_eq!(status.total_incidents, 4);
    }

    #[test]
    fn test_incident_buffer_stays_bounded() {
        let manager = manager_with(SecurityConfig {
            incident_capacity: 5,
            elevated_threshold: 2,
            critical_threshold: 4,
            ..Default::default()
        });
        for _ in 0..20 {
            manager.log_incident(SecurityIncident::new(
                IncidentType::InternalError,
                Severity::Low,
                "x",
            ));
        }
        assert_eq!(manager.recent_incidents(100).len(), 5);
        assert_eq!(manager.get_security_status().total_incidents, 20);
    }
    #[test]
    fn test_failure_counters_stay_bounded() {
        let manager = manager_with(SecurityConfig {
            max_tracked_keys: 100,
            ..Default::default()
        });
        let now = Instant::now();
        for i in 0..5_000 {
            manager.record_auth_failure_at(&format!("caller_{i}"), now);
        }
        assert_eq!(manager.auth_failures.lock().len(), 100);

        // The newest caller is still counted after eviction.
        manager.record_auth_failure_at("caller_4999", now);
        assert_eq!(manager.auth_failures.lock()["caller_4999"].count, 2);
    }

    #[test]
    fn test_prune_releases_expired_keys() {
        let manager = manager();
        let now = Instant::now();
        manager.record_auth_failure_at("caller", now);
        let t = token(&[], &[WILDCARD_PERMISSION]);
        assert!(
            manager
                .validate_request_at(&RequestContext::new("ping"), &t, now)
                .is_ok()
        );
        assert_eq!(manager.tracked_keys(), 2);

        manager.prune_at(now + Duration::from_secs(3_600));
        assert_eq!(manager.tracked_keys(), 0);
    }

    #[test]
    fn test_small_incident_buffer_still_reaches_critical() {
        let manager = manager_with(SecurityConfig {
            incident_capacity: 2,
            elevated_threshold: 2,
            critical_threshold: 4,
            ..Default::default()
        });
        for _ in 0..4 {
            manager.log_incident(SecurityIncident::new(
                IncidentType::InternalError,
                Severity::Low,
                "x",
            ));
        }
        assert_eq!(manager.get_security_status().level, SecurityLevel::Critical);
    }
}
