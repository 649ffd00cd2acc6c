//! Fixed-window rate limiting keyed by (token id, category).

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::{RateLimitRule, RateLimitsConfig};

/// Request categories, each with its own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCategory {
    Auth,
    ToolCall,
    PluginManage,
    WorkflowExec,
    WsEvents,
}

impl RateCategory {
    /// Category charged for a protocol method.
    ///
    /// Session methods count against `auth`; discovery methods share the
    /// `tool_call` budget.
    pub fn for_method(method: &str) -> Self {
        match method {
            "initialize" | "ping" => Self::Auth,
            "workflows/execute" => Self::WorkflowExec,
            "plugins/install" | "plugins/uninstall" | "plugins/enable" | "plugins/disable" => {
                Self::PluginManage
            }
            _ => Self::ToolCall,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::ToolCall => "tool_call",
            Self::PluginManage => "plugin_manage",
            Self::WorkflowExec => "workflow_exec",
            Self::WsEvents => "ws_events",
        }
    }
}

impl fmt::Display for RateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// Process-local fixed-window counters.
pub struct RateLimiter {
    rules: RateLimitsConfig,
    max_keys: usize,
    windows: Mutex<HashMap<(String, RateCategory), Window>>,
}

impl RateLimiter {
    pub fn new(rules: RateLimitsConfig) -> Self {
        Self {
            rules,
            max_keys: usize::MAX,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Bound the number of tracked windows. When full, expired windows are
    /// dropped first, then the oldest one.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    pub fn rule(&self, category: RateCategory) -> RateLimitRule {
        match category {
            RateCategory::Auth => self.rules.auth,
            RateCategory::ToolCall => self.rules.tool_call,
            RateCategory::PluginManage => self.rules.plugin_manage,
            RateCategory::WorkflowExec => self.rules.workflow_exec,
            RateCategory::WsEvents => self.rules.ws_events,
        }
    }

    /// Count one request. On rejection returns the time left in the window,
    /// which is always positive.
    pub fn check_at(
        &self,
        key: &str,
        category: RateCategory,
        now: Instant,
    ) -> Result<(), Duration> {
        let rule = self.rule(category);
        let window_len = Duration::from_millis(rule.window_ms.max(1));

        let mut windows = self.windows.lock();
        let map_key = (key.to_string(), category);
        if !windows.contains_key(&map_key) && windows.len() >= self.max_keys {
            self.evict(&mut windows, now);
        }
        let window = windows
            .entry(map_key)
            .or_insert(Window {
                started: now,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= window_len {
            window.started = now;
            window.count = 0;
        }

        if window.count < rule.limit {
            window.count += 1;
            Ok(())
        } else {
            let remaining = window_len.saturating_sub(now.saturating_duration_since(window.started));
            Err(remaining.max(Duration::from_millis(1)))
        }
    }

    pub fn check(&self, key: &str, category: RateCategory) -> Result<(), Duration> {
        self.check_at(key, category, Instant::now())
    }

    /// Drop windows that ended before `now`.
    pub fn prune_at(&self, now: Instant) {
        let mut windows = self.windows.lock();
        self.retain_live(&mut windows, now);
    }

    fn retain_live(&self, windows: &mut HashMap<(String, RateCategory), Window>, now: Instant) {
        windows.retain(|(_, category), window| {
            let len = Duration::from_millis(self.rule(*category).window_ms.max(1));
            now.saturating_duration_since(window.started) < len
        });
    }

    fn evict(&self, windows: &mut HashMap<(String, RateCategory), Window>, now: Instant) {
        self.retain_live(windows, now);
        if windows.len() < self.max_keys {
            return;
        }
        let oldest = windows
            .iter()
            .min_by_key(|(_, w)| w.started)
            .map(|(k, _)| k.clone());
        if let Some(oldest) = oldest {
            windows.remove(&oldest);
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitsConfig {
            tool_call: RateLimitRule::new(limit, window_ms),
            ..Default::default()
        })
    }

    #[test]
    fn test_limit_then_reject_then_reset() {
        let limiter = limiter(3, 1_000);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("tok", RateCategory::ToolCall, start).is_ok());
        }
        let retry = limiter
            .check_at("tok", RateCategory::ToolCall, start + Duration::from_millis(400))
            .unwrap_err();
        assert_eq!(retry, Duration::from_millis(600));

        let later = start + Duration::from_millis(1_000);
        assert!(limiter.check_at("tok", RateCategory::ToolCall, later).is_ok());
    }

    #[test]
    fn test_keys_and_categories_are_independent() {
        let limiter = limiter(1, 1_000);
        let now = Instant::now();
        assert!(limiter.check_at("a", RateCategory::ToolCall, now).is_ok());
        assert!(limiter.check_at("b", RateCategory::ToolCall, now).is_ok());
        assert!(limiter.check_at("a", RateCategory::Auth, now).is_ok());
        assert!(limiter.check_at("a", RateCategory::ToolCall, now).is_err());
    }

    #[test]
    fn test_retry_after_is_positive_at_window_edge() {
        let limiter = limiter(0, 10);
        let now = Instant::now();
        let retry = limiter.check_at("tok", RateCategory::ToolCall, now).unwrap_err();
        assert!(retry > Duration::ZERO);
    }

    #[test]
    fn test_prune_drops_stale_windows() {
        let limiter = limiter(5, 100);
        let now = Instant::now();
        limiter.check_at("tok", RateCategory::ToolCall, now).unwrap();
        assert_eq!(limiter.tracked_keys(), 1);
        limiter.prune_at(now + Duration::from_millis(200));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_window_map_is_capped() {
        let limiter = limiter(5, 60_000).with_max_keys(10);
        let now = Instant::now();
        for i in 0..100 {
            let key = format!("tok_{i}");
            assert!(limiter.check_at(&key, RateCategory::ToolCall, now).is_ok());
        }
        assert_eq!(limiter.tracked_keys(), 10);

        // Expired windows are reclaimed before anything live is evicted.
        let later = now + Duration::from_secs(61);
        assert!(limiter.check_at("fresh", RateCategory::ToolCall, later).is_ok());
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_method_categories() {
        assert_eq!(RateCategory::for_method("tools/call"), RateCategory::ToolCall);
        assert_eq!(
            RateCategory::for_method("plugins/install"),
            RateCategory::PluginManage
        );
        assert_eq!(
            RateCategory::for_method("workflows/execute"),
            RateCategory::WorkflowExec
        );
        assert_eq!(RateCategory::for_method("initialize"), RateCategory::Auth);
    }
}
