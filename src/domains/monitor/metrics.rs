//! Metric snapshots, alerts, and the rolling bucket they are computed from.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestOutcome {
    Success,
    Error,
}

impl RequestOutcome {
    pub fn from_success(success: bool) -> Self {
        if success { Self::Success } else { Self::Error }
    }
}

/// One finished request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub request_id: String,
    pub method: String,
    pub backend_id: Option<String>,
    pub duration_ms: u64,
    pub outcome: RequestOutcome,
}

/// Read-only counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    /// Error rate over the rolling window.
    pub window_error_rate: f64,
    /// p95 latency over the rolling window.
    pub window_p95_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendMetrics {
    pub backend_id: String,
    pub name: String,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub in_flight: usize,
    pub backends: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ErrorRate,
    P95Latency,
}

/// Raised once each time a window metric crosses its threshold upward.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    /// `global` or a backend id.
    pub scope: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// Thresholds a bucket evaluates after every sample.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Thresholds {
    pub window_size: usize,
    pub min_samples: usize,
    pub error_rate: f64,
    pub p95_latency_ms: u64,
}

/// Lifetime counters plus a window of the most recent samples.
pub(crate) struct Bucket {
    request_count: u64,
    error_count: u64,
    total_latency: Duration,
    max_latency: Duration,
    window: VecDeque<(Duration, bool)>,
    error_alert_active: bool,
    latency_alert_active: bool,
}

impl Bucket {
    pub fn new(window_size: usize) -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            total_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            window: VecDeque::with_capacity(window_size),
            error_alert_active: false,
            latency_alert_active: false,
        }
    }

    /// Fold a sample in; returns alerts for thresholds crossed by it.
    pub fn record(
        &mut self,
        scope: &str,
        duration: Duration,
        success: bool,
        thresholds: Thresholds,
    ) -> Vec<PerformanceAlert> {
        self.request_count += 1;
        if !success {
            self.error_count += 1;
        }
        self.total_latency += duration;
        self.max_latency = self.max_latency.max(duration);

        if self.window.len() == thresholds.window_size.max(1) {
            self.window.pop_front();
        }
        self.window.push_back((duration, success));

        let mut alerts = Vec::new();
        if self.window.len() < thresholds.min_samples {
            return alerts;
        }

        let error_rate = self.window_error_rate();
        let over = error_rate >= thresholds.error_rate;
        if over && !self.error_alert_active {
            alerts.push(alert(AlertKind::ErrorRate, scope, error_rate, thresholds.error_rate));
        }
        self.error_alert_active = over;

        let p95 = self.window_p95().as_millis() as u64;
        let over = p95 >= thresholds.p95_latency_ms;
        if over && !self.latency_alert_active {
            alerts.push(alert(
                AlertKind::P95Latency,
                scope,
                p95 as f64,
                thresholds.p95_latency_ms as f64,
            ));
        }
        self.latency_alert_active = over;

        alerts
    }

    fn window_error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let errors = self.window.iter().filter(|(_, ok)| !ok).count();
        errors as f64 / self.window.len() as f64
    }

    /// Nearest-rank p95.
    fn window_p95(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }
        let mut latencies: Vec<Duration> = self.window.iter().map(|(d, _)| *d).collect();
        latencies.sort_unstable();
        let rank = (latencies.len() * 95).div_ceil(100);
        latencies[rank.saturating_sub(1)]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let avg_latency_ms = if self.request_count == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() * 1000.0 / self.request_count as f64
        };
        MetricsSnapshot {
            request_count: self.request_count,
            error_count: self.error_count,
            avg_latency_ms,
            max_latency_ms: self.max_latency.as_millis() as u64,
            window_error_rate: self.window_error_rate(),
            window_p95_ms: self.window_p95().as_millis() as u64,
        }
    }
}

fn alert(kind: AlertKind, scope: &str, value: f64, threshold: f64) -> PerformanceAlert {
    PerformanceAlert {
        kind,
        scope: scope.to_string(),
        value,
        threshold,
        timestamp: Utc::now(),
    }
}
