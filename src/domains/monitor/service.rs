//! Performance monitor.
//!
//! Requests are tracked from `start_request` to `end_request`. Finished
//! requests are folded into the global bucket and, when the dispatcher
//! attached a registered backend, into that backend's bucket. Samples are
//! not retained beyond the rolling window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::metrics::{
    BackendMetrics, Bucket, GlobalMetrics, PerformanceAlert, PerformanceSample, RequestOutcome,
    Thresholds,
};
use crate::core::config::MonitorConfig;

const GLOBAL_SCOPE: &str = "global";

struct InFlight {
    method: String,
    caller_key: String,
    backend_id: Option<String>,
    started: Instant,
}

struct NamedBucket {
    name: String,
    bucket: Bucket,
}

pub struct PerformanceMonitor {
    thresholds: Thresholds,
    alert_capacity: usize,
    in_flight: Mutex<HashMap<String, InFlight>>,
    global: Mutex<Bucket>,
    backends: RwLock<HashMap<String, Mutex<NamedBucket>>>,
    alerts: Mutex<VecDeque<PerformanceAlert>>,
    alert_tx: broadcast::Sender<PerformanceAlert>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let (alert_tx, _) = broadcast::channel(config.alert_capacity.max(1));
        Self {
            thresholds: Thresholds {
                window_size: config.window_size.max(1),
                min_samples: config.min_samples,
                error_rate: config.error_rate_threshold,
                p95_latency_ms: config.p95_latency_threshold_ms,
            },
            alert_capacity: config.alert_capacity.max(1),
            in_flight: Mutex::new(HashMap::new()),
            global: Mutex::new(Bucket::new(config.window_size)),
            backends: RwLock::new(HashMap::new()),
            alerts: Mutex::new(VecDeque::new()),
            alert_tx,
        }
    }

    /// Initialize a metrics bucket. Re-registering keeps existing counters.
    pub fn register_backend(&self, id: &str, name: &str) {
        let mut backends = self.backends.write();
        backends.entry(id.to_string()).or_insert_with(|| {
            info!(backend_id = %id, "Monitoring backend");
            Mutex::new(NamedBucket {
                name: name.to_string(),
                bucket: Bucket::new(self.thresholds.window_size),
            })
        });
    }

    pub fn unregister_backend(&self, id: &str) -> bool {
        self.backends.write().remove(id).is_some()
    }

    pub fn start_request(&self, request_id: &str, method: &str, caller_key: &str) {
        let previous = self.in_flight.lock().insert(
            request_id.to_string(),
            InFlight {
                method: method.to_string(),
                caller_key: caller_key.to_string(),
                backend_id: None,
                started: Instant::now(),
            },
        );
        if previous.is_some() {
            warn!(request_id = %request_id, "Request id reused while in flight");
        }
    }

    /// Attribute an in-flight request to a backend.
    pub fn set_backend(&self, request_id: &str, backend_id: &str) {
        if let Some(entry) = self.in_flight.lock().get_mut(request_id) {
            entry.backend_id = Some(backend_id.to_string());
        }
    }

    /// Elapsed time since `start_request`, if the request is in flight.
    pub fn elapsed(&self, request_id: &str) -> Option<Duration> {
        self.in_flight
            .lock()
            .get(request_id)
            .map(|entry| entry.started.elapsed())
    }

    /// Finish a request and roll it into the counters.
    pub fn end_request(
        &self,
        request_id: &str,
        duration: Duration,
        outcome: RequestOutcome,
    ) -> Option<PerformanceSample> {
        let Some(entry) = self.in_flight.lock().remove(request_id) else {
            debug!(request_id = %request_id, "end_request for unknown request");
            return None;
        };
        let success = outcome == RequestOutcome::Success;

        let mut alerts = self
            .global
            .lock()
            .record(GLOBAL_SCOPE, duration, success, self.thresholds);

        if let Some(backend_id) = &entry.backend_id {
            let backends = self.backends.read();
            if let Some(bucket) = backends.get(backend_id) {
                alerts.extend(bucket.lock().bucket.record(
                    backend_id,
                    duration,
                    success,
                    self.thresholds,
                ));
            }
        }

        for alert in alerts {
            self.raise(alert);
        }

        debug!(
            request_id = %request_id,
            method = %entry.method,
            caller = %entry.caller_key,
            duration_ms = duration.as_millis() as u64,
            ?outcome,
            "Request finished"
        );

        Some(PerformanceSample {
            request_id: request_id.to_string(),
            method: entry.method,
            backend_id: entry.backend_id,
            duration_ms: duration.as_millis() as u64,
            outcome,
        })
    }

    fn raise(&self, alert: PerformanceAlert) {
        warn!(
            kind = ?alert.kind,
            scope = %alert.scope,
            value = alert.value,
            threshold = alert.threshold,
            "Performance alert"
        );
        {
            let mut alerts = self.alerts.lock();
            if alerts.len() == self.alert_capacity {
                alerts.pop_front();
            }
            alerts.push_back(alert.clone());
        }
        // No subscribers is fine.
        let _ = self.alert_tx.send(alert);
    }

    pub fn get_global_metrics(&self) -> GlobalMetrics {
        GlobalMetrics {
            metrics: self.global.lock().snapshot(),
            in_flight: self.in_flight(),
            backends: self.backends.read().len(),
        }
    }

    pub fn get_performance_metrics(&self, backend_id: &str) -> Option<BackendMetrics> {
        let backends = self.backends.read();
        backends.get(backend_id).map(|bucket| {
            let bucket = bucket.lock();
            BackendMetrics {
                backend_id: backend_id.to_string(),
                name: bucket.name.clone(),
                metrics: bucket.bucket.snapshot(),
            }
        })
    }

    /// Every monitored backend, ordered by id.
    pub fn all_backend_metrics(&self) -> Vec<BackendMetrics> {
        let mut ids: Vec<String> = self.backends.read().keys().cloned().collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| self.get_performance_metrics(id))
            .collect()
    }

    /// Newest first.
    pub fn recent_alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts.lock().iter().rev().cloned().collect()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<PerformanceAlert> {
        self.alert_tx.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Start a request and return a guard that ends it.
    ///
    /// A guard dropped before [`RequestGuard::finish`] records the request
    /// as an error, so cancelled requests never stay in flight.
    pub fn track(&self, request_id: &str, method: &str, caller_key: &str) -> RequestGuard<'_> {
        self.start_request(request_id, method, caller_key);
        RequestGuard {
            monitor: self,
            request_id: request_id.to_string(),
            started: Instant::now(),
            finished: false,
        }
    }
}

/// Pairs `start_request` with exactly one `end_request`.
pub struct RequestGuard<'a> {
    monitor: &'a PerformanceMonitor,
    request_id: String,
    started: Instant,
    finished: bool,
}

impl RequestGuard<'_> {
    pub fn set_backend(&self, backend_id: &str) {
        self.monitor.set_backend(&self.request_id, backend_id);
    }

    pub fn finish(mut self, outcome: RequestOutcome) -> Option<PerformanceSample> {
        self.finished = true;
        self.monitor
            .end_request(&self.request_id, self.started.elapsed(), outcome)
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(request_id = %self.request_id, "Request dropped before completion");
            self.monitor
                .end_request(&self.request_id, self.started.elapsed(), RequestOutcome::Error);
        }
    }
}
