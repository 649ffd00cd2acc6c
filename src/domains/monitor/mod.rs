//! Monitor domain module.
//!
//! Per-request latency and error accounting, rolled into global and
//! per-backend counters, with edge-triggered threshold alerts.
//!
//! ## Architecture
//!
//! - `service.rs` - PerformanceMonitor and RequestGuard: request tracking, snapshots, alert fan-out
//! - `metrics.rs` - Snapshot types, alerts, rolling bucket arithmetic

mod metrics;
mod service;

pub use metrics::{
    AlertKind, BackendMetrics, GlobalMetrics, MetricsSnapshot, PerformanceAlert,
    PerformanceSample, RequestOutcome,
};
pub use service::{PerformanceMonitor, RequestGuard};
