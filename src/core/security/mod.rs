//! Security module for request validation and incident tracking.
//!
//! Every authenticated request passes through the SecurityManager before it
//! reaches the dispatcher. The pipeline is pure in-memory work: method
//! allow-list, backend scope, per-token rate limits, and payload sanity.
//!
//! ## Architecture
//!
//! - `manager.rs` - Validation pipeline, security status, failure thresholds
//! - `rate_limit.rs` - Fixed-window limiter keyed by (token id, category)
//! - `incidents.rs` - Incident types and the bounded incident log
//! - `constant_time.rs` - Constant-time comparisons for secrets
//! - `error.rs` - Validation failure reasons

mod constant_time;
mod error;
mod incidents;
mod manager;
mod rate_limit;

pub use constant_time::{constant_time_eq, verify_admin_key};
pub use error::SecurityError;
pub use incidents::{IncidentLog, IncidentType, SecurityIncident, Severity};
pub use manager::{
    RequestContext, SecurityLevel, SecurityManager, SecurityStatus, required_permission,
};
pub use rate_limit::{RateCategory, RateLimiter};
