//! Request validation error types.

use std::time::Duration;

use thiserror::Error;

use super::rate_limit::RateCategory;

/// Reasons the validation pipeline rejects a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// The method is not on the allow-list.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The token lacks a permission the method requires.
    #[error("Missing permission: {permission}")]
    PermissionDenied { permission: String },

    /// The requested backend is outside the token's scope.
    #[error("Backend '{backend_id}' is outside the token scope")]
    ScopeDenied { backend_id: String },

    /// The caller exhausted its window for this category.
    #[error("Rate limit exceeded for {category}, retry after {}ms", retry_after.as_millis())]
    RateLimited {
        category: RateCategory,
        retry_after: Duration,
    },

    /// Serialized params exceed the size limit.
    #[error("Payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Params nest deeper than allowed.
    #[error("Payload nesting depth exceeds limit of {max}")]
    PayloadTooDeep { max: usize },

    /// Params are present but not an object.
    #[error("Params must be an object")]
    InvalidParams,
}

impl SecurityError {
    pub fn scope_denied(backend_id: impl Into<String>) -> Self {
        Self::ScopeDenied {
            backend_id: backend_id.into(),
        }
    }

    /// Seconds to wait, rounded up, for rate-limit rejections.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => {
                Some(retry_after.as_millis().div_ceil(1000) as u64)
            }
            _ => None,
        }
    }
}
