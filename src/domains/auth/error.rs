//! Authentication error types.

use thiserror::Error;

/// Errors that can occur during authentication and token management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No bearer token was presented.
    #[error("Authentication required")]
    MissingToken,

    /// The bearer token is unknown.
    #[error("Invalid token")]
    InvalidToken,

    /// The token's time to live has elapsed.
    #[error("Token expired")]
    TokenExpired,

    /// The token was revoked.
    #[error("Token revoked")]
    TokenRevoked,

    /// No token with this id exists.
    #[error("Token not found: {0}")]
    TokenNotFound(String),

    /// The tenant does not exist.
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// A tenant with this id already exists.
    #[error("Tenant already exists: {0}")]
    TenantExists(String),

    /// The identity does not exist.
    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    /// An identity with this id already exists.
    #[error("Identity already exists: {0}")]
    IdentityExists(String),

    /// The requested time to live is outside `1..=max`.
    #[error("Invalid token TTL {ttl_secs}s (allowed: 1..={max_secs}s)")]
    InvalidTtl { ttl_secs: i64, max_secs: i64 },

    /// The identity belongs to a different tenant.
    #[error("Identity '{identity_id}' does not belong to tenant '{tenant_id}'")]
    IdentityTenantMismatch {
        identity_id: String,
        tenant_id: String,
    },
}

impl AuthError {
    /// Whether this error is a failed credential check (as opposed to an
    /// administrative lookup failure).
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::InvalidToken | Self::TokenExpired | Self::TokenRevoked
        )
    }
}
