//! Tenants, identities, and gateway tokens.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Permission granting access to every backend and every gated method.
pub const WILDCARD_PERMISSION: &str = "*";

/// Permission required for plugin lifecycle methods.
pub const PLUGINS_MANAGE_PERMISSION: &str = "plugins:manage";

/// Isolation boundary owning identities and tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A principal inside a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Token metadata. The bearer string itself is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayToken {
    pub id: String,
    pub tenant_id: String,
    pub identity_id: String,
    pub scoped_backend_ids: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    /// Time to live in seconds.
    pub ttl_secs: i64,
    pub revoked: bool,
}

impl GatewayToken {
    /// `issued_at + ttl`, saturating at the end of representable time.
    pub fn expires_at(&self) -> DateTime<Utc> {
        TimeDelta::try_seconds(self.ttl_secs)
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `now > issued_at + ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn is_wildcard(&self) -> bool {
        self.permissions.contains(WILDCARD_PERMISSION)
    }

    /// Holds the named permission, or the wildcard.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_wildcard() || self.permissions.contains(permission)
    }

    /// Scope check: the backend is in scope, or the token is a wildcard.
    pub fn allows_backend(&self, backend_id: &str) -> bool {
        self.is_wildcard() || self.scoped_backend_ids.contains(backend_id)
    }
}

/// Result of issuing a token: the metadata plus the one-time bearer value.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: GatewayToken,
    /// The bearer value. It cannot be retrieved again after issuance.
    pub bearer: String,
}
