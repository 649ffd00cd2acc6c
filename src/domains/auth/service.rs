//! Auth service implementation.
//!
//! The AuthService owns tenants, identities, and gateway tokens. Tokens are
//! stored by the SHA-256 digest of their bearer value; the bearer itself is
//! handed out once at issuance and never kept.
//!
//! Validation is an in-memory lookup followed by a constant-time digest
//! comparison. Expiry is checked lazily on validation; `purge_expired` exists
//! for housekeeping and is never called on the request path.

use std::collections::{BTreeSet, HashMap};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::error::AuthError;
use super::token::{GatewayToken, Identity, IssuedToken, Tenant};
use crate::core::config::AuthConfig;
use crate::core::security::constant_time_eq;

/// Prefix of every bearer value.
const BEARER_PREFIX: &str = "gw_";

/// Random bytes per bearer value (256 bits).
const BEARER_ENTROPY_BYTES: usize = 32;

/// Length of the digest prefix used as a log-safe fingerprint.
const FINGERPRINT_LEN: usize = 12;

struct StoredToken {
    digest: [u8; 32],
    token: GatewayToken,
}

#[derive(Default)]
struct AuthState {
    tenants: HashMap<String, Tenant>,
    identities: HashMap<String, Identity>,
    /// Key: hex digest of the bearer value.
    tokens: HashMap<String, StoredToken>,
    /// Token id to hex digest.
    token_index: HashMap<String, String>,
}

/// Aggregate counts for health and admin surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStats {
    pub tenants: usize,
    pub identities: usize,
    pub tokens: usize,
    pub revoked_tokens: usize,
}

/// Service for issuing, validating, and revoking gateway tokens.
pub struct AuthService {
    config: AuthConfig,
    state: RwLock<AuthState>,
}

fn digest(bearer: &str) -> [u8; 32] {
    Sha256::digest(bearer.as_bytes()).into()
}

fn generate_bearer() -> String {
    let mut bytes = [0u8; BEARER_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", BEARER_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

impl AuthService {
    /// Create a new AuthService with the given configuration.
    pub fn new(config: AuthConfig) -> Self {
        info!("Initializing AuthService");
        Self {
            config,
            state: RwLock::new(AuthState::default()),
        }
    }

    /// Log-safe fingerprint of a bearer value.
    pub fn fingerprint(bearer: &str) -> String {
        let mut hex = hex::encode(digest(bearer));
        hex.truncate(FINGERPRINT_LEN);
        hex
    }

    // ========================================================================
    // Tenants and identities
    // ========================================================================

    pub fn create_tenant(&self, id: &str, name: &str) -> Result<Tenant, AuthError> {
        let mut state = self.state.write();
        if state.tenants.contains_key(id) {
            return Err(AuthError::TenantExists(id.to_string()));
        }
        let tenant = Tenant {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.tenants.insert(id.to_string(), tenant.clone());
        info!(tenant_id = %id, "Created tenant");
        Ok(tenant)
    }

    pub fn create_identity(
        &self,
        tenant_id: &str,
        identity_id: &str,
        name: &str,
    ) -> Result<Identity, AuthError> {
        let mut state = self.state.write();
        if !state.tenants.contains_key(tenant_id) {
            return Err(AuthError::TenantNotFound(tenant_id.to_string()));
        }
        if state.identities.contains_key(identity_id) {
            return Err(AuthError::IdentityExists(identity_id.to_string()));
        }
        let identity = Identity {
            id: identity_id.to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state
            .identities
            .insert(identity_id.to_string(), identity.clone());
        info!(tenant_id = %tenant_id, identity_id = %identity_id, "Created identity");
        Ok(identity)
    }

    pub fn tenants(&self) -> Vec<Tenant> {
        let mut tenants: Vec<_> = self.state.read().tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        tenants
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    /// Issue a token for an identity.
    ///
    /// `ttl_secs` falls back to the configured default and must lie in
    /// `1..=max_token_ttl_secs`. The returned bearer value is the only copy.
    #[instrument(skip(self, scoped_backend_ids, permissions))]
    pub fn issue_token(
        &self,
        tenant_id: &str,
        identity_id: &str,
        scoped_backend_ids: impl IntoIterator<Item = String>,
        permissions: impl IntoIterator<Item = String>,
        ttl_secs: Option<i64>,
    ) -> Result<IssuedToken, AuthError> {
        let ttl_secs = ttl_secs.unwrap_or(self.config.default_token_ttl_secs);
        let max_secs = self.config.max_token_ttl_secs;
        if ttl_secs <= 0 || ttl_secs > max_secs {
            return Err(AuthError::InvalidTtl { ttl_secs, max_secs });
        }

        let mut state = self.state.write();

        if !state.tenants.contains_key(tenant_id) {
            return Err(AuthError::TenantNotFound(tenant_id.to_string()));
        }
        let identity = state
            .identities
            .get(identity_id)
            .ok_or_else(|| AuthError::IdentityNotFound(identity_id.to_string()))?;
        if identity.tenant_id != tenant_id {
            return Err(AuthError::IdentityTenantMismatch {
                identity_id: identity_id.to_string(),
                tenant_id: tenant_id.to_string(),
            });
        }

        let bearer = generate_bearer();
        let digest = digest(&bearer);
        let key = hex::encode(digest);

        let token = GatewayToken {
            id: format!("tok_{}", uuid::Uuid::new_v4().simple()),
            tenant_id: tenant_id.to_string(),
            identity_id: identity_id.to_string(),
            scoped_backend_ids: scoped_backend_ids.into_iter().collect::<BTreeSet<_>>(),
            permissions: permissions.into_iter().collect::<BTreeSet<_>>(),
            issued_at: Utc::now(),
            ttl_secs,
            revoked: false,
        };

        state.token_index.insert(token.id.clone(), key.clone());
        state.tokens.insert(
            key,
            StoredToken {
                digest,
                token: token.clone(),
            },
        );

        info!(token_id = %token.id, "Issued token");
        Ok(IssuedToken { token, bearer })
    }

    /// Validate a bearer value against the current time.
    pub fn validate_token(&self, bearer: &str) -> Result<GatewayToken, AuthError> {
        self.validate_token_at(bearer, Utc::now())
    }

    /// Validate a bearer value as of `now`.
    pub fn validate_token_at(
        &self,
        bearer: &str,
        now: DateTime<Utc>,
    ) -> Result<GatewayToken, AuthError> {
        if bearer.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let presented = digest(bearer);
        let state = self.state.read();
        let stored = state
            .tokens
            .get(&hex::encode(presented))
            .ok_or(AuthError::InvalidToken)?;

        if !constant_time_eq(&stored.digest, &presented) {
            return Err(AuthError::InvalidToken);
        }
        if stored.token.revoked {
            return Err(AuthError::TokenRevoked);
        }
        if stored.token.is_expired_at(now) {
            debug!(token_id = %stored.token.id, "Token expired");
            return Err(AuthError::TokenExpired);
        }

        Ok(stored.token.clone())
    }

    /// Revoke a token by id. Later validations fail immediately.
    pub fn revoke_token(&self, token_id: &str) -> Result<(), AuthError> {
        let mut state = self.state.write();
        let key = state
            .token_index
            .get(token_id)
            .cloned()
            .ok_or_else(|| AuthError::TokenNotFound(token_id.to_string()))?;
        match state.tokens.get_mut(&key) {
            Some(stored) => {
                stored.token.revoked = true;
                warn!(token_id = %token_id, "Revoked token");
                Ok(())
            }
            None => Err(AuthError::TokenNotFound(token_id.to_string())),
        }
    }

    /// Scope check used by the security pipeline.
    pub fn check_scope(token: &GatewayToken, backend_id: &str) -> bool {
        token.allows_backend(backend_id)
    }

    /// Token metadata for a tenant, oldest first.
    pub fn list_tokens(&self, tenant_id: &str) -> Vec<GatewayToken> {
        let state = self.state.read();
        let mut tokens: Vec<_> = state
            .tokens
            .values()
            .filter(|s| s.token.tenant_id == tenant_id)
            .map(|s| s.token.clone())
            .collect();
        tokens.sort_by_key(|t| t.issued_at);
        tokens
    }

    /// Drop tokens that have expired as of `now`. Returns how many.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write();
        let expired: Vec<(String, String)> = state
            .tokens
            .iter()
            .filter(|(_, s)| s.token.is_expired_at(now))
            .map(|(key, s)| (key.clone(), s.token.id.clone()))
            .collect();
        for (key, id) in &expired {
            state.tokens.remove(key);
            state.token_index.remove(id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Purged expired tokens");
        }
        expired.len()
    }

    pub fn stats(&self) -> AuthStats {
        let state = self.state.read();
        AuthStats {
            tenants: state.tenants.len(),
            identities: state.identities.len(),
            tokens: state.tokens.len(),
            revoked_tokens: state.tokens.values().filter(|s| s.token.revoked).count(),
        }
    }
}
