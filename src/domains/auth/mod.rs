//! Auth domain module.
//!
//! Multi-tenant bearer-token authorization: tenants own identities, and
//! identities hold gateway tokens scoped to backend ids and permissions.

mod error;
mod service;
mod token;

pub use error::AuthError;
pub use service::{AuthService, AuthStats};
pub use token::{
    GatewayToken, Identity, IssuedToken, PLUGINS_MANAGE_PERMISSION, Tenant, WILDCARD_PERMISSION,
};
