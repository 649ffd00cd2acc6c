//! Error types and handling for the gateway.
//!
//! This module defines a unified error type that can represent errors from
//! all domains and external dependencies. Every variant maps to one code of
//! the fixed protocol taxonomy through [`Error::code`], and to optional
//! structured envelope data through [`Error::data`].

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use super::security::SecurityError;
use super::transport::TransportError;
use crate::domains::adapters::RegistryError;
use crate::domains::auth::AuthError;
use crate::domains::plugins::PluginError;

/// A specialized Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed error code taxonomy of the protocol envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,

    AuthRequired = 1001,
    InvalidToken = 1002,
    TokenExpired = 1003,
    TokenRevoked = 1004,
    ScopeDenied = 1005,
    RateLimited = 1006,
    AdminRequired = 1007,
    Forbidden = 1008,

    PluginNotFound = 2001,
    PluginValidation = 2002,
    PluginLoadFailed = 2003,
    BackendNotFound = 2004,
    BackendUnavailable = 2005,
    BackendExecution = 2006,
    PluginInstallDisabled = 2007,

    WorkflowBackendInvalid = 3001,
    WorkflowExecutionFailed = 3002,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes in the 1000 range.
    pub fn is_auth(self) -> bool {
        (1000..2000).contains(&self.as_i32())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

/// Unified error type for the gateway.
#[derive(Debug, Error)]
pub enum Error {
    /// Error originating from the adapter registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Error originating from the auth domain.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Request rejected by the validation pipeline.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Error originating from the plugins domain.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request body is not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The envelope is not a valid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// The params do not fit the method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The admin credential is missing or wrong.
    #[error("Admin credential required")]
    AdminRequired,

    /// The target backend cannot run workflows.
    #[error("Backend '{backend_id}' cannot execute workflows: {reason}")]
    WorkflowBackendInvalid { backend_id: String, reason: String },

    /// The workflow backend failed.
    #[error("Workflow failed on '{backend_id}': {message}")]
    WorkflowExecution { backend_id: String, message: String },

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from file operations or network communication.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal errors that should not occur under normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Position in the fixed taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Registry(err) => match err {
                RegistryError::BackendNotFound(_) => ErrorCode::BackendNotFound,
                RegistryError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
                RegistryError::BackendExecution { .. } => ErrorCode::BackendExecution,
                RegistryError::ToolNotFound { .. } => ErrorCode::InvalidParams,
                RegistryError::AlreadyRegistered(_) | RegistryError::DuplicateTool { .. } => {
                    ErrorCode::PluginLoadFailed
                }
                RegistryError::InvalidTransition { .. } => ErrorCode::InternalError,
            },
            Self::Auth(err) => match err {
                AuthError::MissingToken => ErrorCode::AuthRequired,
                AuthError::InvalidToken => ErrorCode::InvalidToken,
                AuthError::TokenExpired => ErrorCode::TokenExpired,
                AuthError::TokenRevoked => ErrorCode::TokenRevoked,
                _ => ErrorCode::InvalidParams,
            },
            Self::Security(err) => match err {
                SecurityError::MethodNotAllowed(_) => ErrorCode::MethodNotFound,
                SecurityError::PermissionDenied { .. } => ErrorCode::Forbidden,
                SecurityError::ScopeDenied { .. } => ErrorCode::ScopeDenied,
                SecurityError::RateLimited { .. } => ErrorCode::RateLimited,
                SecurityError::PayloadTooLarge { .. } | SecurityError::PayloadTooDeep { .. } => {
                    ErrorCode::InvalidRequest
                }
                SecurityError::InvalidParams => ErrorCode::InvalidParams,
            },
            Self::Plugin(err) => match err {
                PluginError::NotFound(_) => ErrorCode::PluginNotFound,
                PluginError::Validation { .. } | PluginError::InvalidManifest { .. } => {
                    ErrorCode::PluginValidation
                }
                PluginError::LoadFailed { .. } | PluginError::Backend(_) => {
                    ErrorCode::PluginLoadFailed
                }
                PluginError::InstallDisabled => ErrorCode::PluginInstallDisabled,
                PluginError::Store(_) => ErrorCode::InternalError,
            },
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::AdminRequired => ErrorCode::AdminRequired,
            Self::WorkflowBackendInvalid { .. } => ErrorCode::WorkflowBackendInvalid,
            Self::WorkflowExecution { .. } => ErrorCode::WorkflowExecutionFailed,
            Self::Transport(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Structured detail for the envelope `error.data` field.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Registry(RegistryError::BackendExecution {
                backend_id,
                timed_out,
                ..
            }) => Some(json!({ "backendId": backend_id, "timedOut": timed_out })),
            Self::Registry(RegistryError::BackendUnavailable { backend_id, status }) => {
                Some(json!({ "backendId": backend_id, "status": status }))
            }
            Self::Registry(err) => Some(json!({ "backendId": err.backend_id() })),
            Self::Security(SecurityError::RateLimited {
                category,
                retry_after,
            }) => Some(json!({
                "category": category,
                "retryAfter": self.retry_after_secs(),
                "retryAfterMs": retry_after.as_millis() as u64,
            })),
            Self::Security(SecurityError::ScopeDenied { backend_id }) => {
                Some(json!({ "backendId": backend_id }))
            }
            Self::Security(SecurityError::PermissionDenied { permission }) => {
                Some(json!({ "permission": permission }))
            }
            Self::Plugin(PluginError::Validation { name, missing }) => Some(json!({
                "plugin": name,
                "missingCapabilities": missing,
            })),
            Self::Plugin(PluginError::Backend(err)) => Some(json!({ "backendId": err.backend_id() })),
            Self::WorkflowBackendInvalid { backend_id, .. }
            | Self::WorkflowExecution { backend_id, .. } => {
                Some(json!({ "backendId": backend_id }))
            }
            _ => None,
        }
    }

    /// Seconds until a rate-limited caller may retry.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Security(err) => err.retry_after_secs(),
            _ => None,
        }
    }

    /// Whether the error indicates a fault in the gateway rather than in
    /// the request.
    pub fn is_internal(&self) -> bool {
        self.code() == ErrorCode::InternalError
    }
}
