//! Adapter and registry error types.

use thiserror::Error;

use super::adapter::AdapterStatus;

/// Result type returned by backend adapter implementations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Error reported by a backend adapter from inside one of its own operations.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AdapterError {
    message: String,
}

impl AdapterError {
    /// Create a new adapter error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The underlying message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors produced at the registry boundary.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// No backend is registered under the id.
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// The backend exists but is not in the CONNECTED state.
    #[error("Backend '{backend_id}' is unavailable (status: {status})")]
    BackendUnavailable {
        backend_id: String,
        status: AdapterStatus,
    },

    /// The adapter failed, panicked, or timed out.
    #[error("Backend '{backend_id}' failed: {message}")]
    BackendExecution {
        backend_id: String,
        message: String,
        timed_out: bool,
    },

    /// The backend does not declare the requested tool.
    #[error("Backend '{backend_id}' has no tool named '{tool}'")]
    ToolNotFound { backend_id: String, tool: String },

    /// A backend with the same id is already registered.
    #[error("Backend already registered: {0}")]
    AlreadyRegistered(String),

    /// The adapter declared the same tool name twice.
    #[error("Backend '{backend_id}' declares duplicate tool '{tool}'")]
    DuplicateTool { backend_id: String, tool: String },

    /// The requested status change skips a state.
    #[error("Backend '{backend_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        backend_id: String,
        from: AdapterStatus,
        to: AdapterStatus,
    },
}

impl RegistryError {
    /// Create a "backend not found" error.
    pub fn not_found(backend_id: impl Into<String>) -> Self {
        Self::BackendNotFound(backend_id.into())
    }

    /// Create a "backend execution" error.
    pub fn execution(backend_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendExecution {
            backend_id: backend_id.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create a "backend execution" error caused by a timeout.
    pub fn timeout(backend_id: impl Into<String>, after_ms: u128) -> Self {
        Self::BackendExecution {
            backend_id: backend_id.into(),
            message: format!("operation timed out after {}ms", after_ms),
            timed_out: true,
        }
    }

    /// The backend id this error concerns.
    pub fn backend_id(&self) -> &str {
        match self {
            Self::BackendNotFound(id) | Self::AlreadyRegistered(id) => id,
            Self::BackendUnavailable { backend_id, .. }
            | Self::BackendExecution { backend_id, .. }
            | Self::ToolNotFound { backend_id, .. }
            | Self::DuplicateTool { backend_id, .. }
            | Self::InvalidTransition { backend_id, .. } => backend_id,
        }
    }
}
