//! Typed registry events.

use serde::Serialize;

use super::adapter::AdapterStatus;

/// Change notifications published by the registry on a broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    Registered {
        backend_id: String,
        tool_count: usize,
    },
    RegistrationFailed {
        backend_id: String,
        message: String,
    },
    StatusChanged {
        backend_id: String,
        from: AdapterStatus,
        to: AdapterStatus,
    },
    Unregistered {
        backend_id: String,
    },
}

impl RegistryEvent {
    pub fn backend_id(&self) -> &str {
        match self {
            Self::Registered { backend_id, .. }
            | Self::RegistrationFailed { backend_id, .. }
            | Self::StatusChanged { backend_id, .. }
            | Self::Unregistered { backend_id } => backend_id,
        }
    }
}
