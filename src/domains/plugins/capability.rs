//! Capability surface verification.

use serde::{Deserialize, Serialize};

/// Adapter contract operations a plugin module declares it implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Initialize,
    GetTools,
    ExecuteTool,
    Cleanup,
    HealthCheck,
}

impl Capability {
    /// Everything a plugin must provide to be installable.
    pub const REQUIRED: [Capability; 5] = [
        Capability::Initialize,
        Capability::GetTools,
        Capability::ExecuteTool,
        Capability::Cleanup,
        Capability::HealthCheck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::GetTools => "get_tools",
            Self::ExecuteTool => "execute_tool",
            Self::Cleanup => "cleanup",
            Self::HealthCheck => "health_check",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityReport {
    pub valid: bool,
    /// In the order of [`Capability::REQUIRED`].
    pub missing_capabilities: Vec<Capability>,
}

/// Compare a declared surface against the required one.
pub fn verify_capabilities(declared: &[Capability]) -> CapabilityReport {
    let missing_capabilities: Vec<Capability> = Capability::REQUIRED
        .iter()
        .copied()
        .filter(|c| !declared.contains(c))
        .collect();
    CapabilityReport {
        valid: missing_capabilities.is_empty(),
        missing_capabilities,
    }
}
