//! Adapters domain module.
//!
//! Backend adapters wrap third-party APIs and expose them as tools. This
//! module defines the adapter contract and the registry that owns every
//! adapter instance in a gateway.
//!
//! ## Architecture
//!
//! - `adapter.rs` - Adapter trait, factory trait, status state machine, tool types
//! - `registry.rs` - Copy-on-write registry, tool aggregation and dispatch
//! - `isolation.rs` - Panic and timeout containment for adapter code
//! - `events.rs` - Typed registry events
//! - `builtin.rs` - Adapters linked into the gateway binary
//! - `error.rs` - Adapter and registry error types

mod adapter;
pub mod builtin;
mod error;
mod events;
mod isolation;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdapterFactory, AdapterStatus, BackendAdapter, BackendConfig, Tool, ToolSpec};
pub use error::{AdapterError, AdapterResult, RegistryError};
pub use events::RegistryEvent;
pub use registry::{AdapterRegistry, BackendSummary, RegisteredBackend, ToolFilter};

pub(crate) use isolation::panic_message;
