//! Core module containing shared infrastructure components.
//!
//! This module provides the foundational building blocks for the gateway,
//! including error handling, configuration, the request validation
//! pipeline, the gateway instance, the MCP server handler, and transport
//! layer abstractions.

pub mod config;
pub mod error;
pub mod gateway;
pub mod security;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::{Error, ErrorCode, Result};
pub use gateway::{Gateway, MaintenanceReport};
pub use security::{SecurityManager, SecurityStatus};
pub use server::GatewayServer;
pub use transport::{TransportConfig, TransportService};
