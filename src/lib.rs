//! Tool Gateway Library
//!
//! This crate provides a multi-tenant gateway that exposes the tools of
//! pluggable backend adapters through one authenticated, rate-limited
//! JSON-RPC surface.
//!
//! # Architecture
//!
//! The gateway is organized into the following modules:
//!
//! - **core**: Configuration, error taxonomy, security pipeline, the `Gateway`
//!   instance, the MCP server handler, and transports
//! - **domains**: Business logic organized by bounded contexts
//!   - **adapters**: Backend adapter contract and registry
//!   - **auth**: Tenants, identities, and bearer tokens
//!   - **plugins**: Runtime plugin lifecycle
//!   - **monitor**: Latency and error accounting
//!   - **dispatch**: JSON-RPC routing
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tool_gateway::core::{Config, Gateway, TransportService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let transport = TransportService::new(config.transport.clone());
//!     let gateway = Arc::new(Gateway::new(config));
//!     gateway.restore_plugins().await?;
//!     transport.run(gateway).await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, ErrorCode, Gateway, GatewayServer, Result};
