//! Transport layer for the gateway.
//!
//! This module provides different transport implementations:
//! - **STDIO**: MCP session over stdin/stdout (default) - feature: `stdio`
//! - **HTTP**: JSON-RPC over POST plus health and admin routes - feature: `http`
//!
//! Each transport handles the connection lifecycle and hands requests to
//! the gateway's dispatcher.
//!
//! # Feature Flags
//!
//! Transport implementations are conditionally compiled based on features:
//! - `stdio` (default): STDIO transport - minimal dependencies
//! - `http`: HTTP transport - adds axum, tower-http

mod config;
mod error;
mod service;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "stdio")]
pub mod stdio;

pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use service::TransportService;

#[cfg(feature = "http")]
pub use config::HttpConfig;
