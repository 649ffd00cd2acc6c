//! Domains module containing business logic organized by bounded contexts.
//!
//! Each subdomain owns one component of the gateway. Components talk to
//! each other through explicit method calls on shared handles; the
//! `core::Gateway` wires them together.
//!
//! - **adapters**: backend adapter contract and the adapter registry
//! - **auth**: tenants, identities, and bearer tokens
//! - **plugins**: runtime plugin lifecycle
//! - **monitor**: latency and error accounting
//! - **dispatch**: JSON-RPC request routing

pub mod adapters;
pub mod auth;
pub mod dispatch;
pub mod monitor;
pub mod plugins;
