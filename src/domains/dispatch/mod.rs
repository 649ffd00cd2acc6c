//! Dispatch domain module.
//!
//! Maps inbound JSON-RPC requests onto the auth, security, registry, plugin
//! and monitor components, and wraps every outcome in the envelope.
//!
//! ## Architecture
//!
//! - `dispatcher.rs` - Request pipeline and method handlers
//! - `envelope.rs` - JSON-RPC 2.0 request/response types

mod dispatcher;
mod envelope;

pub use dispatcher::{Dispatcher, EXECUTE_WORKFLOW_TOOL, PROTOCOL_VERSION, WORKFLOW_BACKEND_TYPE};
pub use envelope::{JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
