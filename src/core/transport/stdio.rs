//! STDIO transport implementation.
//!
//! Serves the gateway as an MCP server over stdin/stdout. The session is
//! authenticated with a token issued at startup.

use std::sync::Arc;

use rmcp::ServiceExt;
use tracing::info;

use super::{TransportError, TransportResult};
use crate::core::{Gateway, GatewayServer};

/// STDIO transport handler.
pub struct StdioTransport;

impl StdioTransport {
    /// Run the STDIO transport.
    pub async fn run(gateway: Arc<Gateway>) -> TransportResult<()> {
        let session = gateway
            .issue_session_token()
            .map_err(|e| TransportError::init(e.to_string()))?;
        info!(token_id = %session.token.id, "Issued stdio session token");

        let server = GatewayServer::new(gateway, session.bearer);

        info!("Ready - communicating via stdin/stdout");

        let service = server
            .serve(rmcp::transport::stdio())
            .await
            .map_err(|e| TransportError::init(e.to_string()))?;

        service
            .waiting()
            .await
            .map_err(|e| TransportError::ServiceError(e.to_string()))?;

        info!("STDIO transport finished");
        Ok(())
    }
}
