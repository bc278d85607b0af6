//! Protocol dispatcher: the engine's action set exposed over an
//! MCP-style JSON-RPC transport.

pub mod protocol;
pub mod session;
mod server;
mod tools;

pub use server::{router, McpState, SESSION_HEADER};
pub use session::{Principal, SessionTable};
pub use tools::{ToolCallError, ToolReply, Toolbox};

use async_trait::async_trait;

use crate::error::Result;

/// Bearer token verification, provided by the host's auth layer.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `None` for unknown, expired, or malformed tokens.
    async fn verify(&self, token: &str) -> Option<Principal>;
}

/// Bind and serve the dispatcher until the process is shut down.
pub async fn serve(state: std::sync::Arc<McpState>, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| crate::error::ConfigError::InvalidValue {
            key: "SWITCHBOARD_BIND_ADDR".to_string(),
            message: err.to_string(),
        })?;
    tracing::info!(%addr, "protocol dispatcher listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|err| crate::error::CollabError::Unavailable(err.to_string()))?;
    Ok(())
}
