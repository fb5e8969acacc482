//! Tool backends
//!
//! A backend is one remote tool server. The pipeline only needs three
//! things from it: list its tools, call one of them, and release the
//! connection. [`ToolBackend`] is that seam; [`McpBackend`] implements it
//! over an MCP HTTP connection, and tests substitute in-memory fakes.
//!
//! Connections are never shared across requests. A [`BackendConnector`]
//! opens them, and a [`BackendSession`] owns every connection of one
//! request and releases them together.

mod mcp;
mod session;

pub use mcp::{McpBackend, McpConnector};
pub use session::BackendSession;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::config::BackendConfig;
use crate::protocol::Tool;

/// An open connection to one tool server.
///
/// Implementations must be `Send + Sync` so sessions can be shared with
/// spawned cleanup tasks.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Display name (used in logs)
    fn name(&self) -> &str;

    /// Backend identity: the address it was opened for
    fn address(&self) -> &str;

    /// Fetch the backend's current tool catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or answers with
    /// something that is not a tool list.
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Invoke a tool by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails in transport or the tool reports
    /// a failure.
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Opens backend connections for one request
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Open a connection to `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails.
    async fn connect(&self, config: &BackendConfig) -> Result<std::sync::Arc<dyn ToolBackend>>;
}
