//! MCP-over-HTTP backend

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{BackendConnector, ToolBackend};
use crate::config::BackendConfig;
use crate::protocol::{Tool, ToolsCallParams, ToolsCallResult, ToolsListParams, ToolsListResult};
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};

/// Upper bound on `tools/list` pages, guards against cursor loops
const MAX_TOOL_PAGES: usize = 32;

/// One initialized MCP connection
pub struct McpBackend {
    /// Backend name
    name: String,
    /// Configured address
    address: String,
    /// Transport
    transport: Arc<dyn Transport>,
}

impl McpBackend {
    /// Wrap an already-initialized transport
    pub fn new(name: impl Into<String>, address: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            transport,
        }
    }

    /// Open and initialize a connection for `config`
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let transport = HttpTransport::new(
            &config.url,
            config.headers.clone(),
            config.timeout,
            config.uses_streamable_http(),
        )?;
        let init = transport.initialize().await?;

        info!(
            backend = %config.name,
            url = %config.url,
            transport = config.transport_type(),
            server = init.server_info.as_ref().map_or("unknown", |i| i.name.as_str()),
            version = %init.protocol_version,
            "Backend connected"
        );

        Ok(Self::new(config.name.clone(), config.url.clone(), transport))
    }
}

#[async_trait]
impl ToolBackend for McpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor
                .take()
                .map(|c| serde_json::to_value(ToolsListParams { cursor: Some(c) }))
                .transpose()?;

            let result = self.transport.request("tools/list", params).await?.into_result()?;
            let page: ToolsListResult = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(backend = %self.name, count = tools.len(), "Tools listed");
        Ok(tools)
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::to_value(ToolsCallParams {
            name: tool.to_string(),
            arguments,
        })?;

        let result = self
            .transport
            .request("tools/call", Some(params))
            .await?
            .into_result()?;
        let call_result: ToolsCallResult = serde_json::from_value(result)?;

        if call_result.is_error {
            let text = call_result.text();
            return Err(Error::Protocol(if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            }));
        }

        Ok(call_result.into_value())
    }

    async fn close(&self) -> Result<()> {
        if self.transport.is_connected() {
            debug!(backend = %self.name, "Closing backend");
        }
        self.transport.close().await
    }
}

/// Connector that opens real MCP connections
#[derive(Debug, Clone, Copy, Default)]
pub struct McpConnector;

#[async_trait]
impl BackendConnector for McpConnector {
    async fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn ToolBackend>> {
        Ok(Arc::new(McpBackend::connect(config).await?))
    }
}
