//! Registry of named MCP connections.
//!
//! Owned by whoever drives the agent (one per sandbox session); there is no
//! process-wide instance. Dispatch walks servers in registration order, so when
//! two servers expose the same tool the first registered one wins.

use agentpack_core::config::McpConfig;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::McpClient;
use crate::error::McpError;
use crate::protocol::{CallToolResult, McpTool};

/// A tool together with the server that exposes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerTool {
    pub server: String,
    pub tool: McpTool,
}

pub struct McpManager {
    config: McpConfig,
    servers: Vec<(String, McpClient)>,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new(McpConfig::default())
    }
}

impl McpManager {
    pub fn new(config: McpConfig) -> Self {
        Self {
            config,
            servers: Vec::new(),
        }
    }

    /// Connect to `url` and register the client as `name`.
    pub async fn add_server(
        &mut self,
        name: &str,
        url: &str,
        token: Option<String>,
    ) -> Result<(), McpError> {
        let mut client = McpClient::with_config(url, token, &self.config)?;
        client.connect().await?;
        self.register(name, client).await;
        Ok(())
    }

    /// Register an already-connected client. An existing entry with the same
    /// name is disconnected and replaced in place.
    pub async fn register(&mut self, name: &str, client: McpClient) {
        if let Some(slot) = self.servers.iter_mut().find(|(n, _)| n == name) {
            let mut previous = std::mem::replace(&mut slot.1, client);
            info!(server = %name, "Replacing registered MCP server");
            if let Err(e) = previous.disconnect().await {
                warn!(server = %name, error = %e, "Failed to disconnect replaced MCP server");
            }
        } else {
            self.servers.push((name.to_string(), client));
        }
    }

    /// Every tool of every server, by registration order then discovery order.
    pub fn get_all_tools(&self) -> Vec<ServerTool> {
        self.servers
            .iter()
            .flat_map(|(name, client)| {
                client.tools().iter().map(move |tool| ServerTool {
                    server: name.clone(),
                    tool: tool.clone(),
                })
            })
            .collect()
    }

    /// Call `tool_name` on the first registered server that exposes it.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let (server, client) = self
            .servers
            .iter()
            .find(|(_, c)| c.has_tool(tool_name))
            .ok_or_else(|| McpError::NotFound(tool_name.to_string()))?;
        info!(server = %server, tool = %tool_name, "Dispatching MCP tool call");
        client.call_tool(tool_name, arguments).await
    }

    /// Read `uri` from the first registered server that lists it.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        let (_, client) = self
            .servers
            .iter()
            .find(|(_, c)| c.has_resource(uri))
            .ok_or_else(|| McpError::NotFound(uri.to_string()))?;
        client.read_resource(uri).await
    }

    /// Disconnect everything and clear the registry. Returns the failure count;
    /// one failing server never stops the others.
    pub async fn disconnect_all(&mut self) -> usize {
        let mut failures = 0;
        for (name, mut client) in self.servers.drain(..) {
            if let Err(e) = client.disconnect().await {
                failures += 1;
                warn!(server = %name, error = %e, "Failed to disconnect MCP server");
            }
        }
        failures
    }

    pub fn get(&self, name: &str) -> Option<&McpClient> {
        self.servers.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
