//! MCP (Model Context Protocol) client side.
//!
//! JSON-RPC 2.0 over streamable HTTP: every message is a POST to one endpoint.
//!
//! Protocol flow per connection:
//!   1. `initialize` → server info (+ `Mcp-Session-Id` response header)
//!   2. `notifications/initialized`
//!   3. `tools/list`, `resources/list`
//!   4. `tools/call` / `resources/read` on demand
//!
//! [`McpManager`] fans calls out across several named connections.

mod client;
mod error;
mod manager;
pub mod protocol;

pub use client::{ConnectionState, McpClient};
pub use error::McpError;
pub use manager::{McpManager, ServerTool};
pub use protocol::{CallToolResult, McpResource, McpTool, ServerInfo, ToolContent};
