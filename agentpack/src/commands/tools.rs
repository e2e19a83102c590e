//! `agentpack tools`: connect to the manifest's MCP servers and list their tools.

use super::read_text;
use agentpack_core::config::McpConfig;
use agentpack_core::Package;
use agentpack_mcp::McpManager;
use anyhow::Result;
use std::path::Path;

pub async fn list_tools(artifact_path: &Path) -> Result<String> {
    let package = Package::load(&read_text(artifact_path)?)?;
    let servers = &package.manifest.mcp.servers;
    if servers.is_empty() {
        return Ok("[]".to_string());
    }

    let mut manager = McpManager::new(McpConfig::from_env());
    for entry in servers {
        let name = entry.registry_name();
        if let Err(e) = manager.add_server(&name, &entry.url, entry.token.clone()).await {
            tracing::warn!(server = %name, url = %entry.url, error = %e, "MCP server unavailable");
            eprintln!("warning: {} ({}) unavailable: {}", name, entry.url, e);
        }
    }
    let tools = manager.get_all_tools();
    manager.disconnect_all().await;
    Ok(serde_json::to_string_pretty(&tools)?)
}
