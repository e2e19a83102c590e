//! Agent manifest: identity, permission grants, capability and MCP declarations.
//!
//! Fields this crate does not model are kept in [`Manifest::extra`] so that a
//! manifest survives a package round trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while parsing or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest field '{field}' is invalid: {reason}")]
    Invalid { field: String, reason: String },
}

/// Declarative identity and grants for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default, skip_serializing_if = "McpSection::is_empty")]
    pub mcp: McpSection,
    /// Unmodelled top-level fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Permission grants as authored in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Allowed hostnames; `"*"` allows every host, an entry also covers its subdomains.
    #[serde(default)]
    pub network: Vec<String>,
    #[serde(default)]
    pub storage: bool,
    #[serde(default)]
    pub code: bool,
}

/// Capability hints for hosts that render or drive the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub memory: bool,
    #[serde(default)]
    pub code: bool,
    #[serde(default)]
    pub browser: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpSection {
    #[serde(default)]
    pub servers: Vec<McpServerEntry>,
}

impl McpSection {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// One remote MCP server the agent wants to reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerEntry {
    #[serde(default)]
    pub name: String,
    pub url: String,
    /// Bearer token sent as `Authorization`; opaque to agentpack.
    #[serde(default, alias = "apiKey", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl McpServerEntry {
    /// Registry name: the declared name, or the URL host when none was given.
    pub fn registry_name(&self) -> String {
        if !self.name.trim().is_empty() {
            return self.name.clone();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone())
    }

    /// Lowercased hostname of the server URL, if it parses.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

impl Manifest {
    /// Minimal manifest with only an id; everything else defaulted.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: String::new(),
            description: None,
            permissions: Permissions::default(),
            capabilities: Capabilities::default(),
            mcp: McpSection::default(),
            extra: Map::new(),
        }
    }

    /// Parse and validate manifest JSON text.
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Canonical text embedded in packages and fed to the integrity hash.
    pub fn to_canonical_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::Invalid {
                field: "id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        for (i, server) in self.mcp.servers.iter().enumerate() {
            if let Err(e) = url::Url::parse(&server.url) {
                return Err(ManifestError::Invalid {
                    field: format!("mcp.servers[{}].url", i),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Display label used in logs and UI scaffolds.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Hostnames of every declared MCP server, lowercased and deduplicated.
    pub fn mcp_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for host in self.mcp.servers.iter().filter_map(McpServerEntry::host) {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        hosts
    }
}
