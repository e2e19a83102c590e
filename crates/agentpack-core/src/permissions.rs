//! Permission evaluation for agent actions.
//!
//! A [`PermissionGrant`] is derived once from a manifest and consulted for every
//! outbound fetch and every storage / code request the agent makes.

use crate::manifest::Manifest;
use std::fmt;
use thiserror::Error;

/// Action an agent asks the host to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Fetch,
    Storage,
    Code,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Fetch => "fetch",
            Action::Storage => "storage",
            Action::Code => "code",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission denied: {action} {target}")]
    Denied { action: Action, target: String },
}

/// Read-only grant scoped to one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionGrant {
    network: Vec<String>,
    storage: bool,
    code: bool,
    /// Hosts of manifest-declared MCP servers, implicitly fetchable.
    mcp_hosts: Vec<String>,
}

impl PermissionGrant {
    /// Grant from a manifest; MCP server hosts widen the network allow-list.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self::from_manifest_with(manifest, true)
    }

    /// Same as [`from_manifest`](Self::from_manifest) with MCP widening switchable.
    pub fn from_manifest_with(manifest: &Manifest, implicit_mcp_hosts: bool) -> Self {
        Self {
            network: manifest
                .permissions
                .network
                .iter()
                .map(|n| n.trim().to_ascii_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
            storage: manifest.permissions.storage,
            code: manifest.permissions.code,
            mcp_hosts: if implicit_mcp_hosts {
                manifest.mcp_hosts()
            } else {
                Vec::new()
            },
        }
    }

    /// Whether `action` (on `target`, for fetch) is granted.
    pub fn check(&self, action: Action, target: Option<&str>) -> bool {
        match action {
            Action::Storage => self.storage,
            Action::Code => self.code,
            Action::Fetch => match target.and_then(target_host) {
                Some(host) => self.is_host_allowed(&host),
                None => false,
            },
        }
    }

    /// [`check`](Self::check) as a `Result`, for callers that propagate denial.
    pub fn require(&self, action: Action, target: Option<&str>) -> Result<(), PermissionError> {
        if self.check(action, target) {
            Ok(())
        } else {
            Err(PermissionError::Denied {
                action,
                target: target.unwrap_or_default().to_string(),
            })
        }
    }

    pub fn network(&self) -> &[String] {
        &self.network
    }

    pub fn allows_storage(&self) -> bool {
        self.storage
    }

    pub fn allows_code(&self) -> bool {
        self.code
    }

    fn is_host_allowed(&self, host: &str) -> bool {
        if self.network.iter().any(|entry| entry == "*") {
            return true;
        }
        if self
            .network
            .iter()
            .any(|entry| host == entry || host.ends_with(&format!(".{}", entry)))
        {
            return true;
        }
        self.mcp_hosts.iter().any(|h| h == host)
    }
}

/// `check` with an optional grant: no grant denies everything.
pub fn check(grant: Option<&PermissionGrant>, action: Action, target: Option<&str>) -> bool {
    grant.map(|g| g.check(action, target)).unwrap_or(false)
}

fn target_host(target: &str) -> Option<String> {
    url::Url::parse(target)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}
