use std::time::Duration;

use agentpack_core::package::PackageError;
use agentpack_core::permissions::PermissionError;
use agentpack_mcp::McpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("integrity check failed for: {}", .sections.join(", "))]
    Integrity { sections: Vec<&'static str> },

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("failed to start execution context: {0}")]
    Spawn(String),

    #[error("execution context not ready after {0:?}")]
    NotReady(Duration),

    #[error("execution context exited")]
    Exited,

    #[error("sandbox session closed")]
    Closed,

    #[error("run {id} timed out after {timeout:?}")]
    Timeout { id: u64, timeout: Duration },

    #[error("agent error: {0}")]
    Remote(String),

    #[error("invalid capability request: {0}")]
    Capability(String),

    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl SandboxError {
    /// Lift a package error, keeping integrity failures distinct.
    pub(crate) fn from_package(e: PackageError) -> Self {
        match e {
            PackageError::Integrity { sections } => SandboxError::Integrity { sections },
            other => SandboxError::Package(other),
        }
    }
}
