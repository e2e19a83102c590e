use thiserror::Error;

/// Errors raised by the MCP client and manager.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("MCP server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("MCP error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("no connected MCP server exposes '{0}'")]
    NotFound(String),

    #[error("invalid MCP response: {0}")]
    InvalidResponse(String),

    #[error("invalid MCP payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Network-level failure (connection, timeout, non-2xx status).
    pub fn is_transport(&self) -> bool {
        matches!(self, McpError::Transport(_) | McpError::Http { .. })
    }
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}
