//! One streamable-HTTP connection to an MCP server.
//!
//! Lifecycle: `Disconnected → Connecting → Initialized → Discovering → Ready`.
//! `initialize`, `notifications/initialized` and discovery run strictly in
//! that order inside [`McpClient::connect`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use agentpack_core::config::McpConfig;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{
    parse_event_stream, CallToolResult, JsonRpcRequest, JsonRpcResponse, ListResourcesResult,
    ListToolsResult, McpResource, McpTool, ServerInfo, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER,
    SESSION_ID_HEADER,
};

/// Upper bound on `nextCursor` pages followed during discovery.
const MAX_DISCOVERY_PAGES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Initialized,
    Discovering,
    Ready,
}

pub struct McpClient {
    url: String,
    token: Option<String>,
    http: reqwest::Client,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    state: ConnectionState,
    server_info: Option<ServerInfo>,
    tools: Vec<McpTool>,
    resources: Vec<McpResource>,
}

impl McpClient {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, McpError> {
        Self::with_config(url, token, &McpConfig::default())
    }

    pub fn with_config(
        url: impl Into<String>,
        token: Option<String>,
        config: &McpConfig,
    ) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            token: token.filter(|t| !t.trim().is_empty()),
            http,
            next_id: AtomicU64::new(0),
            session_id: Mutex::new(None),
            state: ConnectionState::Disconnected,
            server_info: None,
            tools: Vec::new(),
            resources: Vec::new(),
        })
    }

    /// Handshake and discovery. Discovery failures leave empty tool/resource sets.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        self.reset();
        self.state = ConnectionState::Connecting;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "agentpack",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = match self.request("initialize", Some(params)).await {
            Ok(r) => r,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.server_info = result
            .get("serverInfo")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        self.state = ConnectionState::Initialized;

        self.notify("notifications/initialized", None).await;

        self.state = ConnectionState::Discovering;
        self.tools = match self.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(url = %self.url, error = %e, "MCP tools/list failed, continuing without tools");
                Vec::new()
            }
        };
        self.resources = match self.list_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                warn!(url = %self.url, error = %e, "MCP resources/list failed, continuing without resources");
                Vec::new()
            }
        };
        self.state = ConnectionState::Ready;

        info!(
            url = %self.url,
            server = %self.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or(""),
            tools = self.tools.len(),
            resources = self.resources.len(),
            "MCP server connected"
        );
        Ok(())
    }

    /// Send one JSON-RPC request and return its `result`.
    ///
    /// A JSON-RPC error object becomes [`McpError::Protocol`]; a non-2xx status
    /// becomes [`McpError::Http`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let body = JsonRpcRequest::new(id, method, params);
        debug!(url = %self.url, id, method, "MCP request");

        let resp = self.post(&body).send().await?;
        self.capture_session(resp.headers());

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let text = resp.text().await?;

        let message: JsonRpcResponse = if is_event_stream {
            parse_event_stream(&text, id).ok_or_else(|| {
                McpError::InvalidResponse(format!("no response for request {} in event stream", id))
            })?
        } else {
            serde_json::from_str(&text)?
        };

        if let Some(err) = message.error {
            return Err(McpError::Protocol {
                code: err.code,
                message: err.message,
            });
        }
        Ok(message.result.unwrap_or(Value::Null))
    }

    /// Fire-and-forget notification; failures are only logged.
    pub async fn notify(&self, method: &str, params: Option<Value>) {
        let body = JsonRpcRequest::notification(method, params);
        match self.post(&body).send().await {
            Ok(resp) => self.capture_session(resp.headers()),
            Err(e) => debug!(url = %self.url, method, error = %e, "MCP notification failed"),
        }
    }

    /// `tools/call`. Server-side JSON-RPC errors come back as `is_error` data.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        match self.request("tools/call", Some(params)).await {
            Ok(result) => Ok(serde_json::from_value(result)?),
            Err(McpError::Protocol { message, .. }) => Ok(CallToolResult::error(&message)),
            Err(e) => Err(e),
        }
    }

    /// `resources/read`. Unlike tool calls, a JSON-RPC error is raised.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.request("resources/read", Some(json!({ "uri": uri }))).await
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools: Vec<McpTool> = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_DISCOVERY_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            for tool in page.tools {
                upsert(&mut tools, tool, |t| t.name.as_str());
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    pub async fn list_resources(&self) -> Result<Vec<McpResource>, McpError> {
        let mut resources: Vec<McpResource> = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_DISCOVERY_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListResourcesResult =
                serde_json::from_value(self.request("resources/list", params).await?)?;
            for resource in page.resources {
                upsert(&mut resources, resource, |r| r.uri.as_str());
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(resources)
    }

    /// Drop session state. With a live session, also asks the server to end it
    /// (`DELETE` with the session id); local state is cleared either way.
    pub async fn disconnect(&mut self) -> Result<(), McpError> {
        let session = self.session_id();
        self.reset();
        let Some(session) = session else {
            return Ok(());
        };

        let mut req = self
            .http
            .delete(&self.url)
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(SESSION_ID_HEADER, &session);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        // 405: server does not support client-initiated termination.
        if status.is_success() || status.as_u16() == 405 {
            Ok(())
        } else {
            Err(McpError::Http {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|g| g.clone())
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Tools in discovery order, unique by name.
    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    /// Resources in discovery order, unique by uri.
    pub fn resources(&self) -> &[McpResource] {
        &self.resources
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn has_resource(&self, uri: &str) -> bool {
        self.resources.iter().any(|r| r.uri == uri)
    }

    fn post<T: serde::Serialize>(&self, body: &T) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(session) = self.session_id() {
            req = req.header(SESSION_ID_HEADER, session);
        }
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req.json(body)
    }

    fn capture_session(&self, headers: &HeaderMap) {
        let Some(value) = headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            return;
        };
        if let Ok(mut guard) = self.session_id.lock() {
            if guard.as_deref() != Some(value) {
                debug!(url = %self.url, session_id = %value, "MCP session id assigned");
                *guard = Some(value.to_string());
            }
        }
    }

    fn reset(&mut self) {
        if let Ok(mut guard) = self.session_id.lock() {
            *guard = None;
        }
        self.server_info = None;
        self.tools.clear();
        self.resources.clear();
        self.state = ConnectionState::Disconnected;
    }
}

/// Insert or replace by key; a replaced entry keeps its first position.
fn upsert<T>(list: &mut Vec<T>, item: T, key: impl Fn(&T) -> &str) {
    let pos = list.iter().position(|existing| key(existing) == key(&item));
    match pos {
        Some(i) => list[i] = item,
        None => list.push(item),
    }
}
