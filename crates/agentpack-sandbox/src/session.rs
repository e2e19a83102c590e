//! Host side of one running agent.
//!
//! `load` verifies the artifact before anything is launched; a package that
//! fails its fingerprints never gets an execution context. After launch a
//! single reader task owns the context's inbound channel and routes:
//!
//! - `{"ready":true}` → readiness (first one only)
//! - `{"id":n,...}` → the pending `run` with that id
//! - `{"call":n,...}` → a capability request, served on its own task
//!
//! `run` waits for readiness instead of racing it, so early calls are queued
//! rather than lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use agentpack_core::config::{McpConfig, SandboxConfig};
use agentpack_core::manifest::{Manifest, McpServerEntry};
use agentpack_core::observability;
use agentpack_core::package::Package;
use agentpack_core::permissions::{Action, PermissionGrant};
use agentpack_mcp::{McpManager, ServerTool};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot, watch, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{ContextLauncher, LaunchSpec};
use crate::error::SandboxError;
use crate::gateway::{FetchRequest, NetworkGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Verifying,
    Initializing,
    Ready,
    /// Number of `run` calls in flight.
    Running(usize),
    Error,
    Closed,
}

/// Lazily started MCP manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpState {
    /// Manifest declares no MCP servers.
    Disabled,
    /// Servers declared, manager not started yet.
    Pending,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Waiting,
    Ready,
    Gone,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub sandbox: SandboxConfig,
    pub mcp: McpConfig,
}

impl SessionOptions {
    pub fn from_env() -> Self {
        Self {
            sandbox: SandboxConfig::from_env(),
            mcp: McpConfig::from_env(),
        }
    }
}

type RunReply = Result<Value, SandboxError>;

struct McpRuntime {
    servers: Vec<McpServerEntry>,
    config: McpConfig,
    manager: OnceCell<Arc<RwLock<McpManager>>>,
}

impl McpRuntime {
    fn state(&self) -> McpState {
        if self.servers.is_empty() {
            McpState::Disabled
        } else if self.manager.initialized() {
            McpState::Ready
        } else {
            McpState::Pending
        }
    }

    /// Start the manager on first use; each server that fails to connect is
    /// logged and left out.
    async fn manager(&self, agent_id: &str) -> Option<Arc<RwLock<McpManager>>> {
        if self.servers.is_empty() {
            return None;
        }
        let manager = self
            .manager
            .get_or_init(|| async {
                let mut manager = McpManager::new(self.config.clone());
                for entry in &self.servers {
                    let name = entry.registry_name();
                    if let Err(e) = manager.add_server(&name, &entry.url, entry.token.clone()).await {
                        warn!(agent_id = %agent_id, server = %name, error = %e, "MCP server unavailable, skipping");
                    }
                }
                info!(
                    agent_id = %agent_id,
                    connected = manager.len(),
                    declared = self.servers.len(),
                    "MCP manager initialized"
                );
                Arc::new(RwLock::new(manager))
            })
            .await;
        Some(Arc::clone(manager))
    }
}

struct Inner {
    agent_id: String,
    package: Package,
    options: SessionOptions,
    state: Mutex<SessionState>,
    readiness: watch::Sender<Readiness>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    terminate: Mutex<Option<oneshot::Sender<()>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<RunReply>>>,
    next_id: AtomicU64,
    gateway: NetworkGateway,
    storage: Mutex<Map<String, Value>>,
    mcp: McpRuntime,
}

pub struct SandboxSession {
    inner: Arc<Inner>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SandboxSession {
    /// Extract, verify and launch with configuration from the environment.
    pub async fn load(
        artifact: &str,
        launcher: &dyn ContextLauncher,
    ) -> Result<Self, SandboxError> {
        Self::load_with(artifact, launcher, SessionOptions::from_env()).await
    }

    pub async fn load_with(
        artifact: &str,
        launcher: &dyn ContextLauncher,
        options: SessionOptions,
    ) -> Result<Self, SandboxError> {
        debug!(state = ?SessionState::Loading, "Loading package");
        let package = Package::extract(artifact)?;
        let agent_id = package.manifest.id.clone();

        debug!(agent_id = %agent_id, state = ?SessionState::Verifying, "Verifying package");
        if let Err(e) = package.verify() {
            let err = SandboxError::from_package(e);
            if let SandboxError::Integrity { sections } = &err {
                observability::security_integrity_failed(&agent_id, sections);
            }
            return Err(err);
        }

        debug!(agent_id = %agent_id, state = ?SessionState::Initializing, "Starting execution context");
        let grant = PermissionGrant::from_manifest_with(&package.manifest, options.mcp.implicit_network);
        let gateway = NetworkGateway::new(&agent_id, grant, options.sandbox.fetch_timeout)?;
        let spec = LaunchSpec {
            agent_id: agent_id.clone(),
            code: package.code.clone(),
            manifest_json: package.manifest_text().to_string(),
            allow_code_generation: gateway.grant().allows_code(),
        };
        let context = launcher.launch(&spec)?;

        let storage = seed_storage(package.memory.as_ref());
        let mcp = McpRuntime {
            servers: package.manifest.mcp.servers.clone(),
            config: options.mcp.clone(),
            manager: OnceCell::new(),
        };
        let (readiness, _) = watch::channel(Readiness::Waiting);
        let inner = Arc::new(Inner {
            agent_id,
            package,
            options,
            state: Mutex::new(SessionState::Initializing),
            readiness,
            outbound: Mutex::new(Some(context.outbound)),
            terminate: Mutex::new(context.terminate),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            gateway,
            storage: Mutex::new(storage),
            mcp,
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&inner), context.inbound));
        Ok(Self {
            inner,
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner.package.manifest
    }

    pub fn package(&self) -> &Package {
        &self.inner.package
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.readiness.borrow() == Readiness::Ready
    }

    pub fn mcp_state(&self) -> McpState {
        self.inner.mcp.state()
    }

    /// Current agent storage (seeded from package memory).
    pub fn storage(&self) -> Map<String, Value> {
        self.inner
            .storage
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Wait for the context's `{"ready":true}`, bounded by the ready timeout.
    pub async fn wait_ready(&self) -> Result<(), SandboxError> {
        let mut rx = self.inner.readiness.subscribe();
        let timeout = self.inner.options.sandbox.ready_timeout;
        let observed = tokio::time::timeout(timeout, rx.wait_for(|r| *r != Readiness::Waiting))
            .await
            .map_err(|_| SandboxError::NotReady(timeout))?
            .map(|r| *r)
            .map_err(|_| SandboxError::Closed)?;
        match observed {
            Readiness::Ready => Ok(()),
            _ => Err(self.inner.gone_error()),
        }
    }

    /// Send `input` to the agent's `run` and wait for its reply.
    pub async fn run(&self, input: Value) -> Result<Value, SandboxError> {
        self.wait_ready().await?;
        // First run starts MCP; later runs find it initialized.
        let _ = self.inner.mcp.manager(&self.inner.agent_id).await;

        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        inner
            .pending
            .lock()
            .map_err(|_| SandboxError::LockPoisoned("pending runs"))?
            .insert(id, tx);
        inner.begin_run();
        observability::audit_execution_started(&inner.agent_id, id);
        let started = Instant::now();

        let outcome = if inner.send(json!({"method": "run", "id": id, "input": input})) {
            let timeout = inner.options.sandbox.run_timeout;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Err(inner.gone_error()),
                Err(_) => {
                    inner.take_pending(id);
                    Err(SandboxError::Timeout { id, timeout })
                }
            }
        } else {
            inner.take_pending(id);
            Err(inner.gone_error())
        };

        inner.end_run();
        observability::audit_execution_completed(
            &inner.agent_id,
            id,
            outcome.is_ok(),
            started.elapsed().as_millis() as u64,
        );
        outcome
    }

    /// Tools of every connected MCP server (starts the manager if needed).
    pub async fn mcp_tools(&self) -> Vec<ServerTool> {
        match self.inner.mcp.manager(&self.inner.agent_id).await {
            Some(manager) => manager.read().await.get_all_tools(),
            None => Vec::new(),
        }
    }

    /// Disconnect MCP servers, stop the context and fail in-flight runs.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.state() == SessionState::Closed {
            return;
        }
        inner.set_state(SessionState::Closed);
        inner.readiness.send_replace(Readiness::Gone);
        inner.fail_pending(|| SandboxError::Closed);

        if let Some(manager) = inner.mcp.manager.get() {
            let failures = manager.write().await.disconnect_all().await;
            if failures > 0 {
                warn!(agent_id = %inner.agent_id, failures, "Some MCP servers failed to disconnect");
            }
        }

        if let Ok(mut outbound) = inner.outbound.lock() {
            outbound.take();
        }
        if let Some(terminate) = inner.terminate.lock().ok().and_then(|mut t| t.take()) {
            let _ = terminate.send(());
        }
        if let Some(reader) = self.reader.lock().ok().and_then(|mut r| r.take()) {
            reader.abort();
        }
        info!(agent_id = %inner.agent_id, "Sandbox session closed");
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().ok().and_then(|mut r| r.take()) {
            reader.abort();
        }
        if let Some(terminate) = self.inner.terminate.lock().ok().and_then(|mut t| t.take()) {
            let _ = terminate.send(());
        }
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        self.state.lock().map(|s| *s).unwrap_or(SessionState::Error)
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                debug!(agent_id = %self.agent_id, from = ?*state, to = ?next, "Session state");
                *state = next;
            }
        }
    }

    fn begin_run(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = match *state {
                SessionState::Ready => SessionState::Running(1),
                SessionState::Running(n) => SessionState::Running(n + 1),
                other => other,
            };
        }
    }

    fn end_run(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = match *state {
                SessionState::Running(1) => SessionState::Ready,
                SessionState::Running(n) => SessionState::Running(n - 1),
                other => other,
            };
        }
    }

    fn gone_error(&self) -> SandboxError {
        match self.state() {
            SessionState::Closed => SandboxError::Closed,
            _ => SandboxError::Exited,
        }
    }

    fn send(&self, message: Value) -> bool {
        self.outbound
            .lock()
            .ok()
            .and_then(|o| o.as_ref().map(|tx| tx.send(message).is_ok()))
            .unwrap_or(false)
    }

    fn take_pending(&self, id: u64) -> Option<oneshot::Sender<RunReply>> {
        self.pending.lock().ok().and_then(|mut p| p.remove(&id))
    }

    fn fail_pending(&self, err: impl Fn() -> SandboxError) {
        let drained: Vec<_> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => return,
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(err()));
        }
    }

    fn mark_ready(&self) {
        let first = self.readiness.send_if_modified(|r| {
            if *r == Readiness::Waiting {
                *r = Readiness::Ready;
                true
            } else {
                false
            }
        });
        if first {
            self.set_state(SessionState::Ready);
            info!(agent_id = %self.agent_id, "Execution context ready");
        } else {
            warn!(agent_id = %self.agent_id, "Ignoring repeated ready signal");
        }
    }

    fn resolve(&self, id: u64, message: &Value) {
        let Some(tx) = self.take_pending(id) else {
            warn!(agent_id = %self.agent_id, id, "Reply for unknown run id");
            return;
        };
        let reply = match message.get("error") {
            Some(err) => Err(SandboxError::Remote(error_text(err))),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = tx.send(reply);
    }

    async fn serve_capability(&self, method: &str, params: Value) -> Result<Value, SandboxError> {
        match method {
            "fetch" => {
                let request: FetchRequest = parse_params(params)?;
                let response = self.gateway.fetch(request).await?;
                Ok(serde_json::to_value(response).map_err(|e| SandboxError::Capability(e.to_string()))?)
            }
            "storage/get" | "storage/set" | "storage/delete" => self.serve_storage(method, params),
            "mcp/listTools" => match self.mcp.manager(&self.agent_id).await {
                Some(manager) => {
                    let tools = manager.read().await.get_all_tools();
                    serde_json::to_value(tools).map_err(|e| SandboxError::Capability(e.to_string()))
                }
                None => Ok(json!([])),
            },
            "mcp/callTool" => {
                let call: ToolCallParams = parse_params(params)?;
                let manager = self
                    .mcp
                    .manager(&self.agent_id)
                    .await
                    .ok_or_else(|| agentpack_mcp::McpError::NotFound(call.name.clone()))?;
                let result = manager.read().await.call_tool(&call.name, call.arguments).await?;
                serde_json::to_value(result).map_err(|e| SandboxError::Capability(e.to_string()))
            }
            "mcp/readResource" => {
                let read: ResourceParams = parse_params(params)?;
                let manager = self
                    .mcp
                    .manager(&self.agent_id)
                    .await
                    .ok_or_else(|| agentpack_mcp::McpError::NotFound(read.uri.clone()))?;
                let contents = manager.read().await.read_resource(&read.uri).await?;
                Ok(contents)
            }
            other => Err(SandboxError::UnknownCapability(other.to_string())),
        }
    }

    fn serve_storage(&self, method: &str, params: Value) -> Result<Value, SandboxError> {
        if let Err(e) = self.gateway.grant().require(Action::Storage, None) {
            observability::security_blocked_capability(&self.agent_id, Action::Storage.as_str());
            return Err(e.into());
        }
        let params: StorageParams = parse_params(params)?;
        let mut storage = self
            .storage
            .lock()
            .map_err(|_| SandboxError::Capability("storage unavailable".to_string()))?;
        Ok(match method {
            "storage/get" => storage.get(&params.key).cloned().unwrap_or(Value::Null),
            "storage/set" => {
                storage.insert(params.key, params.value.unwrap_or(Value::Null));
                Value::Bool(true)
            }
            _ => Value::Bool(storage.remove(&params.key).is_some()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StorageParams {
    key: String,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default = "empty_object")]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ResourceParams {
    uri: String,
}

fn empty_object() -> Value {
    json!({})
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, SandboxError> {
    serde_json::from_value(params).map_err(|e| SandboxError::Capability(e.to_string()))
}

fn error_text(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Object(o) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    }
}

/// Object memory seeds one storage entry per key; any other value is kept
/// under `"memory"`.
fn seed_storage(memory: Option<&Value>) -> Map<String, Value> {
    match memory {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("memory".to_string(), other.clone());
            map
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut inbound: mpsc::UnboundedReceiver<Value>) {
    while let Some(message) = inbound.recv().await {
        if message.get("ready").and_then(Value::as_bool) == Some(true) {
            inner.mark_ready();
        } else if let Some(call) = message.get("call").and_then(Value::as_u64) {
            let method = message
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let reply = match inner.serve_capability(&method, params).await {
                    Ok(result) => json!({"call": call, "result": result}),
                    Err(e) => {
                        debug!(agent_id = %inner.agent_id, call, method = %method, error = %e, "Capability request failed");
                        json!({"call": call, "error": e.to_string()})
                    }
                };
                inner.send(reply);
            });
        } else if let Some(id) = message.get("id").and_then(Value::as_u64) {
            inner.resolve(id, &message);
        } else {
            warn!(agent_id = %inner.agent_id, "Unrecognized message from execution context");
        }
    }

    if inner.state() != SessionState::Closed {
        warn!(agent_id = %inner.agent_id, "Execution context ended unexpectedly");
        inner.set_state(SessionState::Error);
        inner.readiness.send_replace(Readiness::Gone);
        inner.fail_pending(|| SandboxError::Exited);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AgentEndpoint, ChannelLauncher};

    #[test]
    fn test_seed_storage() {
        assert!(seed_storage(None).is_empty());
        let seeded = seed_storage(Some(&json!({"count": 2, "name": "x"})));
        assert_eq!(seeded.get("count"), Some(&json!(2)));
        let wrapped = seed_storage(Some(&json!([1, 2])));
        assert_eq!(wrapped.get("memory"), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn test_poisoned_pending_map_is_reported() {
        let launcher = ChannelLauncher::new(|mut ep: AgentEndpoint| {
            tokio::spawn(async move {
                ep.send(json!({"ready": true}));
                while let Some(msg) = ep.recv().await {
                    ep.send(json!({"id": msg["id"], "result": null}));
                }
            });
        });
        let artifact = Package::create(
            &Manifest::new("poison"),
            "class Agent { run() {} }",
            None,
            None,
            agentpack_core::UiVariant::None,
        )
        .unwrap();
        let session = SandboxSession::load_with(&artifact, &launcher, SessionOptions::default())
            .await
            .unwrap();
        session.wait_ready().await.unwrap();

        let inner = Arc::clone(&session.inner);
        std::thread::spawn(move || {
            let _guard = inner.pending.lock().unwrap();
            panic!("poison the pending map");
        })
        .join()
        .unwrap_err();

        let err = session.run(json!(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::LockPoisoned("pending runs")));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_error_text_shapes() {
        assert_eq!(error_text(&json!("bad")), "bad");
        assert_eq!(error_text(&json!({"message": "worse"})), "worse");
        assert_eq!(error_text(&json!(42)), "42");
    }
}
