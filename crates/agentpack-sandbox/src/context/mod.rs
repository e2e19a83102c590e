//! Execution contexts: where agent code actually runs.
//!
//! A context is a pair of message channels plus a way to tear it down. The host
//! never shares memory with it; every interaction is a JSON message:
//!
//! - context → host: `{"ready":true}` once, `{"id":n,"result"|"error"}` replies,
//!   `{"call":n,"method":m,"params":p}` capability requests
//! - host → context: `{"method":"run","id":n,"input":v}` and
//!   `{"call":n,"result"|"error"}` capability replies

mod channel;
mod process;

pub use channel::{AgentEndpoint, ChannelLauncher};
pub use process::ProcessLauncher;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::SandboxError;

/// What a launcher needs to start one agent.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub agent_id: String,
    pub code: String,
    /// Canonical manifest text, handed to the agent read-only.
    pub manifest_json: String,
    /// Whether dynamic code generation (`eval`, `new Function`) is enabled.
    pub allow_code_generation: bool,
}

/// Host side of a running context.
pub struct ExecutionContext {
    pub(crate) outbound: mpsc::UnboundedSender<Value>,
    pub(crate) inbound: mpsc::UnboundedReceiver<Value>,
    pub(crate) terminate: Option<oneshot::Sender<()>>,
}

impl ExecutionContext {
    pub fn new(
        outbound: mpsc::UnboundedSender<Value>,
        inbound: mpsc::UnboundedReceiver<Value>,
        terminate: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            terminate,
        }
    }
}

/// Starts isolated execution contexts.
pub trait ContextLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<ExecutionContext, SandboxError>;
}
