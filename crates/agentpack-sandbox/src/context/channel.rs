use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{ContextLauncher, ExecutionContext, LaunchSpec};
use crate::error::SandboxError;

/// Agent side of an in-memory context.
pub struct AgentEndpoint {
    pub spec: LaunchSpec,
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Value>,
}

impl AgentEndpoint {
    /// Next host message; `None` once the host has let go of the context.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    pub fn send(&self, message: Value) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Value> {
        self.outbound.clone()
    }
}

type AgentFn = dyn Fn(AgentEndpoint) + Send + Sync;

/// In-process context backed by tokio channels. The supplied function receives
/// the agent end of every launched context (typically spawning a task on it).
pub struct ChannelLauncher {
    agent: Box<AgentFn>,
    launches: AtomicUsize,
}

impl ChannelLauncher {
    pub fn new(agent: impl Fn(AgentEndpoint) + Send + Sync + 'static) -> Self {
        Self {
            agent: Box::new(agent),
            launches: AtomicUsize::new(0),
        }
    }

    /// Number of contexts started so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl ContextLauncher for ChannelLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<ExecutionContext, SandboxError> {
        let (host_tx, agent_rx) = mpsc::unbounded_channel();
        let (agent_tx, host_rx) = mpsc::unbounded_channel();
        self.launches.fetch_add(1, Ordering::SeqCst);
        (self.agent)(AgentEndpoint {
            spec: spec.clone(),
            inbound: agent_rx,
            outbound: agent_tx,
        });
        Ok(ExecutionContext::new(host_tx, host_rx, None))
    }
}
