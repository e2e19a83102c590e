use std::process::Stdio;

use agentpack_core::config::SandboxConfig;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{ContextLauncher, ExecutionContext, LaunchSpec};
use crate::error::SandboxError;

/// In-context shim: loads the agent, bridges `fetch` / `storage` / `mcp` to
/// capability requests, speaks JSON lines on stdio.
const BOOTSTRAP_JS: &str = include_str!("../../assets/bootstrap.js");

/// Child-process context: the configured runtime runs the bootstrap shim in a
/// private temp directory with a cleared environment.
pub struct ProcessLauncher {
    runtime: String,
}

impl ProcessLauncher {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.runtime.clone())
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

fn spawn_err(e: impl std::fmt::Display) -> SandboxError {
    SandboxError::Spawn(e.to_string())
}

impl ContextLauncher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<ExecutionContext, SandboxError> {
        let workdir = tempfile::Builder::new()
            .prefix("agentpack-")
            .tempdir()
            .map_err(spawn_err)?;
        std::fs::write(workdir.path().join("bootstrap.js"), BOOTSTRAP_JS).map_err(spawn_err)?;
        std::fs::write(workdir.path().join("agent.js"), &spec.code).map_err(spawn_err)?;
        std::fs::write(workdir.path().join("manifest.json"), &spec.manifest_json)
            .map_err(spawn_err)?;

        let mut cmd = Command::new(&self.runtime);
        cmd.arg("bootstrap.js")
            .current_dir(workdir.path())
            .env_clear()
            .env(
                "AGENTPACK_ALLOW_CODEGEN",
                if spec.allow_code_generation { "1" } else { "0" },
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Program lookup only; the agent never sees it.
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", self.runtime, e)))?;
        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SandboxError::Spawn("child stdio not captured".to_string()));
        };
        info!(agent_id = %spec.agent_id, runtime = %self.runtime, pid = ?child.id(), "Execution context started");

        let (host_tx, mut to_child) = mpsc::unbounded_channel::<Value>();
        let (from_child, host_rx) = mpsc::unbounded_channel::<Value>();
        let (terminate_tx, terminate_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            while let Some(message) = to_child.recv().await {
                let mut line = message.to_string();
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let agent_id = spec.agent_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(message) => {
                        if from_child.send(message).is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!(agent_id = %agent_id, output = %line, "Non-protocol stdout line"),
                }
            }
        });

        let agent_id = spec.agent_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(agent_id = %agent_id, "[agent] {}", line);
            }
        });

        let agent_id = spec.agent_id.clone();
        tokio::spawn(async move {
            // Keeps the working directory alive for the child's lifetime.
            let _workdir = workdir;
            let terminated = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => info!(agent_id = %agent_id, %status, "Execution context exited"),
                        Err(e) => warn!(agent_id = %agent_id, error = %e, "Failed waiting on execution context"),
                    }
                    false
                }
                _ = terminate_rx => true,
            };
            if terminated {
                let _ = child.kill().await;
                debug!(agent_id = %agent_id, "Execution context terminated");
            }
        });

        Ok(ExecutionContext::new(host_tx, host_rx, Some(terminate_tx)))
    }
}
