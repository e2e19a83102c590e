//! `agentpack run`: one `run(input)` against a child-process context.

use super::read_text;
use agentpack_sandbox::{ProcessLauncher, SandboxSession, SessionOptions};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub async fn run_package(
    artifact_path: &Path,
    input_json: &str,
    runtime: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<String> {
    let input: Value = serde_json::from_str(input_json).context("Input is not valid JSON")?;
    let artifact = read_text(artifact_path)?;

    let mut options = SessionOptions::from_env();
    if let Some(runtime) = runtime {
        options.sandbox.runtime = runtime;
    }
    if let Some(secs) = timeout_secs.filter(|s| *s > 0) {
        options.sandbox.run_timeout = Duration::from_secs(secs);
    }
    let launcher = ProcessLauncher::from_config(&options.sandbox);

    let session = SandboxSession::load_with(&artifact, &launcher, options)
        .await
        .with_context(|| format!("Failed to load {}", artifact_path.display()))?;
    let result = session.run(input).await;
    session.close().await;

    let output = result.context("Agent run failed")?;
    Ok(serde_json::to_string_pretty(&output)?)
}
