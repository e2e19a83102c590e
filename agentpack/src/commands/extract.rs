//! `agentpack extract`: artifact → manifest.json, agent.js, memory.json.

use super::read_text;
use agentpack_core::Package;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

pub fn extract_package(artifact_path: &Path, out_dir: &Path) -> Result<String> {
    let package = Package::extract(&read_text(artifact_path)?)
        .with_context(|| format!("Failed to extract {}", artifact_path.display()))?;
    let verified = package.verify().is_ok();
    if !verified {
        tracing::warn!(path = %artifact_path.display(), "Extracted package does not match its fingerprints");
    }

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let mut written = vec!["manifest.json", "agent.js"];
    std::fs::write(out_dir.join("manifest.json"), package.manifest_text())?;
    std::fs::write(out_dir.join("agent.js"), &package.code)?;
    if let Some(memory) = &package.memory {
        std::fs::write(out_dir.join("memory.json"), serde_json::to_string_pretty(memory)?)?;
        written.push("memory.json");
    }

    Ok(serde_json::to_string_pretty(&json!({
        "agent_id": package.manifest.id,
        "out_dir": out_dir.display().to_string(),
        "files": written,
        "ui": package.ui,
        "verified": verified,
    }))?)
}
