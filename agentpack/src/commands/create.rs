//! `agentpack create`: manifest + code (+ memory, styles) → artifact file.

use super::read_text;
use agentpack_core::{observability, Manifest, Package, UiVariant};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub fn create_package(
    manifest_path: &Path,
    code_path: &Path,
    memory_path: Option<&Path>,
    styles_path: Option<&Path>,
    ui: UiVariant,
    output: Option<&Path>,
) -> Result<String> {
    let manifest = Manifest::from_json(&read_text(manifest_path)?)
        .with_context(|| format!("Invalid manifest {}", manifest_path.display()))?;
    let code = read_text(code_path)?;
    let memory: Option<Value> = match memory_path {
        Some(p) => Some(
            serde_json::from_str(&read_text(p)?)
                .with_context(|| format!("Invalid memory JSON {}", p.display()))?,
        ),
        None => None,
    };
    let styles = styles_path.map(read_text).transpose()?;

    let artifact = Package::create(&manifest, &code, memory.as_ref(), styles.as_deref(), ui)?;
    let record = Package::extract(&artifact)?.integrity;

    let output: PathBuf = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.html", manifest.id)));
    std::fs::write(&output, &artifact)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    observability::audit_package_created(&manifest.id, &record.manifest, &record.code, &ui.to_string());
    tracing::info!(agent_id = %manifest.id, path = %output.display(), %ui, "Package created");

    Ok(format!(
        "Created {} ({} {})\n  manifest: {}\n  code:     {}",
        output.display(),
        manifest.display_name(),
        manifest.version,
        record.manifest,
        record.code
    ))
}
