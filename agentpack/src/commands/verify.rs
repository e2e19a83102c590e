//! `agentpack verify`: recompute fingerprints and compare with the embedded record.

use super::read_text;
use agentpack_core::{observability, Package};
use anyhow::{bail, Result};
use serde_json::json;
use std::path::Path;

pub fn verify_package(artifact_path: &Path, as_json: bool) -> Result<String> {
    let package = Package::extract(&read_text(artifact_path)?)?;
    let actual = package.fingerprints();
    let mismatches = package.integrity.mismatches(&actual);

    if !mismatches.is_empty() {
        observability::security_integrity_failed(&package.manifest.id, &mismatches);
    }
    if as_json {
        return Ok(serde_json::to_string_pretty(&json!({
            "agent_id": package.manifest.id,
            "valid": mismatches.is_empty(),
            "expected": package.integrity,
            "actual": actual,
            "mismatches": mismatches,
        }))?);
    }
    if !mismatches.is_empty() {
        bail!(
            "Integrity check failed for {}: {}",
            artifact_path.display(),
            mismatches.join(", ")
        );
    }
    Ok(format!(
        "OK {} ({})\n  manifest: {}\n  code:     {}",
        package.manifest.id,
        artifact_path.display(),
        actual.manifest,
        actual.code
    ))
}
