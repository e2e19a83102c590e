use anyhow::{bail, Result};
use std::path::Path;

pub fn publish_package(artifact_path: &Path, registry: Option<&str>) -> Result<String> {
    bail!(
        "publish is not implemented (artifact {}, registry {})",
        artifact_path.display(),
        registry.unwrap_or("<none>")
    )
}
