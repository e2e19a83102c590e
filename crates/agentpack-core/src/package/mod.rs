//! Package codec: manifest + code (+ memory) ⇄ one self-describing HTML artifact.
//!
//! Sections are located by their `id` attribute, never by position:
//!
//! | id | content |
//! |---|---|
//! | `agent-manifest` | canonical manifest JSON text |
//! | `agent-code` | agent source text |
//! | `agent-memory` | one JSON value (optional) |
//! | `agent-integrity` | `{"manifest": "sha256-…", "code": "sha256-…"}` |
//!
//! Section bodies are entity-escaped (`&` → `&amp;`, `<` → `&lt;`) so any code
//! text, including a literal `</script>`, survives the round trip. Fingerprints
//! cover the unescaped text.
//!
//! Code is trimmed exactly once, by [`Package::create`]; extraction returns the
//! embedded text unchanged.

mod scaffold;

use crate::integrity::{self, IntegrityRecord};
use crate::manifest::{Manifest, ManifestError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MANIFEST_SECTION: &str = "agent-manifest";
pub const CODE_SECTION: &str = "agent-code";
pub const MEMORY_SECTION: &str = "agent-memory";
pub const INTEGRITY_SECTION: &str = "agent-integrity";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("invalid package format: {0}")]
    Format(String),

    #[error("integrity check failed for: {}", .sections.join(", "))]
    Integrity { sections: Vec<&'static str> },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("invalid JSON in package: {0}")]
    Json(#[from] serde_json::Error),
}

/// UI scaffold rendered around the data sections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiVariant {
    #[default]
    Full,
    Minimal,
    None,
}

impl fmt::Display for UiVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UiVariant::Full => "full",
            UiVariant::Minimal => "minimal",
            UiVariant::None => "none",
        })
    }
}

impl FromStr for UiVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(UiVariant::Full),
            "minimal" => Ok(UiVariant::Minimal),
            "none" => Ok(UiVariant::None),
            other => Err(format!("unknown UI variant '{}' (expected full, minimal or none)", other)),
        }
    }
}

/// A package recovered from an artifact.
#[derive(Debug, Clone)]
pub struct Package {
    pub manifest: Manifest,
    pub code: String,
    pub memory: Option<Value>,
    pub ui: UiVariant,
    /// Fingerprints as stored in the artifact.
    pub integrity: IntegrityRecord,
    /// Manifest text exactly as embedded; fingerprints are computed over this.
    manifest_text: String,
}

impl Package {
    /// Render an artifact. `code` is trimmed here and nowhere else.
    pub fn create(
        manifest: &Manifest,
        code: &str,
        memory: Option<&Value>,
        styles: Option<&str>,
        ui: UiVariant,
    ) -> Result<String, PackageError> {
        manifest.validate()?;
        let manifest_text = manifest.to_canonical_json()?;
        let code_text = code.trim();
        if code_text.is_empty() {
            return Err(PackageError::Format("agent code is empty".to_string()));
        }
        let record = integrity::generate_hashes(&manifest_text, code_text);

        let mut sections = String::new();
        sections.push_str(&render_section(MANIFEST_SECTION, "application/json", &manifest_text));
        sections.push_str(&render_section(CODE_SECTION, "text/plain", code_text));
        if let Some(value) = memory {
            let memory_text = serde_json::to_string(value)?;
            sections.push_str(&render_section(MEMORY_SECTION, "application/json", &memory_text));
        }
        let integrity_text = serde_json::to_string(&record)?;
        sections.push_str(&render_section(INTEGRITY_SECTION, "application/json", &integrity_text));

        Ok(scaffold::render_document(manifest, &record, ui, styles, &sections))
    }

    /// Recover a package from artifact text. Does not verify fingerprints.
    pub fn extract(artifact: &str) -> Result<Package, PackageError> {
        let manifest_text = find_section(artifact, MANIFEST_SECTION)?
            .ok_or_else(|| PackageError::Format("manifest section not found".to_string()))?;
        let code = find_section(artifact, CODE_SECTION)?
            .ok_or_else(|| PackageError::Format("code section not found".to_string()))?;

        let manifest: Manifest = serde_json::from_str(&manifest_text)?;
        manifest.validate()?;

        let memory = match find_section(artifact, MEMORY_SECTION)? {
            Some(text) => Some(serde_json::from_str::<Value>(&text)?),
            None => None,
        };

        let integrity = match find_section(artifact, INTEGRITY_SECTION)? {
            Some(text) => serde_json::from_str::<IntegrityRecord>(&text)?,
            None => integrity_from_meta(artifact)?.ok_or_else(|| {
                PackageError::Format("integrity metadata not found".to_string())
            })?,
        };

        let ui = find_meta(artifact, "agent-ui")?
            .and_then(|v| v.parse::<UiVariant>().ok())
            .unwrap_or(UiVariant::None);

        Ok(Package {
            manifest,
            code,
            memory,
            ui,
            integrity,
            manifest_text,
        })
    }

    /// Fingerprints recomputed over the recovered text.
    pub fn fingerprints(&self) -> IntegrityRecord {
        integrity::generate_hashes(&self.manifest_text, &self.code)
    }

    /// Compare recomputed fingerprints with the embedded record.
    pub fn verify(&self) -> Result<(), PackageError> {
        let actual = self.fingerprints();
        if integrity::verify(&self.integrity, &actual) {
            Ok(())
        } else {
            Err(PackageError::Integrity {
                sections: self.integrity.mismatches(&actual),
            })
        }
    }

    /// Extract and verify in one step.
    pub fn load(artifact: &str) -> Result<Package, PackageError> {
        let package = Self::extract(artifact)?;
        package.verify()?;
        Ok(package)
    }

    pub fn manifest_text(&self) -> &str {
        &self.manifest_text
    }
}

fn render_section(id: &str, mime: &str, body: &str) -> String {
    format!(
        "<script type=\"{}\" id=\"{}\">{}</script>\n",
        mime,
        id,
        escape_text(body)
    )
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;")
}

fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("&amp;") {
            out.push('&');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("&lt;") {
            out.push('<');
            rest = after;
        } else {
            out.push('&');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

fn find_section(artifact: &str, id: &str) -> Result<Option<String>, PackageError> {
    let pattern = format!(
        r#"(?is)<script\b[^>]*\bid\s*=\s*["']{}["'][^>]*>(.*?)</script\s*>"#,
        regex::escape(id)
    );
    let re = Regex::new(&pattern).map_err(|e| PackageError::Format(e.to_string()))?;
    Ok(re
        .captures(artifact)
        .and_then(|c| c.get(1))
        .map(|m| unescape_text(m.as_str())))
}

fn find_meta(artifact: &str, name: &str) -> Result<Option<String>, PackageError> {
    let tag_re = Regex::new(&format!(
        r#"(?is)<meta\b[^>]*\bname\s*=\s*["']{}["'][^>]*>"#,
        regex::escape(name)
    ))
    .map_err(|e| PackageError::Format(e.to_string()))?;
    let content_re = Regex::new(r#"(?is)\bcontent\s*=\s*["']([^"']*)["']"#)
        .map_err(|e| PackageError::Format(e.to_string()))?;
    Ok(tag_re
        .find(artifact)
        .and_then(|tag| content_re.captures(tag.as_str()))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string()))
}

fn integrity_from_meta(artifact: &str) -> Result<Option<IntegrityRecord>, PackageError> {
    let manifest = find_meta(artifact, "agent-integrity-manifest")?;
    let code = find_meta(artifact, "agent-integrity-code")?;
    Ok(match (manifest, code) {
        (Some(manifest), Some(code)) => Some(IntegrityRecord { manifest, code }),
        _ => None,
    })
}
