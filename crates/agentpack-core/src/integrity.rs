//! Content fingerprints for package sections.
//!
//! Fingerprints are `sha256-<64 lowercase hex>` over the UTF-8 bytes of the
//! exact text embedded in a package. Callers must hash the embedded text, never
//! a re-serialised or re-trimmed copy of it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const FINGERPRINT_PREFIX: &str = "sha256-";

/// Fingerprints of the manifest and code sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityRecord {
    pub manifest: String,
    pub code: String,
}

impl IntegrityRecord {
    /// Names of the sections whose fingerprints differ from `other`.
    pub fn mismatches(&self, other: &IntegrityRecord) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.manifest != other.manifest {
            out.push("manifest");
        }
        if self.code != other.code {
            out.push("code");
        }
        out
    }

    /// Whether both values have the `sha256-<64 lowercase hex>` shape.
    pub fn is_well_formed(&self) -> bool {
        is_fingerprint(&self.manifest) && is_fingerprint(&self.code)
    }
}

/// Lowercase hex SHA-256 of `text`.
pub fn hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn fingerprint(text: &str) -> String {
    format!("{}{}", FINGERPRINT_PREFIX, hash(text))
}

pub fn generate_hashes(manifest_text: &str, code_text: &str) -> IntegrityRecord {
    IntegrityRecord {
        manifest: fingerprint(manifest_text),
        code: fingerprint(code_text),
    }
}

/// Strict equality on both fingerprints.
pub fn verify(expected: &IntegrityRecord, actual: &IntegrityRecord) -> bool {
    expected.manifest == actual.manifest && expected.code == actual.code
}

fn is_fingerprint(value: &str) -> bool {
    value
        .strip_prefix(FINGERPRINT_PREFIX)
        .map(|h| h.len() == 64 && h.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')))
        .unwrap_or(false)
}
