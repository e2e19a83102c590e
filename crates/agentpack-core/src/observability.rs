//! Observability: tracing init, audit log, security events.
//!
//! Uses config::ObservabilityConfig for AGENTPACK_QUIET, LOG_LEVEL, AUDIT_LOG, etc.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);
static SECURITY_EVENTS_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call at process startup.
/// When AGENTPACK_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level: String = if cfg.quiet {
        "agentpack=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    // Logs go to stderr: stdout carries command output (extracted code, run results).
    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn cached_path(slot: &Mutex<Option<String>>, configured: Option<&String>) -> Option<String> {
    {
        let guard = slot.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = configured?.clone();
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = slot.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn get_audit_path() -> Option<String> {
    let cfg = crate::config::ObservabilityConfig::from_env();
    cached_path(&AUDIT_PATH, cfg.audit_log.as_ref())
}

fn get_security_events_path() -> Option<String> {
    let cfg = crate::config::ObservabilityConfig::from_env();
    cached_path(&SECURITY_EVENTS_PATH, cfg.security_events_log.as_ref())
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// Audit: package_created
pub fn audit_package_created(agent_id: &str, manifest_hash: &str, code_hash: &str, ui: &str) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "package_created",
            "agent_id": agent_id,
            "manifest_hash": manifest_hash,
            "code_hash": code_hash,
            "ui": ui,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: execution_started (right before the run message is sent)
pub fn audit_execution_started(agent_id: &str, call_id: u64) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "execution_started",
            "agent_id": agent_id,
            "call_id": call_id,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: execution_completed
pub fn audit_execution_completed(agent_id: &str, call_id: u64, success: bool, duration_ms: u64) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "execution_completed",
            "agent_id": agent_id,
            "call_id": call_id,
            "success": success,
            "duration_ms": duration_ms,
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: network blocked
pub fn security_blocked_network(agent_id: &str, blocked_target: &str, reason: &str) {
    tracing::warn!(
        agent_id = %agent_id,
        blocked_target = %blocked_target,
        reason = %reason,
        "Security: blocked network request"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": timestamp(),
            "type": "security_blocked",
            "category": "network",
            "agent_id": agent_id,
            "details": {
                "blocked_target": blocked_target,
                "reason": reason
            }
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: capability blocked (storage / code)
pub fn security_blocked_capability(agent_id: &str, capability: &str) {
    tracing::warn!(
        agent_id = %agent_id,
        capability = %capability,
        "Security: blocked capability request"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": timestamp(),
            "type": "security_blocked",
            "category": "capability",
            "agent_id": agent_id,
            "details": { "capability": capability }
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: integrity mismatch at load time
pub fn security_integrity_failed(agent_id: &str, sections: &[&str]) {
    tracing::error!(
        agent_id = %agent_id,
        sections = ?sections,
        "Security: package integrity check failed"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": timestamp(),
            "type": "integrity_failed",
            "category": "package",
            "agent_id": agent_id,
            "details": { "sections": sections }
        });
        append_jsonl(&path, &record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_jsonl_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let path_str = path.to_string_lossy().to_string();

        append_jsonl(&path_str, &json!({"event": "a"}));
        append_jsonl(&path_str, &json!({"event": "b"}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "b");
    }

    #[test]
    fn test_cached_path_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("events.jsonl");
        let slot = Mutex::new(None);
        let configured = target.to_string_lossy().to_string();

        let resolved = cached_path(&slot, Some(&configured)).unwrap();
        assert_eq!(resolved, configured);
        assert!(dir.path().join("nested").is_dir());
        // Second lookup comes from the cache even without configuration.
        assert_eq!(cached_path(&slot, None), Some(configured));
    }
}
