//! 环境变量 key 常量与别名定义
//!
//! 主变量统一使用 `AGENTPACK_*` 前缀。

/// 可观测性与日志
pub mod observability {
    pub const AGENTPACK_QUIET: &str = "AGENTPACK_QUIET";
    pub const QUIET_ALIASES: &[&str] = &[];

    pub const AGENTPACK_LOG_LEVEL: &str = "AGENTPACK_LOG_LEVEL";
    pub const LOG_LEVEL_ALIASES: &[&str] = &[];

    pub const AGENTPACK_LOG_JSON: &str = "AGENTPACK_LOG_JSON";
    pub const LOG_JSON_ALIASES: &[&str] = &[];

    pub const AGENTPACK_AUDIT_LOG: &str = "AGENTPACK_AUDIT_LOG";

    pub const AGENTPACK_SECURITY_EVENTS_LOG: &str = "AGENTPACK_SECURITY_EVENTS_LOG";
}

/// MCP 客户端
pub mod mcp {
    /// Per-request timeout in seconds (default 30).
    pub const AGENTPACK_MCP_TIMEOUT_SECS: &str = "AGENTPACK_MCP_TIMEOUT_SECS";
    /// Whether hosts of declared MCP servers are implicitly fetchable (default on).
    pub const AGENTPACK_MCP_IMPLICIT_NETWORK: &str = "AGENTPACK_MCP_IMPLICIT_NETWORK";
}

/// 沙箱执行
pub mod sandbox {
    /// Interpreter that executes the bootstrap shim (default `node`).
    pub const AGENTPACK_RUNTIME: &str = "AGENTPACK_RUNTIME";
    pub const RUNTIME_ALIASES: &[&str] = &["AGENTPACK_NODE"];

    pub const AGENTPACK_READY_TIMEOUT_SECS: &str = "AGENTPACK_READY_TIMEOUT_SECS";
    pub const AGENTPACK_RUN_TIMEOUT_SECS: &str = "AGENTPACK_RUN_TIMEOUT_SECS";
    pub const AGENTPACK_FETCH_TIMEOUT_SECS: &str = "AGENTPACK_FETCH_TIMEOUT_SECS";
}
