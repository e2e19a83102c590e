//! 按领域分组的配置结构体
//!
//! 从环境变量加载，统一 fallback 逻辑。

use super::env_keys::{mcp as mcp_keys, observability as obv_keys, sandbox as sbx_keys};
use super::loader::{env_bool, env_optional, env_or, env_u64};
use std::time::Duration;

/// 可观测性配置：quiet、log_level、log_json、audit_log、security_events_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
    pub security_events_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::AGENTPACK_QUIET, obv_keys::QUIET_ALIASES, false),
                log_level: env_or(
                    obv_keys::AGENTPACK_LOG_LEVEL,
                    obv_keys::LOG_LEVEL_ALIASES,
                    || "agentpack=info".to_string(),
                ),
                log_json: env_bool(obv_keys::AGENTPACK_LOG_JSON, obv_keys::LOG_JSON_ALIASES, false),
                audit_log: env_optional(obv_keys::AGENTPACK_AUDIT_LOG, &[]),
                security_events_log: env_optional(obv_keys::AGENTPACK_SECURITY_EVENTS_LOG, &[]),
            }
        })
    }
}

/// MCP 客户端配置
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// 单次 JSON-RPC 请求超时
    pub request_timeout: Duration,
    /// manifest 声明的 MCP server 主机是否自动加入网络白名单
    pub implicit_network: bool,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            implicit_network: true,
        }
    }
}

impl McpConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            request_timeout: Duration::from_secs(env_u64(
                mcp_keys::AGENTPACK_MCP_TIMEOUT_SECS,
                &[],
                30,
            )),
            implicit_network: env_bool(mcp_keys::AGENTPACK_MCP_IMPLICIT_NETWORK, &[], true),
        }
    }
}

/// 沙箱执行配置
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// 运行 bootstrap 的解释器（默认 `node`）
    pub runtime: String,
    /// 等待 `{ready:true}` 的最长时间
    pub ready_timeout: Duration,
    /// 单次 `run` 调用超时
    pub run_timeout: Duration,
    /// 经网关发出的单次 fetch 超时
    pub fetch_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "node".to_string(),
            ready_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            runtime: env_or(sbx_keys::AGENTPACK_RUNTIME, sbx_keys::RUNTIME_ALIASES, || {
                "node".to_string()
            }),
            ready_timeout: Duration::from_secs(env_u64(
                sbx_keys::AGENTPACK_READY_TIMEOUT_SECS,
                &[],
                10,
            )),
            run_timeout: Duration::from_secs(env_u64(sbx_keys::AGENTPACK_RUN_TIMEOUT_SECS, &[], 30)),
            fetch_timeout: Duration::from_secs(env_u64(
                sbx_keys::AGENTPACK_FETCH_TIMEOUT_SECS,
                &[],
                30,
            )),
        }
    }
}
