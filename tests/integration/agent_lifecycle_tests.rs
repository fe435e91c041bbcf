//! Full spawn → handshake → running → stop lifecycle against a real
//! subprocess standing in for an agent, driven entirely over Control IPC.
//!
//! The stand-in agent is a small `sh` script that emits a `handshake`
//! envelope, then one `heartbeat` per second until killed. Unix only: the
//! orchestrator's signal escalation (`signal_graceful`/`signal_forceful`)
//! is itself `cfg(unix)`.

#![cfg(unix)]

use serde_json::json;

use crate::integration::test_helpers::{send, wait_for_state, TestServer};

fn heartbeat_agent_script() -> &'static str {
    r#"#!/bin/sh
printf '{"type":"handshake","timestamp":"2026-07-27T00:00:00Z","agent_id":"placeholder","agent_label":"shtest","protocol_version":"0.3","agent_version":"1.0.0","min_app_version":"1.0.0","capabilities":{}}\n'
while true; do
  printf '{"type":"heartbeat","timestamp":"2026-07-27T00:00:00Z","agent_id":"placeholder","agent_label":"shtest","protocol_version":"0.3","agent_version":"1.0.0"}\n'
  sleep 1
done
"#
}

async fn write_agent_script(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("agent.sh");
    tokio::fs::write(&path, heartbeat_agent_script()).await.expect("write script");
    let mut perms = tokio::fs::metadata(&path).await.expect("stat script").permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    tokio::fs::set_permissions(&path, perms).await.expect("chmod script");
    path
}

async fn add_shtest_instance(ipc_name: &str, script: &std::path::Path, request_id: &str) {
    let add = send(
        ipc_name,
        json!({
            "cmd": "add_agent_instance",
            "request_id": request_id,
            "label": "shtest",
            "executable": "sh",
            "args": [script.to_string_lossy()],
            "heartbeat_interval_s": 1.0,
            "agent_flush_interval_s": 5.0,
        }),
    )
    .await;
    assert_eq!(add["ok"], true, "add_agent_instance failed: {add:?}");
}

#[tokio::test]
async fn start_agent_reaches_running_state_after_handshake() {
    let (server, temp) = TestServer::start("").await;
    let script = write_agent_script(temp.path()).await;
    add_shtest_instance(&server.ipc_name, &script, "a1").await;

    let start = send(
        &server.ipc_name,
        json!({ "cmd": "start_agent", "request_id": "a2", "label": "shtest" }),
    )
    .await;
    assert_eq!(start["ok"], true, "start_agent failed: {start:?}");
    assert!(start["data"]["agent_id"].as_str().is_some());

    assert!(
        wait_for_state(&server.ipc_name, "shtest", "running").await,
        "instance did not reach running state"
    );

    let states = send(
        &server.ipc_name,
        json!({ "cmd": "get_agent_states", "request_id": "a3" }),
    )
    .await;
    assert!(states["data"]["states"]["shtest"]["pid"].as_u64().is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn stop_agent_transitions_to_inactive() {
    let (server, temp) = TestServer::start("").await;
    let script = write_agent_script(temp.path()).await;
    add_shtest_instance(&server.ipc_name, &script, "b1").await;

    let start = send(
        &server.ipc_name,
        json!({ "cmd": "start_agent", "request_id": "b2", "label": "shtest" }),
    )
    .await;
    assert_eq!(start["ok"], true);
    assert!(wait_for_state(&server.ipc_name, "shtest", "running").await);

    let stop = send(
        &server.ipc_name,
        json!({ "cmd": "stop_agent", "request_id": "b3", "label": "shtest" }),
    )
    .await;
    assert_eq!(stop["ok"], true, "stop_agent failed: {stop:?}");

    assert!(
        wait_for_state(&server.ipc_name, "shtest", "inactive").await,
        "instance did not settle to inactive after stop_agent"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn starting_an_unknown_label_is_rejected() {
    let (server, _temp) = TestServer::start("").await;

    let response = send(
        &server.ipc_name,
        json!({ "cmd": "start_agent", "request_id": "c1", "label": "does_not_exist" }),
    )
    .await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"], "unknown_instance");

    server.shutdown().await;
}

#[tokio::test]
async fn starting_an_already_running_label_is_rejected() {
    let (server, temp) = TestServer::start("").await;
    let script = write_agent_script(temp.path()).await;
    add_shtest_instance(&server.ipc_name, &script, "d1").await;

    let first = send(
        &server.ipc_name,
        json!({ "cmd": "start_agent", "request_id": "d2", "label": "shtest" }),
    )
    .await;
    assert_eq!(first["ok"], true);
    assert!(wait_for_state(&server.ipc_name, "shtest", "running").await);

    let second = send(
        &server.ipc_name,
        json!({ "cmd": "start_agent", "request_id": "d3", "label": "shtest" }),
    )
    .await;
    assert_eq!(second["ok"], false);
    assert_eq!(second["error"], "invalid_state_transition");

    server.shutdown().await;
}
