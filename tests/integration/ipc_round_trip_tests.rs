//! End-to-end Control IPC round trips against a live Orchestrator Core,
//! with no agent subprocess involved.

use serde_json::json;

use crate::integration::test_helpers::{send, TestServer};

#[tokio::test]
async fn ping_echoes_request_id_and_reports_uptime() {
    let (server, _temp) = TestServer::start("").await;

    let response = send(
        &server.ipc_name,
        json!({ "cmd": "ping", "request_id": "r1" }),
    )
    .await;

    assert_eq!(response["ok"], true);
    assert_eq!(response["request_id"], "r1");
    assert!(response["data"]["pong"].as_bool().unwrap());

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_command_is_rejected() {
    let (server, _temp) = TestServer::start("").await;

    let response = send(
        &server.ipc_name,
        json!({ "cmd": "not_a_real_command", "request_id": "r2" }),
    )
    .await;

    assert_eq!(response["ok"], false);
    assert_eq!(response["request_id"], "r2");

    server.shutdown().await;
}

#[tokio::test]
async fn add_list_and_remove_instance_round_trip() {
    let (server, _temp) = TestServer::start("").await;

    let add = send(
        &server.ipc_name,
        json!({
            "cmd": "add_agent_instance",
            "request_id": "a1",
            "label": "folderwatch",
            "template_id": "folderwatch",
            "executable": "true",
            "heartbeat_interval_s": 5.0,
            "agent_flush_interval_s": 10.0,
        }),
    )
    .await;
    assert_eq!(add["ok"], true, "add_agent_instance failed: {add:?}");

    let list = send(
        &server.ipc_name,
        json!({ "cmd": "get_agent_instances", "request_id": "a2" }),
    )
    .await;
    assert_eq!(list["ok"], true);
    let instances = list["data"]["instances"].as_array().expect("instances array");
    assert!(instances.iter().any(|i| i["label"] == "folderwatch"));

    let remove = send(
        &server.ipc_name,
        json!({ "cmd": "remove_agent_instance", "request_id": "a3", "label": "folderwatch" }),
    )
    .await;
    assert_eq!(remove["ok"], true);

    let list_after = send(
        &server.ipc_name,
        json!({ "cmd": "get_agent_instances", "request_id": "a4" }),
    )
    .await;
    let instances_after = list_after["data"]["instances"]
        .as_array()
        .expect("instances array");
    assert!(!instances_after.iter().any(|i| i["label"] == "folderwatch"));

    server.shutdown().await;
}

#[tokio::test]
async fn update_monitor_settings_persists_for_subsequent_reads() {
    let (server, _temp) = TestServer::start("").await;

    let update = send(
        &server.ipc_name,
        json!({
            "cmd": "update_monitor_settings",
            "request_id": "m1",
            "console_verbosity": "debug",
        }),
    )
    .await;
    assert_eq!(update["ok"], true, "update_monitor_settings failed: {update:?}");

    let get = send(
        &server.ipc_name,
        json!({ "cmd": "get_monitor_settings", "request_id": "m2" }),
    )
    .await;
    assert_eq!(get["data"]["console_verbosity"], "debug");

    server.shutdown().await;
}

#[tokio::test]
async fn control_orchestrator_shutdown_cancels_the_root_token() {
    let (server, _temp) = TestServer::start("").await;
    let cancel = server.cancel.clone();

    let response = send(
        &server.ipc_name,
        json!({ "cmd": "control_orchestrator", "request_id": "s1", "action": "shutdown" }),
    )
    .await;
    assert_eq!(response["ok"], true);
    assert!(cancel.is_cancelled());

    server.shutdown().await;
}

#[tokio::test]
async fn control_orchestrator_rejects_unmanaged_action() {
    let (server, _temp) = TestServer::start("").await;

    let response = send(
        &server.ipc_name,
        json!({ "cmd": "control_orchestrator", "request_id": "s2", "action": "reboot_host" }),
    )
    .await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"], "operations_not_managed");

    server.shutdown().await;
}
