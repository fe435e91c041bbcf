//! Shared scaffolding for spinning up a real Orchestrator Core + Control
//! IPC server against a temp data directory, and talking to it like a
//! Control client would.

use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ToNsName};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mimolo_operations::config::GlobalConfig;
use mimolo_operations::ipc::{spawn_ipc_server, IpcServerConfig};
use mimolo_operations::orchestrator::{spawn_ipc_bridge, Orchestrator};
use mimolo_operations::policy::ExtensionAllowlistValidator;

pub struct TestServer {
    pub ipc_name: String,
    pub cancel: CancellationToken,
    orchestrator_handle: tokio::task::JoinHandle<()>,
    ipc_handle: tokio::task::JoinHandle<()>,
    bridge_handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Spin up an orchestrator + IPC server over a fresh temp `data_dir`,
    /// with `plugins_toml` spliced into the `[plugins.*]` tables.
    pub async fn start(plugins_toml: &str) -> (Self, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ipc_name = format!("mimolo-test-{}", Uuid::new_v4());
        let toml = format!(
            r#"
            [operations]
            data_dir = "{}"
            ipc_name = "{ipc_name}"
            handshake_timeout_s = 0.5
            graceful_exit_timeout_s = 0.3

            {plugins_toml}
            "#,
            temp.path().display()
        );

        let mut config = GlobalConfig::from_toml_str(&toml).expect("config parses");
        mimolo_operations::bootstrap::run(&mut config).expect("bootstrap succeeds");

        let cancel = CancellationToken::new();
        let validator: Box<dyn mimolo_operations::policy::PluginValidator> =
            Box::new(ExtensionAllowlistValidator::default());
        let (orchestrator, inbox_rx) =
            Orchestrator::new(config.clone(), validator, cancel.clone()).expect("orchestrator builds");

        let (orchestrator_tx, bridge_handle) = spawn_ipc_bridge(orchestrator.inbox());
        let ipc_config = IpcServerConfig {
            ipc_name: ipc_name.clone(),
            request_timeout: Duration::from_secs(2),
            write_buffer_bytes: 1024 * 1024,
            shutdown_drain: Duration::from_millis(50),
        };
        let ipc_handle =
            spawn_ipc_server(ipc_config, orchestrator_tx, cancel.clone()).expect("ipc listener binds");

        let orchestrator_handle = tokio::spawn(orchestrator.run(inbox_rx));

        // Give the listener a moment to start accepting connections.
        tokio::time::sleep(Duration::from_millis(50)).await;

        (
            Self {
                ipc_name,
                cancel,
                orchestrator_handle,
                ipc_handle,
                bridge_handle,
            },
            temp,
        )
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.orchestrator_handle.await;
        self.ipc_handle.abort();
        self.bridge_handle.abort();
    }
}

/// Connect, send one JSON request line, and return the parsed response line.
pub async fn send(ipc_name: &str, request: Value) -> Value {
    let name = ipc_name
        .to_ns_name::<GenericNamespaced>()
        .expect("valid socket name");
    let stream = interprocess::local_socket::tokio::Stream::connect(name)
        .await
        .expect("connect to ipc socket");
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = serde_json::to_string(&request).expect("serialize request");
    line.push('\n');
    writer.write_all(line.as_bytes()).await.expect("write request");

    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .await
        .expect("read response");
    serde_json::from_str(response_line.trim()).expect("parse response json")
}

/// Poll `get_agent_states` until `label` reports `want`, or give up after
/// roughly four seconds (background spawn/handshake/exit bookkeeping runs
/// off the IPC reply path, so the state lags the command that caused it).
pub async fn wait_for_state(ipc_name: &str, label: &str, want: &str) -> bool {
    for _ in 0..40 {
        let states = send(
            ipc_name,
            serde_json::json!({ "cmd": "get_agent_states", "request_id": "poll" }),
        )
        .await;
        if states["data"]["states"][label]["state"] == want {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
