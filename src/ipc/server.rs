//! Control IPC server.
//!
//! An `interprocess` local-socket listener, one `tokio::spawn`ed task per
//! connection, a per-connection read loop dispatching into a command
//! handler, `request_id` echoed back verbatim. Commands are forwarded to
//! the single-writer `Orchestrator` task via an `mpsc` channel carrying a
//! `oneshot` reply, so registry mutations stay serialized rather than
//! being handled inline per connection.

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, ToNsName};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::errors::ipc_codes;
use crate::ipc::protocol::{IpcRequest, IpcResponse};
use crate::{AppError, Result};

/// Channel the connection-handling tasks use to hand a parsed request to
/// the orchestrator and await its reply.
pub type OrchestratorTx = mpsc::Sender<(IpcRequest, oneshot::Sender<IpcResponse>)>;

/// Shared configuration every connection task needs.
#[derive(Clone)]
pub struct IpcServerConfig {
    pub ipc_name: String,
    pub request_timeout: Duration,
    pub write_buffer_bytes: usize,
    pub shutdown_drain: Duration,
}

/// Spawn the IPC accept loop.
///
/// # Errors
///
/// Returns [`AppError::Ipc`] if the listener cannot be created (e.g. the
/// socket/pipe name is already in use or invalid).
pub fn spawn_ipc_server(
    config: IpcServerConfig,
    orchestrator_tx: OrchestratorTx,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = config.ipc_name.clone();
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let config = Arc::new(config);

    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("IPC server shutting down, draining in-flight connections");
                        tokio::time::sleep(config.shutdown_drain).await;
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let config = Arc::clone(&config);
                                let orchestrator_tx = orchestrator_tx.clone();
                                tokio::spawn(handle_connection(stream, config, orchestrator_tx));
                            }
                            Err(err) => warn!(%err, "IPC accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(info_span!("ipc_server", ipc_name = %name)),
    );

    Ok(handle)
}

async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    config: Arc<IpcServerConfig>,
    orchestrator_tx: OrchestratorTx,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = dispatch_line(trimmed, &config, &orchestrator_tx).await;
                    let Ok(mut body) = serde_json::to_string(&response) else {
                        warn!("failed to serialize ipc response");
                        break;
                    };

                    if body.len() > config.write_buffer_bytes {
                        let overloaded = IpcResponse::failure(
                            response.cmd.clone(),
                            response.request_id.clone(),
                            ipc_codes::IPC_QUEUE_OVERLOADED,
                        );
                        body = serde_json::to_string(&overloaded).unwrap_or_default();
                    }
                    body.push('\n');

                    if let Err(err) = writer.write_all(body.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        debug!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

async fn dispatch_line(
    line: &str,
    config: &IpcServerConfig,
    orchestrator_tx: &OrchestratorTx,
) -> IpcResponse {
    let request: IpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return IpcResponse::failure("unknown", None, format!("{}: {err}", ipc_codes::INVALID_JSON));
        }
    };

    let cmd = request.cmd.clone();
    let request_id = request.request_id.clone();

    let (reply_tx, reply_rx) = oneshot::channel();
    if orchestrator_tx.send((request, reply_tx)).await.is_err() {
        return IpcResponse::failure(cmd, request_id, ipc_codes::INTERNAL_ERROR);
    }

    match tokio::time::timeout(config.request_timeout, reply_rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_canceled)) => IpcResponse::failure(cmd, request_id, ipc_codes::INTERNAL_ERROR),
        Err(_elapsed) => {
            // The orchestrator may still complete the request and try to
            // reply; that reply lands on a receiver we have dropped here
            // and is silently discarded — the client has already given up.
            IpcResponse::failure(cmd, request_id, "request_timeout")
        }
    }
}
