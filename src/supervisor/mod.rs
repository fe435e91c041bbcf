//! Agent process supervisor.
//!
//! Spawns the configured executable for an agent instance, wires up its
//! three stdio pipes, and exposes the graceful/forceful termination and
//! exit-monitoring primitives the Orchestrator Core's session state
//! machine drives.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::AgentInstance;
use crate::{AppError, Result};

/// Environment variables inherited by every spawned agent process.
///
/// Every other variable from the orchestrator's environment is stripped via
/// `env_clear()` before the child is launched; only these plus the three
/// `MIMOLO_*` context variables reach the child.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Events a supervised child process produces outside of JLP traffic.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The child process exited or was reaped.
    Exited {
        agent_id: String,
        exit_code: Option<i32>,
        reason: String,
    },
    /// A line was read from the child's stderr (forwarded to diagnostics).
    StderrLine { agent_id: String, line: String },
}

/// Live stdio connection to a spawned agent process.
///
/// `child` is handed whole to [`monitor_exit`], which owns the only `wait()`
/// call for this process; `pid` is captured up front so the Orchestrator
/// Core can still escalate a signal by pid while that `wait()` is pending,
/// without needing a second `&mut Child`.
pub struct AgentConnection {
    pub agent_id: String,
    pub child: Child,
    pub pid: Option<u32>,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Spawns, signals, and reaps agent subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentProcessSupervisor;

impl AgentProcessSupervisor {
    /// Launch the configured executable for `instance`, in `working_dir`,
    /// with `agent_id` and `data_dir` injected into the environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Lifecycle`] on spawn failure or if a stdio pipe
    /// could not be captured.
    pub fn spawn(
        &self,
        instance: &AgentInstance,
        agent_id: &str,
        working_dir: &PathBuf,
        data_dir: &PathBuf,
    ) -> Result<(AgentConnection, ChildStderr)> {
        let mut cmd = Command::new(&instance.config.executable);
        for arg in &instance.config.args {
            cmd.arg(arg);
        }

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env("MIMOLO_AGENT_LABEL", &instance.label);
        cmd.env("MIMOLO_AGENT_ID", agent_id);
        cmd.env("MIMOLO_DATA_DIR", data_dir);

        cmd.current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Lifecycle(format!(
                "spawn_error: failed to launch '{}': {err}",
                instance.config.executable
            ))
        })?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Lifecycle("spawn_error: failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Lifecycle("spawn_error: failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Lifecycle("spawn_error: failed to capture stderr".into()))?;

        info!(agent_id, label = %instance.label, pid, "supervisor: spawned agent process");

        Ok((
            AgentConnection {
                agent_id: agent_id.to_owned(),
                child,
                pid,
                stdin,
                stdout,
            },
            stderr,
        ))
    }

    /// Send `SIGTERM` by pid on Unix (no-op elsewhere — callers fall through
    /// to `signal_forceful` on Windows after `graceful_exit_timeout`).
    ///
    /// Operates on a bare pid rather than `&Child` so it can run concurrently
    /// with [`monitor_exit`]'s in-flight `wait()` on the same process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Lifecycle`] if the signal could not be delivered.
    pub fn signal_graceful(&self, pid: Option<u32>) -> Result<()> {
        #[cfg(unix)]
        {
            let Some(pid) = pid else {
                return Ok(());
            };
            nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)),
                nix::sys::signal::Signal::SIGTERM,
            )
            .map_err(|err| AppError::Lifecycle(format!("signal_graceful failed: {err}")))?;
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
        }
        Ok(())
    }

    /// Send `SIGKILL` by pid immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Lifecycle`] if the signal could not be delivered.
    pub fn signal_forceful(&self, pid: Option<u32>) -> Result<()> {
        #[cfg(unix)]
        {
            let Some(pid) = pid else {
                return Ok(());
            };
            nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)),
                nix::sys::signal::Signal::SIGKILL,
            )
            .map_err(|err| AppError::Lifecycle(format!("signal_forceful failed: {err}")))?;
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
        }
        Ok(())
    }
}

/// Spawn a background task forwarding each stderr line as a diagnostics event.
#[must_use]
pub fn monitor_stderr(
    agent_id: String,
    stderr: ChildStderr,
    event_tx: mpsc::Sender<SupervisorEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                line = reader.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if event_tx
                                .send(SupervisorEvent::StderrLine {
                                    agent_id: agent_id.clone(),
                                    line,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            debug!(agent_id, %err, "supervisor: stderr reader error");
                            break;
                        }
                    }
                }
            }
        }
    })
}

/// Spawn a background task that awaits child exit and emits
/// [`SupervisorEvent::Exited`].
///
/// Respects `cancel`: when fired, the task exits without emitting an event
/// (the caller owns orderly shutdown bookkeeping in that case). Note that
/// `cancel` firing does not itself stop the child — it only stops this task
/// from waiting on it; the Orchestrator Core is responsible for signaling
/// the process through [`AgentProcessSupervisor::signal_graceful`] /
/// `signal_forceful` before or around cancellation.
#[must_use]
pub fn monitor_exit(
    agent_id: String,
    mut child: Child,
    event_tx: mpsc::Sender<SupervisorEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(agent_id, "supervisor: monitor_exit cancelled");
            }
            result = child.wait() => {
                let (exit_code, reason) = match result {
                    Ok(status) => {
                        let code = status.code();
                        let reason = code.map_or_else(
                            || "process terminated by signal".to_owned(),
                            |c| format!("process exited with code {c}"),
                        );
                        (code, reason)
                    }
                    Err(err) => {
                        warn!(agent_id, %err, "supervisor: error waiting for child");
                        (None, format!("wait error: {err}"))
                    }
                };

                let event = SupervisorEvent::Exited {
                    agent_id: agent_id.clone(),
                    exit_code,
                    reason,
                };
                if event_tx.send(event).await.is_err() {
                    warn!(agent_id, "supervisor: event_tx closed before exit could be delivered");
                }
            }
        }
    })
}
