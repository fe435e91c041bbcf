//! Orchestrator Core: the single actor owning the instance registry, every
//! live [`AgentSession`], and the Control IPC dispatch table.
//!
//! One `mpsc` inbox, one task draining it, every registry/session mutation
//! happening on that task. Slow work (spawning a process and waiting on
//! its handshake) runs on a detached task that reports back through the
//! same inbox, so one agent's handshake never blocks another IPC request
//! from being answered.

pub mod restart;
pub mod widget_cache;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConsoleVerbosity, GlobalConfig};
use crate::errors::ipc_codes;
use crate::ipc::protocol::{IpcRequest, IpcResponse};
use crate::ipc::server::OrchestratorTx;
use crate::jlp::envelope::{OutboundCmd, OutboundCommand};
use crate::orchestrator::widget_cache::WidgetFrameCache;
use crate::persistence::RegistryStore;
use crate::policy::PluginValidator;
use crate::registry::{AgentInstance, AgentTemplate, InstanceConfig, InstanceState, RegistrySnapshot};
use crate::scheduler::{FlushScheduler, FlushSchedulerHandle, ScheduleEvent};
use crate::session::handshake::{version_compatible, wait_for_handshake, ADVERTISED_PROTOCOL_VERSION};
use crate::session::reader::run_reader;
use crate::session::writer::run_writer;
use crate::session::{AgentSession, SessionEvent, SessionState};
use crate::sinks::{JsonlSink, SinkRecord};
use crate::supervisor::{monitor_exit, monitor_stderr, AgentConnection, AgentProcessSupervisor, SupervisorEvent};
use crate::{AppError, Result};

/// Every input the Orchestrator Core's single task consumes.
pub enum OrchestratorMsg {
    /// A parsed Control request awaiting a response.
    Ipc(IpcRequest, oneshot::Sender<IpcResponse>),
    /// An envelope-derived event from one session's reader task.
    Session { agent_id: String, event: SessionEvent },
    /// An out-of-band event from one session's supervisor tasks.
    Supervisor(SupervisorEvent),
    /// A deadline fired on the Flush Scheduler.
    Schedule(ScheduleEvent),
    /// A background `start_agent` task finished handshaking successfully.
    SessionStarted {
        label: String,
        agent_id: String,
        pid: Option<u32>,
        cmd_tx: mpsc::Sender<OutboundCommand>,
        cancel: CancellationToken,
    },
    /// A background `start_agent` task failed before a session could start.
    SessionFailed { label: String, detail: String },
    /// A scheduled restart's backoff delay has elapsed.
    RestartDue { label: String },
}

/// Runtime bookkeeping for one live session, owned exclusively by the
/// Orchestrator Core's task.
struct SessionRuntime {
    label: String,
    session: AgentSession,
    cmd_tx: mpsc::Sender<OutboundCommand>,
    cancel: CancellationToken,
    pid: Option<u32>,
}

/// Result of a `stop_agent`/`restart_agent` graceful-stop request.
enum StopOutcome {
    /// A live session exists and the shutdown sequence was initiated.
    Stopping,
    /// The label is registered but has no live session; stopping it is a
    /// no-op.
    AlreadyInactive,
}

/// Per-instance restart bookkeeping, independent
/// of any single session's lifetime.
#[derive(Default)]
struct RestartState {
    consecutive_failures: u32,
    window_start: Option<Instant>,
}

/// The Orchestrator Core.
pub struct Orchestrator {
    config: GlobalConfig,
    registry: RegistrySnapshot,
    sessions: HashMap<String, SessionRuntime>,
    label_to_agent: HashMap<String, String>,
    restart_state: HashMap<String, RestartState>,
    pending_restart: HashSet<String>,
    evidence: JsonlSink,
    diagnostics: JsonlSink,
    flush_handle: FlushSchedulerHandle,
    widget_cache: WidgetFrameCache,
    registry_store: RegistryStore,
    validator: Box<dyn PluginValidator>,
    supervisor: AgentProcessSupervisor,
    inbox_tx: mpsc::Sender<OrchestratorMsg>,
    cancel: CancellationToken,
    started_at: Instant,
}

impl Orchestrator {
    /// Construct the Orchestrator Core from a loaded configuration.
    ///
    /// Seeds the in-memory registry from `config.plugins` merged over any
    /// persisted `registry.json` snapshot (the persisted state wins for
    /// instances it already knows about, so runtime additions survive a
    /// restart; config-only instances are added fresh).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sink`] if the evidence/diagnostics sinks cannot
    /// be opened, or [`AppError::Io`]/[`AppError::Config`] if the persisted
    /// registry snapshot cannot be loaded.
    pub fn new(
        config: GlobalConfig,
        validator: Box<dyn PluginValidator>,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<OrchestratorMsg>)> {
        let evidence = JsonlSink::new(
            config.evidence_log_path(),
            config.operations.rotate_bytes,
            config.operations.rotate_keep,
            config.operations.fsync_on_summary,
        )?;
        let diagnostics = JsonlSink::new(
            config.diagnostics_log_path(),
            config.operations.rotate_bytes,
            config.operations.rotate_keep,
            false,
        )?;

        let registry_store = RegistryStore::new(config.registry_cache_path());
        let mut registry = registry_store.load()?;
        for (label, instance_config) in &config.plugins {
            registry.instances.entry(label.clone()).or_insert_with(|| {
                AgentInstance::new(label.clone(), label.clone(), instance_config.clone())
            });
        }

        let (schedule_tx, mut schedule_rx) = mpsc::channel(256);
        let flush_handle = FlushScheduler::new(
            Duration::from_millis(config.operations.flush_tick_ms),
            schedule_tx,
            cancel.clone(),
        )
        .spawn();

        let (inbox_tx, inbox_rx) = mpsc::channel(1024);
        let forward_tx = inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = schedule_rx.recv().await {
                if forward_tx.send(OrchestratorMsg::Schedule(event)).await.is_err() {
                    break;
                }
            }
        });

        let orchestrator = Self {
            config,
            registry,
            sessions: HashMap::new(),
            label_to_agent: HashMap::new(),
            restart_state: HashMap::new(),
            pending_restart: HashSet::new(),
            evidence,
            diagnostics,
            flush_handle,
            widget_cache: WidgetFrameCache::new(),
            registry_store,
            validator,
            supervisor: AgentProcessSupervisor,
            inbox_tx,
            cancel,
            started_at: Instant::now(),
        };

        Ok((orchestrator, inbox_rx))
    }

    /// A sender usable by IPC connection tasks or tests to post messages
    /// into this orchestrator's inbox.
    #[must_use]
    pub fn inbox(&self) -> mpsc::Sender<OrchestratorMsg> {
        self.inbox_tx.clone()
    }

    /// Drive the Orchestrator Core's event loop until cancelled.
    pub async fn run(mut self, mut inbox_rx: mpsc::Receiver<OrchestratorMsg>) {
        let mut heartbeat_ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!("orchestrator: shutdown signal received");
                    self.shutdown_all().await;
                    break;
                }

                _ = heartbeat_ticker.tick() => {
                    self.check_heartbeats();
                }

                msg = inbox_rx.recv() => {
                    match msg {
                        None => {
                            warn!("orchestrator: inbox closed, stopping");
                            break;
                        }
                        Some(msg) => self.handle_message(msg).await,
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: OrchestratorMsg) {
        match msg {
            OrchestratorMsg::Ipc(request, reply_tx) => self.dispatch_ipc(request, reply_tx).await,
            OrchestratorMsg::Session { agent_id, event } => self.handle_session_event(&agent_id, event),
            OrchestratorMsg::Supervisor(event) => self.handle_supervisor_event(event).await,
            OrchestratorMsg::Schedule(event) => self.handle_schedule_event(event),
            OrchestratorMsg::SessionStarted { label, agent_id, pid, cmd_tx, cancel } => {
                self.on_session_started(label, agent_id, pid, cmd_tx, cancel);
            }
            OrchestratorMsg::SessionFailed { label, detail } => self.on_session_failed(&label, detail),
            OrchestratorMsg::RestartDue { label } => {
                if self.pending_restart.remove(&label) || self.registry.get(&label).is_some() {
                    self.spawn_agent(label, None);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // IPC dispatch
    // ---------------------------------------------------------------

    async fn dispatch_ipc(&mut self, request: IpcRequest, reply_tx: oneshot::Sender<IpcResponse>) {
        let cmd = request.cmd.clone();
        let request_id = request.request_id.clone();

        let response = match cmd.as_str() {
            "ping" => Some(self.handle_ping()),
            "get_registered_plugins" => Some(self.handle_get_registered_plugins(&cmd, request_id.clone())),
            "list_agent_templates" => Some(self.handle_list_agent_templates(&cmd, request_id.clone())),
            "get_agent_instances" => Some(self.handle_get_agent_instances(&cmd, request_id.clone())),
            "get_agent_states" => Some(self.handle_get_agent_states(&cmd, request_id.clone())),
            "start_agent" => {
                self.handle_start_agent(request, reply_tx);
                None
            }
            "stop_agent" => Some(self.handle_stop_agent(&request)),
            "restart_agent" => Some(self.handle_restart_agent(&request)),
            "add_agent_instance" => Some(self.handle_add_agent_instance(&request)),
            "duplicate_agent_instance" => Some(self.handle_duplicate_agent_instance(&request)),
            "remove_agent_instance" => Some(self.handle_remove_agent_instance(&request)),
            "update_agent_instance" => Some(self.handle_update_agent_instance(&request)),
            "get_monitor_settings" => Some(self.handle_get_monitor_settings(&cmd, request_id.clone())),
            "update_monitor_settings" => Some(self.handle_update_monitor_settings(&request)),
            "get_runtime_perf" => Some(self.handle_get_runtime_perf(&cmd, request_id.clone())),
            "get_widget_manifest" => Some(self.handle_get_widget_manifest(&cmd, request_id.clone())),
            "request_widget_render" => Some(self.handle_request_widget_render(&request)),
            "dispatch_widget_action" => Some(self.handle_dispatch_widget_action(&request)),
            "inspect_plugin_archive" => Some(self.handle_inspect_plugin_archive(&request)),
            "install_plugin" => Some(self.handle_install_plugin(&request)),
            "upgrade_plugin" => Some(self.handle_upgrade_plugin(&request)),
            "control_orchestrator" => Some(self.handle_control_orchestrator(&request)),
            _ => Some(IpcResponse::failure(cmd, request_id, ipc_codes::INVALID_CMD)),
        };

        if let Some(response) = response {
            let _ = reply_tx.send(response);
        }
    }

    fn handle_ping(&self) -> IpcResponse {
        IpcResponse::success(
            "ping",
            None,
            json!({ "pong": true, "uptime_s": self.started_at.elapsed().as_secs_f64() }),
        )
    }

    fn handle_get_registered_plugins(&self, cmd: &str, request_id: Option<String>) -> IpcResponse {
        let plugins: Vec<Value> = self
            .registry
            .templates
            .values()
            .map(|t| json!({ "template_id": t.template_id, "script": t.script }))
            .collect();
        IpcResponse::success(cmd, request_id, json!({ "plugins": plugins }))
    }

    fn handle_list_agent_templates(&self, cmd: &str, request_id: Option<String>) -> IpcResponse {
        let templates: Vec<&AgentTemplate> = self.registry.templates.values().collect();
        IpcResponse::success(cmd, request_id, json!({ "templates": templates }))
    }

    fn handle_get_agent_instances(&self, cmd: &str, request_id: Option<String>) -> IpcResponse {
        let instances: Vec<&AgentInstance> = self.registry.instances.values().collect();
        IpcResponse::success(cmd, request_id, json!({ "instances": instances }))
    }

    fn handle_get_agent_states(&self, cmd: &str, request_id: Option<String>) -> IpcResponse {
        let states: HashMap<&str, Value> = self
            .registry
            .instances
            .values()
            .map(|i| {
                (
                    i.label.as_str(),
                    json!({ "state": i.state, "detail": i.detail, "pid": i.pid }),
                )
            })
            .collect();
        IpcResponse::success(cmd, request_id, json!({ "states": states }))
    }

    fn handle_start_agent(&mut self, request: IpcRequest, reply_tx: oneshot::Sender<IpcResponse>) {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label.to_owned(),
            Err(code) => {
                let _ = reply_tx.send(IpcResponse::failure("start_agent", request_id, code));
                return;
            }
        };

        if self.label_to_agent.contains_key(&label) {
            let _ = reply_tx.send(IpcResponse::failure(
                "start_agent",
                request_id,
                ipc_codes::INVALID_STATE_TRANSITION,
            ));
            return;
        }
        if !self.registry.label_exists(&label) {
            let _ = reply_tx.send(IpcResponse::failure(
                "start_agent",
                request_id,
                ipc_codes::UNKNOWN_INSTANCE,
            ));
            return;
        }

        self.spawn_agent(label, Some((reply_tx, request_id)));
    }

    fn handle_stop_agent(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label,
            Err(code) => return IpcResponse::failure("stop_agent", request_id, code),
        };

        match self.begin_graceful_stop(label) {
            Ok(StopOutcome::Stopping) => {
                IpcResponse::success("stop_agent", request_id, json!({ "status": "stopping" }))
            }
            Ok(StopOutcome::AlreadyInactive) => IpcResponse::success(
                "stop_agent",
                request_id,
                json!({ "status": "already_inactive", "detail": "already_inactive" }),
            ),
            Err(err) => IpcResponse::failure("stop_agent", request_id, ipc_error_code(&err)),
        }
    }

    fn handle_restart_agent(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label.to_owned(),
            Err(code) => return IpcResponse::failure("restart_agent", request_id, code),
        };

        if self.label_to_agent.contains_key(&label) {
            match self.begin_graceful_stop(&label) {
                Ok(_) => {
                    self.pending_restart.insert(label);
                    IpcResponse::success("restart_agent", request_id, json!({ "status": "restarting" }))
                }
                Err(err) => IpcResponse::failure("restart_agent", request_id, ipc_error_code(&err)),
            }
        } else if self.registry.label_exists(&label) {
            self.spawn_agent(label, None);
            IpcResponse::success("restart_agent", request_id, json!({ "status": "starting" }))
        } else {
            IpcResponse::failure("restart_agent", request_id, ipc_codes::UNKNOWN_INSTANCE)
        }
    }

    fn handle_add_agent_instance(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label.to_owned(),
            Err(code) => return IpcResponse::failure("add_agent_instance", request_id, code),
        };
        if self.registry.label_exists(&label) {
            return IpcResponse::failure("add_agent_instance", request_id, ipc_codes::LABEL_CONFLICT);
        }
        let executable = match request.required_str("executable") {
            Ok(executable) => executable.to_owned(),
            Err(code) => return IpcResponse::failure("add_agent_instance", request_id, code),
        };
        let template_id = request.optional_str("template_id").unwrap_or(&label).to_owned();

        let instance_config = InstanceConfig {
            enabled: request.args.get("enabled").and_then(Value::as_bool).unwrap_or(true),
            executable,
            args: request
                .args
                .get("args")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
                .unwrap_or_default(),
            heartbeat_interval_s: request
                .args
                .get("heartbeat_interval_s")
                .and_then(Value::as_f64)
                .unwrap_or(15.0),
            agent_flush_interval_s: request
                .args
                .get("agent_flush_interval_s")
                .and_then(Value::as_f64)
                .unwrap_or(60.0),
            launch_in_separate_terminal: request
                .args
                .get("launch_in_separate_terminal")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            cpu_budget_percent: request.args.get("cpu_budget_percent").and_then(Value::as_f64),
        };

        let instance = AgentInstance::new(label.clone(), template_id, instance_config);
        self.registry.instances.insert(label, instance.clone());
        if let Err(err) = self.persist_registry() {
            warn!(%err, "add_agent_instance: failed to persist registry");
        }
        IpcResponse::success("add_agent_instance", request_id, serde_json::to_value(&instance).unwrap_or(Value::Null))
    }

    fn handle_duplicate_agent_instance(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label.to_owned(),
            Err(code) => return IpcResponse::failure("duplicate_agent_instance", request_id, code),
        };
        let new_label = match request.required_str("new_label") {
            Ok(new_label) => new_label.to_owned(),
            Err(code) => return IpcResponse::failure("duplicate_agent_instance", request_id, code),
        };

        let Some(source) = self.registry.get(&label).cloned() else {
            return IpcResponse::failure("duplicate_agent_instance", request_id, ipc_codes::UNKNOWN_INSTANCE);
        };
        if self.registry.label_exists(&new_label) {
            return IpcResponse::failure("duplicate_agent_instance", request_id, ipc_codes::LABEL_CONFLICT);
        }

        let duplicate = AgentInstance::new(new_label.clone(), source.template_id.clone(), source.config.clone());
        self.registry.instances.insert(new_label, duplicate.clone());
        if let Err(err) = self.persist_registry() {
            warn!(%err, "duplicate_agent_instance: failed to persist registry");
        }
        IpcResponse::success(
            "duplicate_agent_instance",
            request_id,
            serde_json::to_value(&duplicate).unwrap_or(Value::Null),
        )
    }

    fn handle_remove_agent_instance(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label,
            Err(code) => return IpcResponse::failure("remove_agent_instance", request_id, code),
        };
        if self.label_to_agent.contains_key(label) {
            return IpcResponse::failure(
                "remove_agent_instance",
                request_id,
                ipc_codes::INVALID_STATE_TRANSITION,
            );
        }
        if self.registry.instances.remove(label).is_none() {
            return IpcResponse::failure("remove_agent_instance", request_id, ipc_codes::UNKNOWN_INSTANCE);
        }
        if let Err(err) = self.persist_registry() {
            warn!(%err, "remove_agent_instance: failed to persist registry");
        }
        IpcResponse::success("remove_agent_instance", request_id, json!({ "removed": true }))
    }

    fn handle_update_agent_instance(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label.to_owned(),
            Err(code) => return IpcResponse::failure("update_agent_instance", request_id, code),
        };
        let Some(instance) = self.registry.instances.get_mut(&label) else {
            return IpcResponse::failure("update_agent_instance", request_id, ipc_codes::UNKNOWN_INSTANCE);
        };

        if let Some(v) = request.args.get("enabled").and_then(Value::as_bool) {
            instance.config.enabled = v;
        }
        if let Some(v) = request.args.get("executable").and_then(Value::as_str) {
            instance.config.executable = v.to_owned();
        }
        if let Some(values) = request.args.get("args").and_then(Value::as_array) {
            instance.config.args = values.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect();
        }
        if let Some(v) = request.args.get("heartbeat_interval_s").and_then(Value::as_f64) {
            instance.config.heartbeat_interval_s = v;
        }
        if let Some(v) = request.args.get("agent_flush_interval_s").and_then(Value::as_f64) {
            instance.config.agent_flush_interval_s = v;
        }
        if let Some(v) = request.args.get("launch_in_separate_terminal").and_then(Value::as_bool) {
            instance.config.launch_in_separate_terminal = v;
        }
        if request.args.contains_key("cpu_budget_percent") {
            instance.config.cpu_budget_percent = request.args.get("cpu_budget_percent").and_then(Value::as_f64);
        }
        instance.updated_at = chrono::Utc::now();
        let snapshot = instance.clone();

        if let Err(err) = self.persist_registry() {
            warn!(%err, "update_agent_instance: failed to persist registry");
        }
        IpcResponse::success(
            "update_agent_instance",
            request_id,
            serde_json::to_value(&snapshot).unwrap_or(Value::Null),
        )
    }

    fn handle_get_monitor_settings(&self, cmd: &str, request_id: Option<String>) -> IpcResponse {
        IpcResponse::success(cmd, request_id, serde_json::to_value(&self.registry.monitor).unwrap_or(Value::Null))
    }

    fn handle_update_monitor_settings(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        if let Some(v) = request.args.get("poll_tick_s").and_then(Value::as_f64) {
            if v <= 0.0 {
                return IpcResponse::failure(
                    "update_monitor_settings",
                    request_id,
                    "missing_field:poll_tick_s",
                );
            }
            self.registry.monitor.poll_tick_s = v;
        }
        if let Some(v) = request.args.get("cooldown_seconds").and_then(Value::as_u64) {
            self.registry.monitor.cooldown_seconds = v as u32;
        }
        if let Some(v) = request.optional_str("console_verbosity") {
            match ConsoleVerbosity::parse(v) {
                Ok(level) => self.registry.monitor.console_verbosity = level,
                Err(_) => {
                    return IpcResponse::failure(
                        "update_monitor_settings",
                        request_id,
                        "missing_field:console_verbosity",
                    )
                }
            }
        }

        if let Err(err) = self.persist_registry() {
            warn!(%err, "update_monitor_settings: failed to persist registry");
        }
        IpcResponse::success(
            "update_monitor_settings",
            request_id,
            serde_json::to_value(&self.registry.monitor).unwrap_or(Value::Null),
        )
    }

    fn handle_get_runtime_perf(&self, cmd: &str, request_id: Option<String>) -> IpcResponse {
        let running = self
            .registry
            .instances
            .values()
            .filter(|i| i.state == InstanceState::Running)
            .count();
        let errored = self
            .registry
            .instances
            .values()
            .filter(|i| i.state == InstanceState::Error)
            .count();
        IpcResponse::success(
            cmd,
            request_id,
            json!({
                "uptime_s": self.started_at.elapsed().as_secs_f64(),
                "total_instances": self.registry.instances.len(),
                "running_instances": running,
                "error_instances": errored,
            }),
        )
    }

    fn handle_get_widget_manifest(&self, cmd: &str, request_id: Option<String>) -> IpcResponse {
        let agents: Vec<Value> = self
            .sessions
            .iter()
            .map(|(agent_id, rt)| json!({ "agent_id": agent_id, "label": rt.label }))
            .collect();
        IpcResponse::success(cmd, request_id, json!({ "agents": agents }))
    }

    fn handle_request_widget_render(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label,
            Err(code) => return IpcResponse::failure("request_widget_render", request_id, code),
        };
        let Some(agent_id) = self.label_to_agent.get(label).cloned() else {
            return IpcResponse::failure("request_widget_render", request_id, ipc_codes::UNKNOWN_INSTANCE);
        };
        let cached = self.widget_cache.get(&agent_id);

        if let Some(rt) = self.sessions.get(&agent_id) {
            let cmd = OutboundCommand::bare(OutboundCmd::WidgetRender);
            if rt.cmd_tx.try_send(cmd).is_err() {
                warn!(agent_id, "request_widget_render: command channel full or closed");
            }
        }
        IpcResponse::success(
            "request_widget_render",
            request_id,
            json!({ "requested": true, "cached_frame": cached }),
        )
    }

    fn handle_dispatch_widget_action(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let label = match request.required_str("label") {
            Ok(label) => label,
            Err(code) => return IpcResponse::failure("dispatch_widget_action", request_id, code),
        };
        let Some(agent_id) = self.label_to_agent.get(label).cloned() else {
            return IpcResponse::failure("dispatch_widget_action", request_id, ipc_codes::UNKNOWN_INSTANCE);
        };
        let Some(rt) = self.sessions.get(&agent_id) else {
            return IpcResponse::failure("dispatch_widget_action", request_id, ipc_codes::UNKNOWN_INSTANCE);
        };

        let mut cmd = OutboundCommand::bare(OutboundCmd::WidgetAction);
        cmd.args = Some(Value::Object(request.args.clone()));
        if rt.cmd_tx.try_send(cmd).is_err() {
            warn!(agent_id, "dispatch_widget_action: command channel full or closed");
        }
        IpcResponse::success("dispatch_widget_action", request_id, json!({ "dispatched": true }))
    }

    fn handle_inspect_plugin_archive(&self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let archive_path = match request.required_str("archive_path") {
            Ok(path) => path,
            Err(code) => return IpcResponse::failure("inspect_plugin_archive", request_id, code),
        };
        let result = self.validator.validate(archive_path);
        IpcResponse::success(
            "inspect_plugin_archive",
            request_id,
            json!({ "allowed": result.allowed, "reason": result.reason }),
        )
    }

    fn handle_install_plugin(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let archive_path = match request.required_str("archive_path") {
            Ok(path) => path.to_owned(),
            Err(code) => return IpcResponse::failure("install_plugin", request_id, code),
        };
        let template_id = match request.required_str("template_id") {
            Ok(id) => id.to_owned(),
            Err(code) => return IpcResponse::failure("install_plugin", request_id, code),
        };
        let script = request.optional_str("script").unwrap_or(&archive_path).to_owned();

        let result = self.validator.validate(&archive_path);
        if !result.allowed {
            return IpcResponse::success(
                "install_plugin",
                request_id,
                json!({ "installed": false, "reason": result.reason }),
            );
        }

        self.registry.templates.insert(
            template_id.clone(),
            AgentTemplate { template_id, script, default_config: HashMap::new() },
        );
        if let Err(err) = self.persist_registry() {
            warn!(%err, "install_plugin: failed to persist registry");
        }
        IpcResponse::success("install_plugin", request_id, json!({ "installed": true }))
    }

    fn handle_upgrade_plugin(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        let archive_path = match request.required_str("archive_path") {
            Ok(path) => path.to_owned(),
            Err(code) => return IpcResponse::failure("upgrade_plugin", request_id, code),
        };
        let template_id = match request.required_str("template_id") {
            Ok(id) => id.to_owned(),
            Err(code) => return IpcResponse::failure("upgrade_plugin", request_id, code),
        };
        if !self.registry.templates.contains_key(&template_id) {
            return IpcResponse::failure("upgrade_plugin", request_id, ipc_codes::UNKNOWN_INSTANCE);
        }

        let result = self.validator.validate(&archive_path);
        if !result.allowed {
            return IpcResponse::success(
                "upgrade_plugin",
                request_id,
                json!({ "upgraded": false, "reason": result.reason }),
            );
        }

        let script = request.optional_str("script").unwrap_or(&archive_path).to_owned();
        if let Some(template) = self.registry.templates.get_mut(&template_id) {
            template.script = script;
        }
        if let Err(err) = self.persist_registry() {
            warn!(%err, "upgrade_plugin: failed to persist registry");
        }
        IpcResponse::success("upgrade_plugin", request_id, json!({ "upgraded": true }))
    }

    fn handle_control_orchestrator(&mut self, request: &IpcRequest) -> IpcResponse {
        let request_id = request.request_id.clone();
        match request.optional_str("action") {
            Some("shutdown") => {
                self.cancel.cancel();
                IpcResponse::success("control_orchestrator", request_id, json!({ "status": "shutting_down" }))
            }
            _ => IpcResponse::failure("control_orchestrator", request_id, ipc_codes::OPERATIONS_NOT_MANAGED),
        }
    }

    fn persist_registry(&self) -> Result<()> {
        self.registry_store.save(&self.registry)
    }

    // ---------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------

    /// Spawn the background task that launches `label`'s process and waits
    /// for its handshake. `reply` is consumed by that task, not here.
    fn spawn_agent(&mut self, label: String, reply: Option<(oneshot::Sender<IpcResponse>, Option<String>)>) {
        let Some(instance) = self.registry.get(&label).cloned() else {
            if let Some((reply_tx, request_id)) = reply {
                let _ = reply_tx.send(IpcResponse::failure("start_agent", request_id, ipc_codes::UNKNOWN_INSTANCE));
            }
            return;
        };

        let agent_id = Uuid::new_v4().to_string();
        let working_dir = self.config.agent_artifact_root(&instance.template_id, &label);
        let data_dir = working_dir.clone();
        let supervisor = self.supervisor;
        let handshake_timeout = Duration::from_secs_f64(self.config.operations.handshake_timeout_s);
        let max_frame_bytes = self.config.operations.max_frame_bytes;
        let inbox_tx = self.inbox_tx.clone();

        tokio::spawn(async move {
            let outcome = spawn_and_handshake(
                supervisor,
                &instance,
                &agent_id,
                &working_dir,
                &data_dir,
                handshake_timeout,
                max_frame_bytes,
                inbox_tx.clone(),
            )
            .await;

            match outcome {
                Ok(started) => {
                    if let Some((reply_tx, request_id)) = reply {
                        let _ = reply_tx.send(IpcResponse::success(
                            "start_agent",
                            request_id,
                            json!({ "agent_id": started.agent_id, "label": started.label }),
                        ));
                    }
                    let _ = inbox_tx
                        .send(OrchestratorMsg::SessionStarted {
                            label: started.label,
                            agent_id: started.agent_id,
                            pid: started.pid,
                            cmd_tx: started.cmd_tx,
                            cancel: started.cancel,
                        })
                        .await;
                }
                Err(detail) => {
                    if let Some((reply_tx, request_id)) = reply {
                        let _ = reply_tx.send(IpcResponse::failure("start_agent", request_id, "spawn_error"));
                    }
                    let _ = inbox_tx.send(OrchestratorMsg::SessionFailed { label, detail }).await;
                }
            }
        });
    }

    fn on_session_started(
        &mut self,
        label: String,
        agent_id: String,
        pid: Option<u32>,
        cmd_tx: mpsc::Sender<OutboundCommand>,
        cancel: CancellationToken,
    ) {
        let mut session = AgentSession::new(agent_id.clone(), label.clone(), Instant::now());
        let _ = session.transition(SessionState::Handshaking, None);
        let _ = session.transition(SessionState::Running, None);

        self.sessions.insert(
            agent_id.clone(),
            SessionRuntime { label: label.clone(), session, cmd_tx, cancel, pid },
        );
        self.label_to_agent.insert(label.clone(), agent_id.clone());

        if let Some(instance) = self.registry.instances.get_mut(&label) {
            instance.set_state(InstanceState::Running, None);
            instance.pid = pid;
        }
        self.restart_state.remove(&label);

        if let Some(instance) = self.registry.get(&label) {
            self.flush_handle.register(
                agent_id,
                Duration::from_secs_f64(instance.config.agent_flush_interval_s),
                Duration::from_secs_f64(self.config.operations.flush_backoff_s),
            );
        }

        if let Err(err) = self.persist_registry() {
            warn!(%err, "on_session_started: failed to persist registry");
        }
        info!(label, "orchestrator: session started");
    }

    fn on_session_failed(&mut self, label: &str, detail: String) {
        warn!(label, %detail, "orchestrator: start_agent failed");
        if let Some(instance) = self.registry.instances.get_mut(label) {
            instance.set_state(InstanceState::Error, Some(detail.clone()));
        }
        self.diagnostics
            .append(&SinkRecord::new(label, "error", json!({ "detail": detail })))
            .ok();
    }

    fn begin_graceful_stop(&mut self, label: &str) -> Result<StopOutcome> {
        if !self.registry.label_exists(label) {
            return Err(AppError::NotFound(format!("unknown_instance: {label}")));
        }
        let Some(agent_id) = self.label_to_agent.get(label).cloned() else {
            return Ok(StopOutcome::AlreadyInactive);
        };
        let Some(rt) = self.sessions.get_mut(&agent_id) else {
            return Ok(StopOutcome::AlreadyInactive);
        };

        rt.session.transition(SessionState::ShuttingDown, None)?;
        rt.session.pending_acks = VecDeque::from(["stop".to_owned(), "flush".to_owned(), "shutdown".to_owned()]);
        if rt.cmd_tx.try_send(OutboundCommand::shutdown_sequence()).is_err() {
            warn!(agent_id, "begin_graceful_stop: command channel full or closed");
        }

        if let Some(instance) = self.registry.instances.get_mut(label) {
            instance.set_state(InstanceState::ShuttingDown, None);
        }

        let supervisor = self.supervisor;
        let pid = rt.pid;
        let graceful_timeout = Duration::from_secs_f64(self.config.operations.graceful_exit_timeout_s);
        let cancel = rt.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(graceful_timeout) => {
                    let _ = supervisor.signal_graceful(pid);
                    tokio::time::sleep(graceful_timeout).await;
                    let _ = supervisor.signal_forceful(pid);
                }
            }
        });

        Ok(StopOutcome::Stopping)
    }

    fn handle_session_event(&mut self, agent_id: &str, event: SessionEvent) {
        let Some(rt) = self.sessions.get_mut(agent_id) else {
            debug!(agent_id, "handle_session_event: no session runtime, dropping event");
            return;
        };
        let label = rt.label.clone();

        match event {
            SessionEvent::Summary { data } => {
                self.evidence.append(&SinkRecord::new(&label, "summary", data)).ok();
            }
            SessionEvent::Diagnostic { event, data } => {
                if event == "widget_frame" {
                    self.widget_cache.insert(agent_id.to_owned(), data.clone());
                }
                self.diagnostics.append(&SinkRecord::new(&label, event, data)).ok();
            }
            SessionEvent::Ack { cmd } => {
                if let Err(err) = rt.session.record_ack(&cmd) {
                    warn!(agent_id, %err, "handle_session_event: ack out of order");
                }
            }
            SessionEvent::HeartbeatReceived => {
                rt.session.last_heartbeat_at = Instant::now();
            }
            SessionEvent::Terminated { reason } => {
                debug!(agent_id, reason, "handle_session_event: reader observed stream close");
            }
            SessionEvent::ProtocolViolation { detail } => {
                warn!(agent_id, detail, "handle_session_event: protocol violation");
                let pid = rt.pid;
                let _ = rt.session.transition(SessionState::Errored, Some("protocol_violation".into()));
                let _ = self.supervisor.signal_forceful(pid);
                // monitor_exit won't emit `Exited` once its session is cancelled, so run
                // the same exit cleanup (remove session, mark instance errored, unregister
                // from the flush scheduler, schedule restart) inline rather than waiting
                // for it.
                self.on_session_exited(agent_id, None, format!("protocol_violation: {detail}"));
            }
        }
    }

    async fn handle_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::StderrLine { agent_id, line } => {
                if let Some(rt) = self.sessions.get(&agent_id) {
                    self.diagnostics
                        .append(&SinkRecord::new(&rt.label, "log", json!({ "stream": "stderr", "line": line })))
                        .ok();
                }
            }
            SupervisorEvent::Exited { agent_id, exit_code, reason } => {
                self.on_session_exited(&agent_id, exit_code, reason);
            }
        }
    }

    fn on_session_exited(&mut self, agent_id: &str, exit_code: Option<i32>, reason: String) {
        let Some(rt) = self.sessions.remove(agent_id) else {
            return;
        };
        self.label_to_agent.remove(&rt.label);
        self.flush_handle.unregister(agent_id);
        rt.cancel.cancel();

        let was_expected = matches!(rt.session.state, SessionState::ShuttingDown);
        info!(agent_id, label = %rt.label, exit_code, was_expected, "orchestrator: session exited");

        if was_expected {
            if let Some(instance) = self.registry.instances.get_mut(&rt.label) {
                instance.set_state(InstanceState::Inactive, None);
                instance.pid = None;
            }
            let _ = self.persist_registry();
            if self.pending_restart.remove(&rt.label) {
                self.spawn_agent(rt.label, None);
            }
            return;
        }

        if let Some(instance) = self.registry.instances.get_mut(&rt.label) {
            instance.set_state(InstanceState::Error, Some(reason.clone()));
            instance.pid = None;
        }
        let _ = self.persist_registry();
        self.diagnostics
            .append(&SinkRecord::new(&rt.label, "error", json!({ "detail": reason, "exit_code": exit_code })))
            .ok();

        self.schedule_restart(rt.label);
    }

    fn schedule_restart(&mut self, label: String) {
        let max_failures = self.config.operations.max_consecutive_restart_failures;
        let window = Duration::from_secs(self.config.operations.restart_failure_window_s);

        let state = self.restart_state.entry(label.clone()).or_default();
        let now = Instant::now();
        if state.window_start.is_none_or(|start| now.duration_since(start) > window) {
            state.window_start = Some(now);
            state.consecutive_failures = 0;
        }
        state.consecutive_failures += 1;

        if restart::budget_exhausted(state.consecutive_failures, max_failures) {
            warn!(label, "orchestrator: restart budget exhausted, sticking at error");
            self.diagnostics
                .append(&SinkRecord::new(&label, "error", json!({ "detail": "restart_budget_exhausted" })))
                .ok();
            return;
        }

        let attempt = state.consecutive_failures.saturating_sub(1);
        let delay_s = restart::next_backoff(attempt, &mut rand::thread_rng());
        let inbox_tx = self.inbox_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_secs_f64(delay_s)) => {
                    let _ = inbox_tx.send(OrchestratorMsg::RestartDue { label }).await;
                }
            }
        });
    }

    fn handle_schedule_event(&mut self, event: ScheduleEvent) {
        match event {
            ScheduleEvent::DispatchFlush { agent_id } => {
                let Some(rt) = self.sessions.get(&agent_id) else { return };
                let sent = rt.cmd_tx.try_send(OutboundCommand::bare(OutboundCmd::Flush)).is_ok();
                if let Some(event) = self.flush_handle.record_send_result(&agent_id, sent) {
                    self.handle_schedule_event(event);
                }
            }
            ScheduleEvent::BackpressureExhausted { agent_id } => {
                warn!(agent_id, "orchestrator: flush backpressure exhausted");
                if let Some(rt) = self.sessions.get(&agent_id) {
                    self.diagnostics
                        .append(&SinkRecord::new(&rt.label, "status", json!({ "detail": "backpressure_exhausted" })))
                        .ok();
                }
            }
        }
    }

    fn check_heartbeats(&mut self) {
        let miss_factor = self.config.operations.heartbeat_miss_factor;
        let mut stalled = Vec::new();

        for (agent_id, rt) in &self.sessions {
            if rt.session.state != SessionState::Running {
                continue;
            }
            let Some(instance) = self.registry.get(&rt.label) else { continue };
            let threshold = Duration::from_secs_f64(instance.config.heartbeat_interval_s * miss_factor);
            if rt.session.last_heartbeat_at.elapsed() > threshold {
                stalled.push(agent_id.clone());
            }
        }

        for agent_id in stalled {
            let Some(rt) = self.sessions.get_mut(&agent_id) else { continue };
            warn!(agent_id, label = %rt.label, "orchestrator: heartbeat lost");
            self.diagnostics
                .append(&SinkRecord::new(&rt.label, "error", json!({ "detail": "heartbeat_lost" })))
                .ok();
            let _ = rt.session.transition(SessionState::Errored, Some("heartbeat_lost".into()));
            let _ = self.supervisor.signal_forceful(rt.pid);
        }
    }

    async fn shutdown_all(&mut self) {
        let labels: Vec<String> = self.label_to_agent.keys().cloned().collect();
        for label in labels {
            let _ = self.begin_graceful_stop(&label);
        }
        tokio::time::sleep(Duration::from_secs_f64(self.config.operations.graceful_exit_timeout_s)).await;
    }
}

fn ipc_error_code(err: &AppError) -> &'static str {
    match err {
        AppError::NotFound(_) => ipc_codes::UNKNOWN_INSTANCE,
        AppError::InvalidStateTransition(_) => ipc_codes::INVALID_STATE_TRANSITION,
        AppError::LabelConflict(_) => ipc_codes::LABEL_CONFLICT,
        _ => ipc_codes::INTERNAL_ERROR,
    }
}

/// Result of a successfully started session, handed back to the
/// Orchestrator Core's task via [`OrchestratorMsg::SessionStarted`].
struct StartedSession {
    label: String,
    agent_id: String,
    pid: Option<u32>,
    cmd_tx: mpsc::Sender<OutboundCommand>,
    cancel: CancellationToken,
}

/// Spawn `instance`'s process, wait for its handshake, and — on success —
/// spawn its reader/writer/exit/stderr tasks. Runs detached from the
/// Orchestrator Core's own task so one slow or stuck handshake never blocks
/// another IPC request or session event from being processed.
async fn spawn_and_handshake(
    supervisor: AgentProcessSupervisor,
    instance: &AgentInstance,
    agent_id: &str,
    working_dir: &PathBuf,
    data_dir: &PathBuf,
    handshake_timeout: Duration,
    max_frame_bytes: usize,
    inbox_tx: mpsc::Sender<OrchestratorMsg>,
) -> std::result::Result<StartedSession, String> {
    let (conn, stderr) = supervisor
        .spawn(instance, agent_id, working_dir, data_dir)
        .map_err(|err| err.to_string())?;

    let AgentConnection { agent_id, mut child, pid, mut stdin, stdout } = conn;

    let (envelope, framed) = match wait_for_handshake(stdout, max_frame_bytes, handshake_timeout).await {
        Ok(result) => result,
        Err(err) => {
            let _ = supervisor.signal_forceful(pid);
            let _ = child.kill().await;
            return Err(err.to_string());
        }
    };

    if !version_compatible(ADVERTISED_PROTOCOL_VERSION, &envelope.protocol_version) {
        let reject = OutboundCommand::reject_handshake("protocol_version_mismatch");
        let _ = send_one(&mut stdin, reject).await;
        let _ = supervisor.signal_forceful(pid);
        let _ = child.kill().await;
        return Err("handshake_version_mismatch".to_owned());
    }

    let accept = OutboundCommand::accept_handshake(env!("CARGO_PKG_VERSION").to_owned(), ADVERTISED_PROTOCOL_VERSION.to_owned());
    if send_one(&mut stdin, accept).await.is_err() {
        let _ = supervisor.signal_forceful(pid);
        let _ = child.kill().await;
        return Err("handshake_ack_write_failed".to_owned());
    }

    let cancel = CancellationToken::new();
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (session_event_tx, mut session_event_rx) = mpsc::channel(256);
    let (supervisor_event_tx, mut supervisor_event_rx) = mpsc::channel(32);

    tokio::spawn(run_reader(agent_id.clone(), framed, session_event_tx, cancel.clone()));
    tokio::spawn(run_writer(agent_id.clone(), stdin, cmd_rx, cancel.clone()));
    let _ = monitor_exit(agent_id.clone(), child, supervisor_event_tx.clone(), cancel.clone());
    let _ = monitor_stderr(agent_id.clone(), stderr, supervisor_event_tx, cancel.clone());

    let forward_agent_id = agent_id.clone();
    let forward_tx = inbox_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = session_event_rx.recv().await {
            if forward_tx
                .send(OrchestratorMsg::Session { agent_id: forward_agent_id.clone(), event })
                .await
                .is_err()
            {
                break;
            }
        }
    });
    tokio::spawn(async move {
        while let Some(event) = supervisor_event_rx.recv().await {
            if inbox_tx.send(OrchestratorMsg::Supervisor(event)).await.is_err() {
                break;
            }
        }
    });

    Ok(StartedSession { label: instance.label.clone(), agent_id, pid, cmd_tx, cancel })
}

async fn send_one(stdin: &mut tokio::process::ChildStdin, cmd: OutboundCommand) -> Result<()> {
    use futures_util::SinkExt;
    use tokio_util::codec::FramedWrite;
    let mut framed = FramedWrite::new(stdin, crate::jlp::codec::JlpCodec::new());
    framed.send(cmd.to_line()?).await
}

/// Spawn the forwarding task that lets the IPC server hand requests to this
/// orchestrator without knowing about [`OrchestratorMsg`].
#[must_use]
pub fn spawn_ipc_bridge(inbox_tx: mpsc::Sender<OrchestratorMsg>) -> (OrchestratorTx, tokio::task::JoinHandle<()>) {
    let (bridge_tx, mut bridge_rx) = mpsc::channel(256);
    let handle = tokio::spawn(async move {
        while let Some((request, reply_tx)) = bridge_rx.recv().await {
            if inbox_tx.send(OrchestratorMsg::Ipc(request, reply_tx)).await.is_err() {
                break;
            }
        }
    });
    (bridge_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ExtensionAllowlistValidator;
    use tempfile::tempdir;

    fn sample_config(data_dir: PathBuf) -> GlobalConfig {
        let raw = format!(
            r#"
            [operations]
            data_dir = "{}"
            "#,
            data_dir.display()
        );
        GlobalConfig::from_toml_str(&raw).unwrap()
    }

    fn new_orchestrator() -> (Orchestrator, mpsc::Receiver<OrchestratorMsg>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = sample_config(dir.path().to_path_buf());
        let (orchestrator, rx) = Orchestrator::new(
            config,
            Box::new(ExtensionAllowlistValidator::default()),
            CancellationToken::new(),
        )
        .unwrap();
        (orchestrator, rx, dir)
    }

    #[tokio::test]
    async fn ping_reports_pong() {
        let (orchestrator, _rx, _dir) = new_orchestrator();
        let response = orchestrator.handle_ping();
        assert!(response.ok);
        assert_eq!(response.data.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn add_agent_instance_then_conflict_is_rejected() {
        let (mut orchestrator, _rx, _dir) = new_orchestrator();
        let request: IpcRequest = serde_json::from_str(
            r#"{"cmd":"add_agent_instance","request_id":"r1","label":"fw","executable":"folderwatch","heartbeat_interval_s":15.0,"agent_flush_interval_s":60.0}"#,
        )
        .unwrap();
        let response = orchestrator.handle_add_agent_instance(&request);
        assert!(response.ok);
        assert!(orchestrator.registry.label_exists("fw"));

        let conflict = orchestrator.handle_add_agent_instance(&request);
        assert!(!conflict.ok);
        assert_eq!(conflict.error.as_deref(), Some(ipc_codes::LABEL_CONFLICT));
    }

    #[tokio::test]
    async fn control_orchestrator_rejects_unmanaged_action() {
        let (mut orchestrator, _rx, _dir) = new_orchestrator();
        let request: IpcRequest =
            serde_json::from_str(r#"{"cmd":"control_orchestrator","request_id":"r1","action":"rescan_plugins"}"#)
                .unwrap();
        let response = orchestrator.handle_control_orchestrator(&request);
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some(ipc_codes::OPERATIONS_NOT_MANAGED));
    }

    #[tokio::test]
    async fn stop_agent_on_unknown_instance_is_unknown_instance() {
        let (mut orchestrator, _rx, _dir) = new_orchestrator();
        let request: IpcRequest =
            serde_json::from_str(r#"{"cmd":"stop_agent","request_id":"r1","label":"nope"}"#).unwrap();
        let response = orchestrator.handle_stop_agent(&request);
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some(ipc_codes::UNKNOWN_INSTANCE));
    }
}
