//! Instance registry: agent templates, agent instances, and the derived
//! runtime state the Orchestrator Core and Control IPC Server share.
//!
//! The registry is owned exclusively by the Orchestrator Core's event
//! loop (single-writer discipline); this module only defines the data
//! shapes and pure helpers, never background tasks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MonitorSettings;

/// Immutable descriptor for a discoverable agent type, loaded from the
/// plugin store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentTemplate {
    /// Unique identifier for this template.
    pub template_id: String,
    /// Executable path or module entry launched for instances of this template.
    pub script: String,
    /// Default configuration values applied when an instance omits a key.
    #[serde(default)]
    pub default_config: HashMap<String, serde_json::Value>,
}

/// Coarse, IPC-visible lifecycle state of a configured instance.
///
/// Distinct from [`crate::session::SessionState`], which tracks the
/// finer-grained handshake/running/shutdown machinery of a live session.
/// This is the state Control observes via `get_agent_states`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// No session is running for this instance.
    Inactive,
    /// A session is running and past handshake.
    Running,
    /// A session is draining its shutdown sequence.
    ShuttingDown,
    /// The instance's last session ended in error; see `detail`.
    Error,
}

/// A configured, addressable runtime entity derived from one template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInstance {
    /// Unique label for this instance (case-sensitive, unique process-wide).
    pub label: String,
    /// Template this instance was derived from.
    pub template_id: String,
    /// Recognized per-instance configuration.
    pub config: InstanceConfig,
    /// Current coarse lifecycle state.
    pub state: InstanceState,
    /// Short human-readable reason for the current state.
    pub detail: Option<String>,
    /// OS process id of the running child, if any.
    pub pid: Option<u32>,
    /// Timestamp this instance record was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp this instance record was last mutated.
    pub updated_at: DateTime<Utc>,
}

/// Recognized per-instance configuration keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceConfig {
    /// Whether the instance should be spawned at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Executable path or command name.
    pub executable: String,
    /// Arguments passed to `executable`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds between expected heartbeats.
    pub heartbeat_interval_s: f64,
    /// Seconds between `flush` dispatches.
    pub agent_flush_interval_s: f64,
    /// Whether Control should launch this instance in a separate terminal window.
    #[serde(default)]
    pub launch_in_separate_terminal: bool,
    /// Optional CPU budget; telemetry-only in this phase.
    #[serde(default)]
    pub cpu_budget_percent: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl AgentInstance {
    /// Construct a new, inactive instance record.
    #[must_use]
    pub fn new(label: String, template_id: String, config: InstanceConfig) -> Self {
        let now = Utc::now();
        Self {
            label,
            template_id,
            config,
            state: InstanceState::Inactive,
            detail: None,
            pid: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition this instance to a new coarse state with an optional detail string.
    pub fn set_state(&mut self, state: InstanceState, detail: Option<String>) {
        self.state = state;
        self.detail = detail;
        self.updated_at = Utc::now();
    }
}

/// Snapshot of the full registry, suitable for IPC publication or
/// persistence to `registry.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistrySnapshot {
    /// All known templates, keyed by `template_id`.
    pub templates: HashMap<String, AgentTemplate>,
    /// All configured instances, keyed by `label`.
    pub instances: HashMap<String, AgentInstance>,
    /// Current monitor settings, mutable via `update_monitor_settings`
    ///; persisted here since config.toml itself stays read-only
    /// at runtime.
    #[serde(default)]
    pub monitor: MonitorSettings,
}

impl RegistrySnapshot {
    /// Look up an instance by label.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&AgentInstance> {
        self.instances.get(label)
    }

    /// Whether `label` is already taken by an existing instance.
    #[must_use]
    pub fn label_exists(&self, label: &str) -> bool {
        self.instances.contains_key(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> InstanceConfig {
        InstanceConfig {
            enabled: true,
            executable: "folderwatch".into(),
            args: vec![],
            heartbeat_interval_s: 15.0,
            agent_flush_interval_s: 60.0,
            launch_in_separate_terminal: false,
            cpu_budget_percent: None,
        }
    }

    #[test]
    fn new_instance_starts_inactive() {
        let instance = AgentInstance::new("folderwatch".into(), "folderwatch".into(), sample_config());
        assert_eq!(instance.state, InstanceState::Inactive);
        assert!(instance.pid.is_none());
    }

    #[test]
    fn add_then_remove_leaves_registry_unchanged() {
        let mut snapshot = RegistrySnapshot::default();
        let before = snapshot.clone();

        let instance = AgentInstance::new("folderwatch".into(), "folderwatch".into(), sample_config());
        snapshot
            .instances
            .insert(instance.label.clone(), instance.clone());
        assert!(snapshot.label_exists("folderwatch"));

        snapshot.instances.remove(&instance.label);
        assert_eq!(snapshot.instances, before.instances);
        assert_eq!(snapshot.templates, before.templates);
    }

    #[test]
    fn set_state_updates_detail_and_timestamp() {
        let mut instance = AgentInstance::new("fw".into(), "folderwatch".into(), sample_config());
        let before = instance.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        instance.set_state(InstanceState::Error, Some("heartbeat_lost".into()));
        assert_eq!(instance.state, InstanceState::Error);
        assert_eq!(instance.detail.as_deref(), Some("heartbeat_lost"));
        assert!(instance.updated_at >= before);
    }
}
