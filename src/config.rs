//! Runtime configuration parsing and validation.
//!
//! Recognized per-instance keys live on [`crate::registry::InstanceConfig`];
//! this module covers the top-level `[operations]` timers and the
//! `[plugins.<label>]` tables that seed the initial registry.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::registry::InstanceConfig;
use crate::{AppError, Result};

/// Core operations timers and paths (the `[operations]` table).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct OperationsConfig {
    /// Root directory for logs, registry cache, and per-agent artifacts.
    pub data_dir: PathBuf,
    /// Local IPC socket / named pipe identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Default handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout_s")]
    pub handshake_timeout_s: f64,
    /// Default graceful-exit timeout after a shutdown sequence, in seconds.
    #[serde(default = "default_graceful_exit_timeout_s")]
    pub graceful_exit_timeout_s: f64,
    /// Heartbeat-miss multiplier: an agent is considered stalled after
    /// `heartbeat_interval_s * heartbeat_miss_factor` seconds of silence.
    #[serde(default = "default_heartbeat_miss_factor")]
    pub heartbeat_miss_factor: f64,
    /// Global flush-scheduler tick cadence, in milliseconds.
    #[serde(default = "default_flush_tick_ms")]
    pub flush_tick_ms: u64,
    /// Backoff applied to a session after a `stdin_full` send failure, in seconds.
    #[serde(default = "default_flush_backoff_s")]
    pub flush_backoff_s: f64,
    /// Maximum JLP line size accepted on the wire, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Maximum consecutive restart failures before an instance sticks at `error`.
    #[serde(default = "default_max_consecutive_restart_failures")]
    pub max_consecutive_restart_failures: u32,
    /// Rolling window, in seconds, over which restart failures are counted.
    #[serde(default = "default_restart_failure_window_s")]
    pub restart_failure_window_s: u64,
    /// Per-IPC-request server-side deadline, in seconds.
    #[serde(default = "default_ipc_request_timeout_s")]
    pub ipc_request_timeout_s: f64,
    /// Per-connection IPC write buffer cap, in bytes.
    #[serde(default = "default_ipc_write_buffer_bytes")]
    pub ipc_write_buffer_bytes: usize,
    /// Drain window for in-flight IPC connections during shutdown, in seconds.
    #[serde(default = "default_ipc_shutdown_drain_s")]
    pub ipc_shutdown_drain_s: f64,
    /// Evidence/diagnostics log rotation threshold, in bytes.
    #[serde(default = "default_rotate_bytes")]
    pub rotate_bytes: u64,
    /// Number of historical rotated files retained per sink.
    #[serde(default = "default_rotate_keep")]
    pub rotate_keep: u32,
    /// Whether evidence-plane writes are `fsync`ed (default true; canonical plane).
    #[serde(default = "default_fsync_on_summary")]
    pub fsync_on_summary: bool,
    /// Monitor/console settings, mutable at runtime via `update_monitor_settings`.
    #[serde(default)]
    pub monitor: MonitorSettings,
}

fn default_ipc_name() -> String {
    "mimolo-operations".to_owned()
}
fn default_handshake_timeout_s() -> f64 {
    5.0
}
fn default_graceful_exit_timeout_s() -> f64 {
    5.0
}
fn default_heartbeat_miss_factor() -> f64 {
    3.0
}
fn default_flush_tick_ms() -> u64 {
    100
}
fn default_flush_backoff_s() -> f64 {
    1.0
}
fn default_max_frame_bytes() -> usize {
    262_144
}
fn default_max_consecutive_restart_failures() -> u32 {
    5
}
fn default_restart_failure_window_s() -> u64 {
    300
}
fn default_ipc_request_timeout_s() -> f64 {
    1.5
}
fn default_ipc_write_buffer_bytes() -> usize {
    1024 * 1024
}
fn default_ipc_shutdown_drain_s() -> f64 {
    1.0
}
fn default_rotate_bytes() -> u64 {
    16 * 1024 * 1024
}
fn default_rotate_keep() -> u32 {
    5
}
fn default_fsync_on_summary() -> bool {
    true
}

/// Recognized monitor settings, mutable via `update_monitor_settings`.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorSettings {
    /// Poll tick interval used by Control-facing status polling, in seconds.
    #[serde(default = "default_poll_tick_s")]
    pub poll_tick_s: f64,
    /// Cooldown seconds applied between successive Control-initiated actions.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u32,
    /// Console log verbosity.
    #[serde(default)]
    pub console_verbosity: ConsoleVerbosity,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_tick_s: default_poll_tick_s(),
            cooldown_seconds: default_cooldown_seconds(),
            console_verbosity: ConsoleVerbosity::default(),
        }
    }
}

fn default_poll_tick_s() -> f64 {
    1.0
}
fn default_cooldown_seconds() -> u32 {
    5
}

/// Console log verbosity accepted by `update_monitor_settings`.
#[derive(Debug, Clone, Copy, Default, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleVerbosity {
    /// Verbose diagnostic output.
    Debug,
    /// Normal operational output (default).
    #[default]
    Info,
    /// Only warnings and above.
    Warning,
    /// Only errors.
    Error,
}

impl ConsoleVerbosity {
    /// Parse from the wire string used by `update_monitor_settings`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `s` does not match a known level.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(AppError::Config(format!(
                "invalid console_verbosity: {other}"
            ))),
        }
    }
}

/// Top-level runtime configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// Core timers, paths, and monitor settings.
    pub operations: OperationsConfig,
    /// Initial plugin instance tables, keyed by label.
    #[serde(default, rename = "plugins")]
    pub plugins: HashMap<String, InstanceConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|err| {
            AppError::Config(format!(
                "failed to read config '{}': {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Evidence log path.
    #[must_use]
    pub fn evidence_log_path(&self) -> PathBuf {
        self.operations
            .data_dir
            .join("operations")
            .join("logs")
            .join("evidence.jsonl")
    }

    /// Diagnostics log path.
    #[must_use]
    pub fn diagnostics_log_path(&self) -> PathBuf {
        self.operations
            .data_dir
            .join("operations")
            .join("logs")
            .join("diagnostics.jsonl")
    }

    /// Registry cache snapshot path.
    #[must_use]
    pub fn registry_cache_path(&self) -> PathBuf {
        self.operations
            .data_dir
            .join("operations")
            .join("registry.json")
    }

    /// Per-agent artifact root for a given plugin/instance pair.
    #[must_use]
    pub fn agent_artifact_root(&self, plugin_id: &str, instance_id: &str) -> PathBuf {
        self.operations
            .data_dir
            .join("agents")
            .join(plugin_id)
            .join(instance_id)
    }

    /// Bootstrap lock directory used to serialize first-run hydration.
    #[must_use]
    pub fn bootstrap_lock_path(&self) -> PathBuf {
        self.operations.data_dir.join(".bootstrap.lock")
    }

    /// Portable interpreter/toolchain root.
    #[must_use]
    pub fn runtime_root(&self) -> PathBuf {
        self.operations.data_dir.join("runtime")
    }

    fn validate(&self) -> Result<()> {
        if self.operations.ipc_name.is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }
        if self.operations.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "max_frame_bytes must be greater than zero".into(),
            ));
        }
        for (label, cfg) in &self.plugins {
            if cfg.heartbeat_interval_s <= 0.0 {
                return Err(AppError::Config(format!(
                    "plugins.{label}.heartbeat_interval_s must be > 0"
                )));
            }
            if cfg.agent_flush_interval_s <= 0.0 {
                return Err(AppError::Config(format!(
                    "plugins.{label}.agent_flush_interval_s must be > 0"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TOML: &str = r#"
        [operations]
        data_dir = "/tmp/mimolo-data"

        [plugins.folderwatch]
        executable = "folderwatch"
        heartbeat_interval_s = 15.0
        agent_flush_interval_s = 60.0
    "#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = GlobalConfig::from_toml_str(SAMPLE_TOML).expect("parses");
        assert_eq!(config.operations.ipc_name, "mimolo-operations");
        assert_eq!(config.operations.max_frame_bytes, 262_144);
        assert_eq!(config.operations.rotate_keep, 5);
        assert!(config.plugins.contains_key("folderwatch"));
    }

    #[test]
    fn rejects_non_positive_heartbeat_interval() {
        let bad = r#"
            [operations]
            data_dir = "/tmp/mimolo-data"

            [plugins.folderwatch]
            executable = "folderwatch"
            heartbeat_interval_s = 0.0
            agent_flush_interval_s = 60.0
        "#;
        let err = GlobalConfig::from_toml_str(bad).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn console_verbosity_parses_known_levels() {
        assert_eq!(
            ConsoleVerbosity::parse("debug").unwrap(),
            ConsoleVerbosity::Debug
        );
        assert!(ConsoleVerbosity::parse("bogus").is_err());
    }
}
