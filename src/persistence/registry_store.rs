//! JSON-backed registry snapshot persistence.
//!
//! Ensures the parent directory exists, then performs a plain read/write
//! of the whole snapshot. Config is otherwise read-only at runtime;
//! `update_monitor_settings` is the one path that performs a
//! read-modify-write, and does so under an advisory file lock so a
//! concurrent IPC connection cannot race it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::registry::RegistrySnapshot;
use crate::{AppError, Result};

/// Reads and writes the registry snapshot file at a fixed path.
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Construct a store for the snapshot at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the snapshot, or an empty default if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on read failure or [`AppError::Config`] if
    /// the file contains invalid JSON.
    pub fn load(&self) -> Result<RegistrySnapshot> {
        if !self.path.exists() {
            return Ok(RegistrySnapshot::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw)
            .map_err(|err| AppError::Config(format!("invalid registry snapshot: {err}")))
    }

    /// Atomically replace the snapshot file: write to a temp file in the
    /// same directory, then rename over the target, so a crash mid-write
    /// never leaves a truncated `registry.json`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on any filesystem failure.
    pub fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| AppError::Io(format!("failed to serialize registry: {err}")))?;
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&body)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Perform a locked read-modify-write of the snapshot, used by
    /// `update_monitor_settings` so concurrent IPC connections cannot
    /// interleave writes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the lock cannot be acquired, or any
    /// error `mutate` returns.
    pub fn with_lock<F>(&self, mutate: F) -> Result<RegistrySnapshot>
    where
        F: FnOnce(&mut RegistrySnapshot) -> Result<()>,
    {
        let lock_path = self.path.with_extension("json.lock");
        let _lock = acquire_exclusive(&lock_path)?;

        let mut snapshot = self.load()?;
        mutate(&mut snapshot)?;
        self.save(&snapshot)?;
        Ok(snapshot)
    }
}

/// RAII guard removing the lock file on drop.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_exclusive(lock_path: &Path) -> Result<LockGuard> {
    OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(lock_path)
        .map_err(|err| AppError::Io(format!("failed to acquire registry lock: {err}")))?;
    Ok(LockGuard {
        path: lock_path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentInstance, InstanceConfig};
    use tempfile::tempdir;

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
    fn missing_file_loads_as_empty_default() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));
        let snapshot = store.load().unwrap();
        assert!(snapshot.instances.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));

        let mut snapshot = RegistrySnapshot::default();
        let instance = AgentInstance::new("fw".into(), "folderwatch".into(), sample_config());
        snapshot.instances.insert(instance.label.clone(), instance);
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.label_exists("fw"));
    }

    #[test]
    fn locked_mutation_persists() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));

        store
            .with_lock(|snapshot| {
                let instance = AgentInstance::new("fw".into(), "folderwatch".into(), sample_config());
                snapshot.instances.insert(instance.label.clone(), instance);
                Ok(())
            })
            .unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.label_exists("fw"));
    }
}
