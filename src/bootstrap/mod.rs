//! Runtime Bootstrap Coordinator.
//!
//! Runs once before the first instance is spawned: hydrates the portable
//! interpreter/toolchain root and seeds per-agent artifact directories.
//! Serialized across process launches via an on-disk advisory lock
//! (an `O_EXCL`-created marker directory), since the coordination must
//! survive across process boundaries, not just threads. Cannot be
//! cancelled mid-step: it runs to completion or fails atomically.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Executable names recognized as developer tooling wrappers rather than
/// the agent's own entry point, e.g. `poetry run python agent.py`.
const DEV_TOOLING_EXECUTABLES: &[&str] = &["poetry", "pipenv", "python", "python3", "node", "npm", "npx"];

/// Path to the portable interpreter binary under the runtime root.
fn portable_interpreter_path(config: &GlobalConfig) -> PathBuf {
    config.runtime_root().join(if cfg!(windows) { "python.exe" } else { "python" })
}

/// Rewrite instance `executable` fields that point at developer tooling
/// to the portable interpreter path, so a launch doesn't depend on a
/// dev machine's `PATH`.
fn rewrite_dev_tooling_executables(config: &mut GlobalConfig) {
    let interpreter = portable_interpreter_path(config);
    for (label, instance) in &mut config.plugins {
        if !DEV_TOOLING_EXECUTABLES.contains(&instance.executable.as_str()) {
            continue;
        }
        info!(
            label,
            from = instance.executable.as_str(),
            to = %interpreter.display(),
            "bootstrap: rewriting dev-tooling executable to portable interpreter"
        );
        // Drop a leading wrapper subcommand (`poetry run ...`) and a duplicated
        // interpreter name (`python script.py` -> `script.py`) ahead of the script path.
        if matches!(instance.args.first().map(String::as_str), Some("run")) {
            instance.args.remove(0);
        }
        if matches!(instance.args.first().map(String::as_str), Some("python" | "python3")) {
            instance.args.remove(0);
        }
        instance.executable = interpreter.display().to_string();
    }
}

/// RAII guard for the bootstrap lock directory; removed on drop so a
/// clean exit always releases it, even on error paths using `?`.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir(&self.path);
    }
}

fn acquire_lock(lock_path: &Path) -> Result<LockGuard> {
    fs::create_dir(lock_path).map_err(|err| {
        AppError::Bootstrap(format!(
            "failed to acquire bootstrap lock at {}: {err} (another instance may be starting)",
            lock_path.display()
        ))
    })?;
    Ok(LockGuard {
        path: lock_path.to_path_buf(),
    })
}

/// Run the bootstrap sequence: acquire the lock, create the data
/// directory tree, hydrate the runtime root, seed per-agent artifact
/// roots for every configured instance, then release the lock.
///
/// # Errors
///
/// Returns [`AppError::Bootstrap`] if the lock cannot be acquired or any
/// step fails; bootstrap is all-or-nothing.
pub fn run(config: &mut GlobalConfig) -> Result<()> {
    let lock_path = config.bootstrap_lock_path();
    let _lock = acquire_lock(&lock_path)?;

    info!(stage = "creating_directories", "bootstrap: starting");
    fs::create_dir_all(&config.operations.data_dir)
        .map_err(|err| AppError::Bootstrap(format!("failed to create data_dir: {err}")))?;
    fs::create_dir_all(config.evidence_log_path().parent().unwrap_or(Path::new(".")))
        .map_err(|err| AppError::Bootstrap(format!("failed to create log directory: {err}")))?;

    info!(stage = "hydrating_runtime", "bootstrap: preparing runtime root");
    fs::create_dir_all(config.runtime_root())
        .map_err(|err| AppError::Bootstrap(format!("failed to create runtime root: {err}")))?;

    info!(stage = "rewriting_executables", "bootstrap: rewriting dev-tooling executables");
    rewrite_dev_tooling_executables(config);

    info!(stage = "seeding_config", "bootstrap: seeding per-instance artifact roots");
    for (label, instance) in &config.plugins {
        let root = config.agent_artifact_root(&instance_template_id(label), label);
        fs::create_dir_all(root.join("artifacts"))
            .map_err(|err| AppError::Bootstrap(format!("failed to seed artifacts dir: {err}")))?;
        fs::create_dir_all(root.join("index"))
            .map_err(|err| AppError::Bootstrap(format!("failed to seed index dir: {err}")))?;
        fs::create_dir_all(root.join("archives"))
            .map_err(|err| AppError::Bootstrap(format!("failed to seed archives dir: {err}")))?;
    }

    info!(stage = "ready", "bootstrap: complete");
    Ok(())
}

/// Until templates are loaded from a real plugin store, an instance's
/// template id defaults to its own label (config-seeded instances are
/// 1:1 with templates in this phase).
fn instance_template_id(label: &str) -> String {
    label.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
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

    #[test]
    fn bootstrap_creates_expected_directory_tree() {
        let dir = tempdir().unwrap();
        let mut config = sample_config(dir.path().to_path_buf());
        run(&mut config).unwrap();

        assert!(config.runtime_root().exists());
        assert!(config.evidence_log_path().parent().unwrap().exists());
        assert!(!config.bootstrap_lock_path().exists());
    }

    #[test]
    fn concurrent_bootstrap_is_rejected_while_locked() {
        let dir = tempdir().unwrap();
        let mut config = sample_config(dir.path().to_path_buf());
        let _held = acquire_lock(&config.bootstrap_lock_path()).unwrap();

        let err = run(&mut config).unwrap_err();
        assert!(matches!(err, AppError::Bootstrap(_)));
    }

    #[test]
    fn rewrites_dev_tooling_executable_to_portable_interpreter() {
        let dir = tempdir().unwrap();
        let raw = format!(
            r#"
            [operations]
            data_dir = "{}"

            [plugins.folderwatch]
            executable = "poetry"
            args = ["run", "python", "agent.py", "--watch"]
            heartbeat_interval_s = 5.0
            agent_flush_interval_s = 10.0
            "#,
            dir.path().display()
        );
        let mut config = GlobalConfig::from_toml_str(&raw).unwrap();
        run(&mut config).unwrap();

        let instance = &config.plugins["folderwatch"];
        assert_eq!(instance.executable, portable_interpreter_path(&config).display().to_string());
        assert_eq!(instance.args, vec!["agent.py".to_owned(), "--watch".to_owned()]);
    }
}
