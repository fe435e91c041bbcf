#![forbid(unsafe_code)]

//! `mimolo-operations` — Orchestrator Core server binary.
//!
//! Loads configuration, runs bootstrap, starts the Orchestrator Core event
//! loop and the Control IPC server, and drives the shutdown sequence on
//! `SIGINT`/`SIGTERM`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mimolo_operations::config::GlobalConfig;
use mimolo_operations::ipc::{spawn_ipc_server, IpcServerConfig};
use mimolo_operations::orchestrator::{spawn_ipc_bridge, Orchestrator};
use mimolo_operations::policy::ExtensionAllowlistValidator;
use mimolo_operations::{bootstrap, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mimolo-operations", about = "MiMoLo Orchestrator Core", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `config.toml` in the current working directory, which is
    /// the expected layout for a portable installation (binary + config.toml
    /// in the same folder).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override `operations.data_dir` from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Exit code for an invalid CLI invocation or configuration error.
const EXIT_INVALID_CONFIG: u8 = 2;
/// Exit code when bootstrap fails.
const EXIT_BOOTSTRAP_FAILURE: u8 = 3;
/// Exit code when the IPC listener cannot be bound.
const EXIT_IPC_BIND_FAILURE: u8 = 4;
/// Exit code for any other unspecified fatal error.
const EXIT_UNSPECIFIED: u8 = 1;

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::from(EXIT_UNSPECIFIED);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::from(EXIT_UNSPECIFIED);
        }
    };

    runtime.block_on(run(args))
}

async fn run(args: Cli) -> ExitCode {
    info!("mimolo-operations bootstrap");

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration error");
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    if let Err(err) = bootstrap::run(&mut config) {
        error!(%err, "bootstrap failed");
        return ExitCode::from(EXIT_BOOTSTRAP_FAILURE);
    }
    info!("bootstrap complete");

    let cancel = CancellationToken::new();
    let validator: Box<dyn mimolo_operations::policy::PluginValidator> =
        Box::new(ExtensionAllowlistValidator::default());

    let (orchestrator, inbox_rx) = match Orchestrator::new(config.clone(), validator, cancel.clone())
    {
        Ok(pair) => pair,
        Err(err) => {
            error!(%err, "failed to construct orchestrator");
            return ExitCode::from(EXIT_BOOTSTRAP_FAILURE);
        }
    };

    let (orchestrator_tx, bridge_handle) = spawn_ipc_bridge(orchestrator.inbox());

    let ipc_config = IpcServerConfig {
        ipc_name: config.operations.ipc_name.clone(),
        request_timeout: Duration::from_secs_f64(config.operations.ipc_request_timeout_s),
        write_buffer_bytes: config.operations.ipc_write_buffer_bytes,
        shutdown_drain: Duration::from_secs_f64(config.operations.ipc_shutdown_drain_s),
    };

    let ipc_handle = match spawn_ipc_server(ipc_config, orchestrator_tx, cancel.clone()) {
        Ok(handle) => handle,
        Err(err) => {
            error!(%err, "failed to bind ipc listener");
            cancel.cancel();
            return ExitCode::from(EXIT_IPC_BIND_FAILURE);
        }
    };

    let instance_count = config.plugins.len();
    let orchestrator_handle = tokio::spawn(orchestrator.run(inbox_rx));

    info!(
        ipc_name = %config.operations.ipc_name,
        instance_count,
        "mimolo-operations ready"
    );

    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");
    cancel.cancel();

    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(EXIT_UNSPECIFIED.into());
    });

    let _ = orchestrator_handle.await;
    ipc_handle.abort();
    bridge_handle.abort();

    info!("mimolo-operations shut down");
    ExitCode::SUCCESS
}

fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(ref data_dir) = args.data_dir {
        config.operations.data_dir = data_dir.clone();
    }
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
