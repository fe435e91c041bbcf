#![forbid(unsafe_code)]

//! `mimoloctl` — local CLI companion for `mimolo-operations`.
//!
//! Connects to the Control IPC socket and sends a single JSON request per
//! invocation, printing the response's `data` (or `error`) to stdout/stderr.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "mimoloctl",
    about = "Local CLI for the MiMoLo Orchestrator Core",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `operations.ipc_name` config).
    #[arg(long, default_value = "mimolo-operations")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the orchestrator is alive.
    Ping,
    /// List installed agent templates.
    ListTemplates,
    /// List configured agent instances.
    ListInstances,
    /// Show the current lifecycle state of every instance.
    States,
    /// Start an agent instance.
    Start {
        /// Instance label.
        label: String,
    },
    /// Gracefully stop an agent instance.
    Stop {
        /// Instance label.
        label: String,
    },
    /// Restart an agent instance.
    Restart {
        /// Instance label.
        label: String,
    },
    /// Register a new agent instance from a template.
    Add {
        /// Template id the new instance is derived from.
        template_id: String,
        /// Label for the new instance.
        label: String,
        /// Executable path or command name.
        executable: String,
    },
    /// Remove a configured instance.
    Remove {
        /// Instance label.
        label: String,
    },
    /// Read current monitor settings.
    SettingsGet,
    /// Update a single monitor setting.
    SettingsSet {
        /// Setting key (`poll_tick_s`, `cooldown_seconds`, `console_verbosity`).
        key: String,
        /// New value.
        value: String,
    },
    /// Request the orchestrator to shut down.
    Shutdown,
}

fn main() {
    let args = Cli::parse();
    let request_id = Uuid::new_v4().to_string();

    let request = match build_request(&args.command, &request_id) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("invalid arguments: {err}");
            std::process::exit(2);
        }
    };

    match send_ipc_command(&args.ipc_name, &request) {
        Ok(response) => print_response(&response),
        Err(err) => {
            eprintln!("failed to connect to server: {err}");
            eprintln!("is mimolo-operations running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

fn build_request(command: &Command, request_id: &str) -> Result<Value, String> {
    let (cmd, args) = match command {
        Command::Ping => ("ping", json!({})),
        Command::ListTemplates => ("list_agent_templates", json!({})),
        Command::ListInstances => ("get_agent_instances", json!({})),
        Command::States => ("get_agent_states", json!({})),
        Command::Start { label } => ("start_agent", json!({ "label": label })),
        Command::Stop { label } => ("stop_agent", json!({ "label": label })),
        Command::Restart { label } => ("restart_agent", json!({ "label": label })),
        Command::Add {
            template_id,
            label,
            executable,
        } => (
            "add_agent_instance",
            json!({
                "template_id": template_id,
                "label": label,
                "executable": executable,
            }),
        ),
        Command::Remove { label } => ("remove_agent_instance", json!({ "label": label })),
        Command::SettingsGet => ("get_monitor_settings", json!({})),
        Command::SettingsSet { key, value } => {
            ("update_monitor_settings", json!({ key.clone(): value }))
        }
        Command::Shutdown => ("control_orchestrator", json!({ "action": "shutdown" })),
    };

    let mut request = json!({ "cmd": cmd, "request_id": request_id });
    if let Value::Object(extra) = args {
        let Value::Object(ref mut fields) = request else {
            return Err("internal request builder error".to_owned());
        };
        fields.extend(extra);
    }
    Ok(request)
}

fn print_response(response: &Value) {
    let Some(obj) = response.as_object() else {
        println!("{response}");
        return;
    };

    let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if ok {
        if let Some(data) = obj.get("data") {
            println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
        } else {
            println!("OK");
        }
    } else {
        let err_msg = obj
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        eprintln!("error: {err_msg}");
        std::process::exit(1);
    }
}

/// Connect to the IPC socket, send one JSON request line, and read the
/// single-line JSON response.
fn send_ipc_command(ipc_name: &str, request: &Value) -> std::result::Result<Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
