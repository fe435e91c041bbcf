//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering every domain failure mode in
/// the orchestrator's taxonomy (configuration, protocol, lifecycle,
/// IPC, sinks, bootstrap).
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// JLP framing or envelope-validation failure.
    Jlp(String),
    /// Handshake failure (timeout, version mismatch, missing capabilities).
    Handshake(String),
    /// Lifecycle failure (spawn, unexpected exit, heartbeat loss).
    Lifecycle(String),
    /// Flow-control failure (stdin backpressure, IPC queue overload).
    FlowControl(String),
    /// Evidence/diagnostics sink write or rotation failure.
    Sink(String),
    /// Control IPC transport or protocol failure.
    Ipc(String),
    /// Runtime bootstrap failure.
    Bootstrap(String),
    /// Requested entity (instance, template, session) does not exist.
    NotFound(String),
    /// Requested label is already in use by another instance.
    LabelConflict(String),
    /// Requested state transition is not permitted from the current state.
    InvalidStateTransition(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Jlp(msg) => write!(f, "jlp: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Lifecycle(msg) => write!(f, "lifecycle: {msg}"),
            Self::FlowControl(msg) => write!(f, "flow control: {msg}"),
            Self::Sink(msg) => write!(f, "sink: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Bootstrap(msg) => write!(f, "bootstrap: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::LabelConflict(msg) => write!(f, "label conflict: {msg}"),
            Self::InvalidStateTransition(msg) => write!(f, "invalid state transition: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Canonical IPC error codes returned in [`crate::ipc::protocol::IpcResponse::error`].
///
/// These are the strings clients match against; keep them stable.
pub mod ipc_codes {
    /// Request body was not valid JSON.
    pub const INVALID_JSON: &str = "invalid_json";
    /// `cmd` field was missing or unrecognized.
    pub const INVALID_CMD: &str = "invalid_cmd";
    /// A required field was absent; format as `missing_field:<name>`.
    pub const MISSING_FIELD_PREFIX: &str = "missing_field";
    /// Referenced instance label does not exist.
    pub const UNKNOWN_INSTANCE: &str = "unknown_instance";
    /// Requested label already exists.
    pub const LABEL_CONFLICT: &str = "label_conflict";
    /// Requested lifecycle transition is not valid from the current state.
    pub const INVALID_STATE_TRANSITION: &str = "invalid_state_transition";
    /// `control_orchestrator` targets a facility the core does not manage.
    pub const OPERATIONS_NOT_MANAGED: &str = "operations_not_managed";
    /// Per-connection IPC write buffer overflowed.
    pub const IPC_QUEUE_OVERLOADED: &str = "ipc_queue_overloaded";
    /// Catch-all for unmapped internal failures.
    pub const INTERNAL_ERROR: &str = "internal_error";
}
