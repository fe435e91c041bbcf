//! Control IPC surface.

pub mod protocol;
pub mod server;

pub use protocol::{IpcRequest, IpcResponse};
pub use server::{spawn_ipc_server, IpcServerConfig, OrchestratorTx};
